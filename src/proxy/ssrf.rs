//! SSRF defense: allowlist validation of prefill targets.
//!
//! Two variants, selected at startup. The static validator accepts only
//! IPv4 literals inside private or special-purpose ranges. The dynamic
//! validator checks membership in a live set of cluster endpoints that an
//! external watcher keeps fresh; the core only consumes the query side.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Private or special-purpose IPv4 ranges a prefill target may live in.
/// There is no portable way to discover the cluster's pod CIDR, so this is
/// the widest set of non-Internet-routable ranges instead.
static SPECIAL_NETS: Lazy<Vec<Ipv4Net>> = Lazy::new(|| {
    [
        "10.0.0.0/8",         // private (RFC 1918)
        "172.16.0.0/12",      // private (RFC 1918)
        "192.168.0.0/16",     // private (RFC 1918)
        "127.0.0.0/8",        // loopback
        "169.254.0.0/16",     // link-local
        "100.64.0.0/10",      // carrier-grade NAT
        "192.0.0.0/24",       // protocol assignments (IETF)
        "192.0.2.0/24",       // test network
        "198.18.0.0/15",      // benchmarking
        "198.51.100.0/24",    // test network
        "203.0.113.0/24",     // test network
        "224.0.0.0/4",        // multicast
        "240.0.0.0/4",        // reserved
        "0.0.0.0/8",          // "this" network
        "255.255.255.255/32", // broadcast
    ]
    .iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
});

fn strip_scheme(host_port: &str) -> &str {
    host_port
        .strip_prefix("http://")
        .or_else(|| host_port.strip_prefix("https://"))
        .unwrap_or(host_port)
}

/// Validator consulted before any outbound prefiller request is issued.
pub enum AllowlistValidator {
    Static(StaticAllowlist),
    Dynamic(DynamicAllowlist),
}

impl AllowlistValidator {
    pub fn is_allowed(&self, host_port: &str) -> bool {
        match self {
            AllowlistValidator::Static(validator) => validator.is_allowed(host_port),
            AllowlistValidator::Dynamic(validator) => validator.is_allowed(host_port),
        }
    }
}

/// Accepts `host:port` targets whose host is an IPv4 literal inside one of
/// the [`SPECIAL_NETS`] ranges. Hostnames and IPv6 are rejected outright.
#[derive(Debug, Default)]
pub struct StaticAllowlist;

impl StaticAllowlist {
    pub fn is_allowed(&self, host_port: &str) -> bool {
        let host_port = strip_scheme(host_port);
        let host = host_port.split(':').next().unwrap_or(host_port);

        let Ok(ip) = host.parse::<Ipv4Addr>() else {
            return false;
        };

        SPECIAL_NETS.iter().any(|net| net.contains(&ip))
    }
}

/// Membership check against a live set of `host:port` and `ip:port`
/// endpoint pairs. Readers hold the read lock for a single lookup; the
/// external watcher swaps the whole set under the write lock.
#[derive(Debug, Clone, Default)]
pub struct DynamicAllowlist {
    entries: Arc<RwLock<HashSet<String>>>,
}

impl DynamicAllowlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_allowed(&self, host_port: &str) -> bool {
        self.entries.read().contains(strip_scheme(host_port))
    }

    /// Atomically replace the allowlist. Called by the endpoint watcher.
    pub fn replace(&self, entries: HashSet<String>) {
        *self.entries.write() = entries;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
