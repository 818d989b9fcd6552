//! Startup-time configuration for the sidecar.

use clap::ValueEnum;
use url::Url;

/// The P/D connector protocol spoken between prefiller and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConnectorKind {
    /// NIXL v1 (deprecated): the sidecar transports KV metadata itself.
    #[value(name = "nixl")]
    NixlV1,
    /// NIXL v2: the decoder pulls KV blocks directly from the prefiller.
    #[value(name = "nixlv2")]
    NixlV2,
    /// LMCache (deprecated): warm the prefiller cache with a one-token request.
    #[value(name = "lmcache")]
    LmCache,
    /// SGLang: prefiller and decoder rendezvous via a shared bootstrap room.
    #[value(name = "sglang")]
    SgLang,
}

/// Scheme used for outbound prefiller requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn from_use_tls(use_tls: bool) -> Self {
        if use_tls {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }
}

/// Immutable settings shared by every request handler.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Port the sidecar listens on.
    pub port: u16,
    /// Base URL of the local decoder.
    pub decoder_url: Url,
    /// Connector protocol selected at startup.
    pub connector: ConnectorKind,
    /// Scheme for outbound prefiller requests.
    pub prefiller_scheme: Scheme,
    /// Pick a uniformly random prefiller when the header lists several.
    pub enable_prefiller_sampling: bool,
    /// NIXL v1: fail the request when the prefiller response omits
    /// handshake fields instead of warning and continuing.
    pub strict_handshake: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_from_use_tls() {
        assert_eq!(Scheme::from_use_tls(false).as_str(), "http");
        assert_eq!(Scheme::from_use_tls(true).as_str(), "https");
    }
}
