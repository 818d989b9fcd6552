//! Bounded cache of prefiller reverse-proxy handlers.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use reqwest::Client;
use url::Url;

use super::upstream::{ReverseProxy, UPSTREAM_PREFILLER};
use super::ProxyError;
use crate::config::Scheme;

/// Maximum number of cached prefiller handlers.
pub const PREFILLER_CACHE_CAPACITY: usize = 16;

/// LRU map from `host:port` to its reverse-proxy handler. Handlers are
/// `Arc`s with only immutable fields, so an entry evicted while another
/// request still holds the handler stays valid. All handlers share one
/// pooled client, which keeps upstream keep-alives warm across requests.
pub struct PrefillerCache {
    handlers: Mutex<LruCache<String, Arc<ReverseProxy>>>,
    client: Client,
    scheme: Scheme,
}

impl PrefillerCache {
    pub fn new(client: Client, scheme: Scheme) -> Self {
        let capacity = NonZeroUsize::new(PREFILLER_CACHE_CAPACITY)
            .unwrap_or(NonZeroUsize::MIN);

        Self {
            handlers: Mutex::new(LruCache::new(capacity)),
            client,
            scheme,
        }
    }

    /// Fetch the handler for `host_port`, building and inserting it on a
    /// miss. A leading `http://` is tolerated for backward compatibility.
    pub fn handler(&self, host_port: &str) -> Result<Arc<ReverseProxy>, ProxyError> {
        let mut handlers = self.handlers.lock();
        if let Some(handler) = handlers.get(host_port) {
            return Ok(handler.clone());
        }

        let trimmed = host_port.strip_prefix("http://").unwrap_or(host_port);
        let target = Url::parse(&format!("{}://{}", self.scheme.as_str(), trimmed))
            .map_err(|err| ProxyError::InvalidTarget {
                target: host_port.to_string(),
                reason: err.to_string(),
            })?;

        let handler = Arc::new(ReverseProxy::new(
            target,
            self.client.clone(),
            UPSTREAM_PREFILLER,
        ));
        handlers.put(host_port.to_string(), handler.clone());

        Ok(handler)
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `host_port` currently has a cached handler. Does not touch
    /// recency.
    pub fn contains(&self, host_port: &str) -> bool {
        self.handlers.lock().peek(host_port).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> PrefillerCache {
        PrefillerCache::new(Client::new(), Scheme::Http)
    }

    #[test]
    fn test_miss_builds_handler() {
        let cache = cache();
        let handler = cache.handler("10.0.0.5:8000").unwrap();
        assert_eq!(handler.target().as_str(), "http://10.0.0.5:8000/");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_reuses_handler() {
        let cache = cache();
        let first = cache.handler("10.0.0.5:8000").unwrap();
        let second = cache.handler("10.0.0.5:8000").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_http_prefix_trimmed() {
        let cache = cache();
        let handler = cache.handler("http://10.0.0.5:8000").unwrap();
        assert_eq!(handler.target().as_str(), "http://10.0.0.5:8000/");
    }

    #[test]
    fn test_https_scheme() {
        let cache = PrefillerCache::new(Client::new(), Scheme::Https);
        let handler = cache.handler("10.0.0.5:8443").unwrap();
        assert_eq!(handler.target().as_str(), "https://10.0.0.5:8443/");
    }

    #[test]
    fn test_invalid_target_rejected() {
        let cache = cache();
        assert!(cache.handler("not a host").is_err());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_bound_evicts_lru() {
        let cache = cache();
        for i in 0..PREFILLER_CACHE_CAPACITY {
            cache.handler(&format!("10.0.0.{i}:8000")).unwrap();
        }
        assert_eq!(cache.len(), PREFILLER_CACHE_CAPACITY);

        // Refresh the first entry so the second becomes least recently used.
        let survivor = cache.handler("10.0.0.0:8000").unwrap();

        cache.handler("10.0.1.99:8000").unwrap();
        assert_eq!(cache.len(), PREFILLER_CACHE_CAPACITY);
        assert!(cache.contains("10.0.0.0:8000"));
        assert!(!cache.contains("10.0.0.1:8000"));

        // The evicted-entry scenario: handlers held across eviction stay usable.
        assert_eq!(survivor.target().as_str(), "http://10.0.0.0:8000/");
    }
}
