//! DNS cache implementation

use lru::LruCache;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => panic!("capacity must be non-zero"),
};

#[derive(Clone, Debug)]
struct CacheEntry {
    ips: Vec<IpAddr>,
    expires: Instant,
}

/// Host lookup cache with LRU eviction and a fixed TTL
pub struct DnsCache {
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl DnsCache {
    /// Create new DNS cache
    pub fn new(max_size: usize) -> Self {
        Self::with_ttl(max_size, Duration::from_secs(300))
    }

    /// Create with custom TTL
    pub fn with_ttl(max_size: usize, ttl: Duration) -> Self {
        DnsCache {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_size).unwrap_or(DEFAULT_CAPACITY),
            )),
            ttl,
        }
    }

    /// Get live addresses for `host`
    pub fn get(&self, host: &str) -> Option<Vec<IpAddr>> {
        let mut cache = self.cache.lock();
        match cache.get(host) {
            Some(entry) if entry.expires > Instant::now() => Some(entry.ips.clone()),
            Some(_) => {
                cache.pop(host);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, host: String, ips: Vec<IpAddr>) {
        let entry = CacheEntry {
            ips,
            expires: Instant::now() + self.ttl,
        };
        self.cache.lock().put(host, entry);
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_cache_put_get() {
        let cache = DnsCache::new(100);
        let ip = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

        cache.put("example.com".to_string(), vec![ip]);
        assert_eq!(cache.get("example.com"), Some(vec![ip]));
        assert_eq!(cache.get("other.com"), None);
    }

    #[test]
    fn test_cache_expiry() {
        let cache = DnsCache::with_ttl(100, Duration::from_millis(10));
        cache.put("example.com".to_string(), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);

        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get("example.com").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_clear() {
        let cache = DnsCache::new(0);
        cache.put("example.com".to_string(), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
