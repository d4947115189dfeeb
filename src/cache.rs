//! Local cache seam
//!
//! The cluster controller never touches cache entries directly; it calls
//! through [`CacheStore`], which any second-level cache can implement.
//! [`MemoryCache`] is the reference implementation used by tests, demos
//! and small embedders.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::cluster::messages::CacheKey;
use crate::error::Result;

/// Capability interface consumed by the inbound dispatch path.
///
/// Both operations are invoked synchronously, one message at a time, and
/// must be idempotent: evicting an absent key or clearing an absent
/// region is a no-op. Errors are logged by the dispatcher and isolated
/// per message, so a failing store never stops later invalidations.
pub trait CacheStore: Send + Sync {
    /// Remove one entry from a region
    fn evict(&self, region: &str, key: &CacheKey) -> Result<()>;

    /// Drop every entry in a region
    fn clear(&self, region: &str) -> Result<()>;
}

/// Minimal in-memory region store: region name -> key -> value bytes
#[derive(Default)]
pub struct MemoryCache {
    regions: RwLock<HashMap<String, HashMap<CacheKey, Vec<u8>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a region and key
    pub fn put(&self, region: &str, key: CacheKey, value: Vec<u8>) {
        self.regions
            .write()
            .entry(region.to_string())
            .or_default()
            .insert(key, value);
    }

    /// Read a value back, if present
    pub fn get(&self, region: &str, key: &CacheKey) -> Option<Vec<u8>> {
        self.regions
            .read()
            .get(region)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    /// Whether a region currently holds the key
    pub fn contains(&self, region: &str, key: &CacheKey) -> bool {
        self.regions
            .read()
            .get(region)
            .map_or(false, |entries| entries.contains_key(key))
    }

    /// Number of entries in a region (0 for unknown regions)
    pub fn region_len(&self, region: &str) -> usize {
        self.regions
            .read()
            .get(region)
            .map_or(0, |entries| entries.len())
    }
}

impl CacheStore for MemoryCache {
    fn evict(&self, region: &str, key: &CacheKey) -> Result<()> {
        if let Some(entries) = self.regions.write().get_mut(region) {
            entries.remove(key);
        }
        Ok(())
    }

    fn clear(&self, region: &str) -> Result<()> {
        self.regions.write().remove(region);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let cache = MemoryCache::new();
        cache.put("users", CacheKey::Int(42), b"alice".to_vec());

        assert_eq!(cache.get("users", &CacheKey::Int(42)), Some(b"alice".to_vec()));
        assert!(cache.contains("users", &CacheKey::Int(42)));
        assert_eq!(cache.region_len("users"), 1);
    }

    #[test]
    fn test_evict_removes_single_key() {
        let cache = MemoryCache::new();
        cache.put("users", CacheKey::Int(1), b"a".to_vec());
        cache.put("users", CacheKey::Int(2), b"b".to_vec());

        cache.evict("users", &CacheKey::Int(1)).unwrap();

        assert!(!cache.contains("users", &CacheKey::Int(1)));
        assert!(cache.contains("users", &CacheKey::Int(2)));
        assert_eq!(cache.region_len("users"), 1);
    }

    #[test]
    fn test_clear_drops_whole_region() {
        let cache = MemoryCache::new();
        cache.put("users", CacheKey::Int(1), b"a".to_vec());
        cache.put("users", CacheKey::Int(2), b"b".to_vec());
        cache.put("orders", CacheKey::Int(1), b"c".to_vec());

        cache.clear("users").unwrap();

        assert_eq!(cache.region_len("users"), 0);
        assert_eq!(cache.region_len("orders"), 1);
    }

    #[test]
    fn test_evict_and_clear_are_idempotent() {
        let cache = MemoryCache::new();

        // Absent key and absent region are both no-ops
        cache.evict("users", &CacheKey::Int(99)).unwrap();
        cache.clear("missing").unwrap();

        cache.put("users", CacheKey::Text("k".to_string()), b"v".to_vec());
        cache.evict("users", &CacheKey::Text("k".to_string())).unwrap();
        cache.evict("users", &CacheKey::Text("k".to_string())).unwrap();
        assert_eq!(cache.region_len("users"), 0);
    }

    #[test]
    fn test_regions_are_independent() {
        let cache = MemoryCache::new();
        cache.put("users", CacheKey::Int(1), b"a".to_vec());
        cache.put("orders", CacheKey::Int(1), b"b".to_vec());

        cache.evict("users", &CacheKey::Int(1)).unwrap();

        assert!(!cache.contains("users", &CacheKey::Int(1)));
        assert!(cache.contains("orders", &CacheKey::Int(1)));
    }

    #[test]
    fn test_key_types_do_not_collide() {
        let cache = MemoryCache::new();
        cache.put("users", CacheKey::Int(42), b"int".to_vec());
        cache.put("users", CacheKey::Text("42".to_string()), b"text".to_vec());

        assert_eq!(cache.region_len("users"), 2);
        cache.evict("users", &CacheKey::Int(42)).unwrap();
        assert_eq!(cache.get("users", &CacheKey::Text("42".to_string())), Some(b"text".to_vec()));
    }
}
