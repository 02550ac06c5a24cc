//! A `dashmap`-backed [`Cache`] with lazy TTL expiry and a per-namespace
//! LRU cap. Eviction happens on write: once a namespace prefix holds more
//! than `capacity` live entries, the least-recently-touched one is
//! dropped. A plain recency order is enough for the namespace caps in
//! play here; no multi-factor scoring needed.

use chrono::Utc;
use dashmap::DashMap;

use super::{Cache, CacheEntry};

struct Slot {
    entry: CacheEntry,
    last_touched: chrono::DateTime<chrono::Utc>,
}

pub struct InMemoryCache {
    capacity_per_prefix: usize,
    entries: DashMap<String, Slot>,
}

impl InMemoryCache {
    pub fn new(capacity_per_prefix: usize) -> Self {
        Self { capacity_per_prefix, entries: DashMap::new() }
    }

    /// The capacity pool a key belongs to: `kind:user`, e.g.
    /// `query:alice` for both `query:alice:abc123` and a bare
    /// `query:alice` key, so the per-user cap (§4.F) applies uniformly
    /// regardless of whether the key carries a query fingerprint suffix.
    fn namespace_of(key: &str) -> String {
        let mut parts = key.splitn(3, ':');
        match (parts.next(), parts.next()) {
            (Some(kind), Some(user)) => format!("{kind}:{user}"),
            _ => key.to_string(),
        }
    }

    fn evict_if_over_capacity(&self, namespace: &str) {
        if self.capacity_per_prefix == 0 {
            return;
        }
        let mut siblings: Vec<(String, chrono::DateTime<chrono::Utc>)> = self
            .entries
            .iter()
            .filter(|kv| Self::namespace_of(kv.key()) == namespace)
            .map(|kv| (kv.key().clone(), kv.value().last_touched))
            .collect();
        if siblings.len() <= self.capacity_per_prefix {
            return;
        }
        siblings.sort_by_key(|(_, touched)| *touched);
        let overflow = siblings.len() - self.capacity_per_prefix;
        for (key, _) in siblings.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }
}

impl Cache for InMemoryCache {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        let expired = self.entries.get(key).map(|slot| slot.entry.is_expired(now)).unwrap_or(false);
        if expired {
            self.entries.remove(key);
            return None;
        }
        if let Some(mut slot) = self.entries.get_mut(key) {
            slot.last_touched = now;
            return Some(slot.entry.clone());
        }
        None
    }

    fn put(&self, key: &str, entry: CacheEntry) {
        let namespace = Self::namespace_of(key);
        self.entries.insert(key.to_string(), Slot { entry, last_touched: Utc::now() });
        self.evict_if_over_capacity(&namespace);
    }

    fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<(String, CacheEntry)> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|kv| kv.key().starts_with(prefix) && !kv.value().entry.is_expired(now))
            .map(|kv| (kv.key().clone(), kv.value().entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(v: &str) -> CacheEntry {
        CacheEntry { value: serde_json::json!(v), embedding: None, inserted_at: Utc::now(), ttl: Duration::from_secs(60) }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let cache = InMemoryCache::new(10);
        cache.put("query:u1:abc", entry("hello"));
        assert!(cache.get("query:u1:abc").is_some());
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let cache = InMemoryCache::new(10);
        let mut e = entry("hello");
        e.ttl = Duration::from_secs(0);
        e.inserted_at = Utc::now() - chrono::Duration::seconds(5);
        cache.put("query:u1:abc", e);
        assert!(cache.get("query:u1:abc").is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_touched_within_namespace() {
        let cache = InMemoryCache::new(2);
        cache.put("query:u1:a", entry("a"));
        cache.put("query:u1:b", entry("b"));
        cache.put("query:u1:c", entry("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("query:u1:a").is_none());
        assert!(cache.get("query:u1:c").is_some());
    }

    #[test]
    fn invalidate_prefix_clears_only_matching_keys() {
        let cache = InMemoryCache::new(10);
        cache.put("persona:u1", entry("p"));
        cache.put("query:u1:a", entry("q"));
        cache.invalidate_prefix("persona:u1");
        assert!(cache.get("persona:u1").is_none());
        assert!(cache.get("query:u1:a").is_some());
    }
}
