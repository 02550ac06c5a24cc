//! The cache contract (§4.B, §4.F): a namespaced, TTL-bounded key/value
//! store with an LRU cap per user, plus a semantic layer on top that can
//! answer a cache miss by similarity instead of exact key match.

pub mod memory;
pub mod semantic;

use std::time::Duration;

/// A stored value plus the bookkeeping the eviction and semantic-match
/// logic needs: when it was written, when it expires, and (for the
/// semantic layer) the embedding it was keyed by.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub inserted_at: chrono::DateTime<chrono::Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let age = now.signed_duration_since(self.inserted_at);
        age > chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero())
    }
}

/// Implemented by whatever backs the raw key/value layer. `SemanticCache`
/// (§4.F) is built on top of this, never a replacement for it.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;
    fn put(&self, key: &str, entry: CacheEntry);
    fn invalidate(&self, key: &str);
    fn invalidate_prefix(&self, prefix: &str);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// All (key, entry) pairs under `prefix`, for semantic-match scanning.
    fn scan_prefix(&self, prefix: &str) -> Vec<(String, CacheEntry)>;
}
