//! Three-namespace semantic cache (§4.F): `persona:<user>`,
//! `query:<user>:<fingerprint>` and `input:<user>:<fingerprint>`, each
//! with its own TTL. A miss on the exact key falls back to a cosine-
//! similarity scan within the same user+namespace before giving up.

use std::sync::Arc;
use std::time::Duration;

use blake3::Hasher;

use super::{Cache, CacheEntry};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Persona,
    Query,
    Input,
}

impl Namespace {
    fn tag(self) -> &'static str {
        match self {
            Namespace::Persona => "persona",
            Namespace::Query => "query",
            Namespace::Input => "input",
        }
    }
}

/// A fingerprint is a content hash, not the raw text, so cache keys stay
/// short and stable across equivalent-but-differently-whitespaced input.
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.trim().to_lowercase().as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn exact_key(namespace: Namespace, user_id: &str, fingerprint: Option<&str>) -> String {
    match fingerprint {
        Some(fp) => format!("{}:{}:{}", namespace.tag(), user_id, fp),
        None => format!("{}:{}", namespace.tag(), user_id),
    }
}

pub struct SemanticCacheHit {
    pub value: serde_json::Value,
    pub exact: bool,
}

pub struct SemanticCache {
    inner: Arc<dyn Cache>,
    config: Config,
}

impl SemanticCache {
    pub fn new(inner: Arc<dyn Cache>, config: Config) -> Self {
        Self { inner, config }
    }

    fn ttl_for(&self, namespace: Namespace) -> Duration {
        match namespace {
            Namespace::Persona => Duration::from_secs(self.config.cache_persona_ttl_s),
            Namespace::Query => Duration::from_secs(self.config.cache_query_ttl_s),
            Namespace::Input => Duration::from_secs(self.config.cache_input_ttl_s),
        }
    }

    /// Looks up `key` exactly first, then by cosine similarity against
    /// every live entry under the same `namespace:user_id` prefix when
    /// `query_embedding` is given. Returns the best match at or above the
    /// configured semantic-match threshold.
    pub fn get(
        &self,
        namespace: Namespace,
        user_id: &str,
        fingerprint: Option<&str>,
        query_embedding: Option<&[f32]>,
    ) -> Option<SemanticCacheHit> {
        let key = exact_key(namespace, user_id, fingerprint);
        if let Some(entry) = self.inner.get(&key) {
            return Some(SemanticCacheHit { value: entry.value, exact: true });
        }

        let query_embedding = query_embedding?;
        let prefix = format!("{}:{}", namespace.tag(), user_id);
        let mut best: Option<(f32, serde_json::Value)> = None;
        for (_, entry) in self.inner.scan_prefix(&prefix) {
            let Some(embedding) = &entry.embedding else { continue };
            let sim = cosine_similarity(query_embedding, embedding);
            if sim >= self.config.cache_semantic_match_threshold && best.as_ref().map_or(true, |(s, _)| sim > *s) {
                best = Some((sim, entry.value.clone()));
            }
        }
        best.map(|(_, value)| SemanticCacheHit { value, exact: false })
    }

    pub fn put(
        &self,
        namespace: Namespace,
        user_id: &str,
        fingerprint: Option<&str>,
        value: serde_json::Value,
        embedding: Option<Vec<f32>>,
    ) {
        let key = exact_key(namespace, user_id, fingerprint);
        self.inner.put(
            &key,
            CacheEntry { value, embedding, inserted_at: chrono::Utc::now(), ttl: self.ttl_for(namespace) },
        );
    }

    /// Called on every Persona or KnowledgeItem write (§4.F): clears the
    /// user's persona snapshot and every query/input entry that may have
    /// been derived from the now-stale memory.
    pub fn invalidate_user(&self, user_id: &str) {
        self.inner.invalidate_prefix(&format!("{}:{user_id}", Namespace::Persona.tag()));
        self.inner.invalidate_prefix(&format!("{}:{user_id}", Namespace::Query.tag()));
        self.inner.invalidate_prefix(&format!("{}:{user_id}", Namespace::Input.tag()));
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;

    fn cache() -> SemanticCache {
        SemanticCache::new(Arc::new(InMemoryCache::new(10)), Config::default())
    }

    #[test]
    fn exact_hit_after_put() {
        let cache = cache();
        cache.put(Namespace::Query, "u1", Some("fp1"), serde_json::json!("answer"), None);
        let hit = cache.get(Namespace::Query, "u1", Some("fp1"), None).unwrap();
        assert!(hit.exact);
    }

    #[test]
    fn semantic_match_above_threshold_is_found() {
        let cache = cache();
        cache.put(Namespace::Query, "u1", Some("fp1"), serde_json::json!("answer"), Some(vec![1.0, 0.0]));
        let hit = cache.get(Namespace::Query, "u1", Some("fp2"), Some(&[0.99, 0.05])).unwrap();
        assert!(!hit.exact);
    }

    #[test]
    fn semantic_match_below_threshold_misses() {
        let cache = cache();
        cache.put(Namespace::Query, "u1", Some("fp1"), serde_json::json!("answer"), Some(vec![1.0, 0.0]));
        assert!(cache.get(Namespace::Query, "u1", Some("fp2"), Some(&[0.0, 1.0])).is_none());
    }

    #[test]
    fn invalidate_user_clears_all_namespaces() {
        let cache = cache();
        cache.put(Namespace::Persona, "u1", None, serde_json::json!("p"), None);
        cache.put(Namespace::Query, "u1", Some("fp1"), serde_json::json!("q"), None);
        cache.invalidate_user("u1");
        assert!(cache.get(Namespace::Persona, "u1", None, None).is_none());
        assert!(cache.get(Namespace::Query, "u1", Some("fp1"), None).is_none());
    }

    #[test]
    fn fingerprint_is_stable_across_whitespace_and_case() {
        assert_eq!(fingerprint("Hello World"), fingerprint("  hello world  "));
    }
}
