//! Hybrid Retriever (§4.D): fans a query out to the store's vector and
//! lexical search paths in parallel, fuses the two ranked lists into
//! one, and applies optional freshness/importance adjustments before
//! handing back a deterministically ordered top-k. Grounded on
//! Rapheal7-My-Agent's `hybrid_search` (weighted FTS/semantic
//! combination) and KogSector-ConHub's RRF fusion service.

pub mod fusion;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::filter::CompiledFilter;
use crate::metrics::Metrics;
use crate::store::{RecordKind, StoredRecord, VectorStore};
use fusion::{fuse, freshness_factor, importance_multiplier, FusionMethod};

#[derive(Debug, Clone, Default)]
pub struct HitReasons {
    pub vector_rank: Option<usize>,
    pub lex_rank: Option<usize>,
    pub freshness_applied: bool,
    pub importance_applied: bool,
    pub scope_expanded: bool,
}

#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub doc: StoredRecord,
    pub vector_score: f32,
    pub lex_score: f32,
    pub fused_score: f32,
    pub reasons: HitReasons,
}

pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: Config,
    metrics: Arc<Metrics>,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, config: Config, metrics: Arc<Metrics>) -> Self {
        Self { store, embedder, config, metrics }
    }

    /// Runs the full §4.D pipeline for one kind. Callers wanting results
    /// across multiple kinds (e.g. the facade's `get_context`) call this
    /// once per kind and merge; fusion never mixes kinds, since their
    /// embedding spaces and relevance scales aren't comparable.
    pub async fn retrieve(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_text: &str,
        k: usize,
        filter: Option<&CompiledFilter>,
        method: FusionMethod,
    ) -> Result<Vec<RetrievalHit>> {
        let started = Instant::now();
        let result = self.retrieve_inner(kind, user_id, query_text, k, filter, method).await;
        self.metrics.retrieval_latency.observe(started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(hits) if hits.is_empty() => "empty",
            Ok(_) => "hit",
            Err(_) => "error",
        };
        self.metrics.retrieval_calls.with_label_values(&[outcome]).inc();
        result
    }

    async fn retrieve_inner(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_text: &str,
        k: usize,
        filter: Option<&CompiledFilter>,
        method: FusionMethod,
    ) -> Result<Vec<RetrievalHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        if query_text.is_empty() {
            if let Some(filter) = filter {
                let mut hits = self.scan_as_hits(kind, user_id, filter, k)?;
                hits.truncate(k);
                return Ok(hits);
            }
        }

        let query_embedding = self.embedder.embed(query_text).await?;
        let k_fetch = k.max(self.config.k_fetch_min);

        let (vector_hits, lex_hits, scope_expanded) =
            self.fetch_candidates(kind, user_id, query_text, &query_embedding, k_fetch, filter)?;
        debug!(kind = kind.as_str(), vector_hits = vector_hits.len(), lex_hits = lex_hits.len(), scope_expanded, "fetched candidates");

        if vector_hits.is_empty() && lex_hits.is_empty() {
            return Ok(Vec::new());
        }

        let fused = fuse(
            &vector_hits,
            &lex_hits,
            method,
            self.config.retrieval_weight_vector,
            self.config.retrieval_weight_lexical,
        );

        let ids: Vec<Uuid> = fused.keys().copied().collect();
        let docs = self.store.fetch(kind, &ids)?;

        let now = Utc::now();
        let mut hits: Vec<RetrievalHit> = docs
            .into_iter()
            .filter_map(|doc| {
                let f = fused.get(&doc.id)?;
                let mut fused_score = f.fused_score;

                let mut reasons = HitReasons {
                    vector_rank: f.vector_rank,
                    lex_rank: f.lex_rank,
                    freshness_applied: self.config.retrieval_apply_freshness,
                    importance_applied: self.config.retrieval_apply_importance,
                    scope_expanded,
                };

                if self.config.retrieval_apply_freshness {
                    fused_score *= freshness_factor(doc.created_at, now, self.config.retrieval_freshness_half_life_days);
                } else {
                    reasons.freshness_applied = false;
                }

                if self.config.retrieval_apply_importance {
                    fused_score *= importance_multiplier(doc.importance);
                } else {
                    reasons.importance_applied = false;
                }

                Some(RetrievalHit { vector_score: f.vector_score, lex_score: f.lex_score, fused_score, doc, reasons })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.doc.importance.partial_cmp(&a.doc.importance).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.doc.created_at.cmp(&a.doc.created_at))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Issues the ANN and lexical fetches with the caller's filter. If
    /// both come back empty and scope expansion is enabled, retries once
    /// with the filter dropped entirely — the filter-relaxation path is
    /// off by default since it changes the meaning of the query.
    fn fetch_candidates(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_text: &str,
        query_embedding: &[f32],
        k_fetch: usize,
        filter: Option<&CompiledFilter>,
    ) -> Result<(Vec<crate::store::ScoredId>, Vec<crate::store::ScoredId>, bool)> {
        let vector_hits = self.store.ann(kind, user_id, query_embedding, k_fetch, filter)?;
        let lex_hits = self.store.lex(kind, user_id, query_text, k_fetch, filter)?;

        if vector_hits.is_empty() && lex_hits.is_empty() && filter.is_some() && self.config.retrieval_expand_scope_on_empty {
            let vector_hits = self.store.ann(kind, user_id, query_embedding, k_fetch, None)?;
            let lex_hits = self.store.lex(kind, user_id, query_text, k_fetch, None)?;
            return Ok((vector_hits, lex_hits, true));
        }

        Ok((vector_hits, lex_hits, false))
    }

    /// Pure filter-scan path for an empty query with a filter attached
    /// (§8): bypasses the embedder and both ANN/lexical subqueries
    /// entirely, ranking by importance and recency instead of a fused
    /// relevance score.
    fn scan_as_hits(&self, kind: RecordKind, user_id: &str, filter: &CompiledFilter, limit: usize) -> Result<Vec<RetrievalHit>> {
        let mut docs = self.store.scan(kind, user_id, Some(filter), limit)?;
        docs.sort_by(|a, b| {
            b.importance.partial_cmp(&a.importance).unwrap_or(std::cmp::Ordering::Equal).then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(docs
            .into_iter()
            .map(|doc| RetrievalHit {
                vector_score: 0.0,
                lex_score: 0.0,
                fused_score: doc.importance,
                reasons: HitReasons::default(),
                doc,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash::HashEmbedder;
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn record(id: Uuid, user: &str, text: &str, embedding: Vec<f32>, importance: f32) -> StoredRecord {
        let now = Utc::now();
        StoredRecord {
            id,
            user_id: user.to_string(),
            kind: RecordKind::Knowledge,
            embedding,
            text: text.to_string(),
            fields: json!({}),
            importance,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn retrieve_fuses_and_ranks_by_relevance() {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(HashEmbedder::new(16));

        let a = record(Uuid::new_v4(), "u1", "rust ownership rules", embedder.embed("rust ownership rules").await.unwrap(), 0.5);
        let b = record(Uuid::new_v4(), "u1", "baking sourdough bread", embedder.embed("baking sourdough bread").await.unwrap(), 0.5);
        store.put(a.clone()).unwrap();
        store.put(b).unwrap();

        let retriever = HybridRetriever::new(store, embedder, Config::default(), Arc::new(Metrics::new()));
        let hits = retriever
            .retrieve(RecordKind::Knowledge, "u1", "rust ownership rules", 5, None, FusionMethod::ReciprocalRank)
            .await
            .unwrap();

        assert_eq!(hits[0].doc.id, a.id);
    }

    #[tokio::test]
    async fn retrieve_is_scoped_to_user() {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(HashEmbedder::new(16));

        let other = record(Uuid::new_v4(), "other-user", "rust ownership rules", embedder.embed("rust ownership rules").await.unwrap(), 0.5);
        store.put(other).unwrap();

        let retriever = HybridRetriever::new(store, embedder, Config::default(), Arc::new(Metrics::new()));
        let hits = retriever
            .retrieve(RecordKind::Knowledge, "u1", "rust ownership rules", 5, None, FusionMethod::ReciprocalRank)
            .await
            .unwrap();

        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn zero_k_short_circuits_without_touching_the_store() {
        let store = Arc::new(MemoryStore::new());
        let a = record(Uuid::new_v4(), "u1", "rust ownership rules", vec![0.1; 16], 0.5);
        store.put(a).unwrap();
        let embedder = Arc::new(HashEmbedder::new(16));
        let retriever = HybridRetriever::new(store, embedder, Config::default(), Arc::new(Metrics::new()));
        let hits = retriever.retrieve(RecordKind::Knowledge, "u1", "rust", 0, None, FusionMethod::ReciprocalRank).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_query_with_filter_scans_instead_of_embedding() {
        use crate::filter::{compile, FieldTypeRegistry, FilterExpr, FilterValue, Op};

        let store = Arc::new(MemoryStore::new());
        let a = record(Uuid::new_v4(), "u1", "rust ownership rules", vec![0.1; 16], 0.9);
        let mut b = record(Uuid::new_v4(), "u1", "baking sourdough bread", vec![0.2; 16], 0.2);
        b.fields = json!({"category": "cooking"});
        store.put(a.clone()).unwrap();
        store.put(b).unwrap();

        let registry = FieldTypeRegistry::new().declare("category", crate::filter::FieldType::String, true);
        let filter = compile(FilterExpr::leaf("category", Op::IsNull), &registry).unwrap();

        let embedder = Arc::new(HashEmbedder::new(16));
        let retriever = HybridRetriever::new(store, embedder, Config::default(), Arc::new(Metrics::new()));
        let hits = retriever
            .retrieve(RecordKind::Knowledge, "u1", "", 5, Some(&filter), FusionMethod::ReciprocalRank)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.id, a.id);
    }

    #[tokio::test]
    async fn empty_store_returns_empty_results() {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(HashEmbedder::new(16));
        let retriever = HybridRetriever::new(store, embedder, Config::default(), Arc::new(Metrics::new()));
        let hits = retriever
            .retrieve(RecordKind::Knowledge, "u1", "anything", 5, None, FusionMethod::ReciprocalRank)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
