//! Memory Facade (§4.H): the single entry point external collaborators
//! use. Ties the store, embedder, hybrid retriever, semantic cache and
//! context optimizer together behind five operations. One struct owning
//! every capability, thin public methods that delegate to the pipeline
//! pieces.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cache::semantic::{fingerprint, Namespace, SemanticCache};
use crate::classify::{Classifier, IngestClassification, IngestClassifier, IngestLayer, RuleBasedClassifier, RuleBasedIngestClassifier};
use crate::config::{Config, OptimizerConfig, OptimizerProfile};
use crate::domain::{Category, KnowledgeItem, Persona};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::filter::compile::{compile, FieldTypeRegistry};
use crate::filter::expr::{FieldType, FilterExpr, FilterValue, Op};
use crate::filter::CompiledFilter;
use crate::metrics::Metrics;
use crate::optimizer::{ContextOptimizer, OptimizerCandidate, OptimizerStats};
use crate::retrieval::fusion::FusionMethod;
use crate::retrieval::{HybridRetriever, RetrievalHit};
use crate::store::{RecordKind, StoredRecord, VectorStore};

fn field_registry() -> FieldTypeRegistry {
    FieldTypeRegistry::new()
        .declare("category", FieldType::String, true)
        .declare("importance", FieldType::Number, true)
        .declare("tags", FieldType::Array, true)
        .declare("created_at", FieldType::Timestamp, true)
}

#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub written_ids: Vec<Uuid>,
    pub classification: IngestClassification,
}

/// Which path satisfied a cache lookup, per §4.F's exact-vs-semantic
/// distinction — `None` means the call missed the cache entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHitKind {
    None,
    Exact,
    Semantic,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievalHit>,
    pub stats: Option<OptimizerStats>,
    pub cache_hit: bool,
    pub cache_hit_kind: CacheHitKind,
    pub optimizer_skipped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    pub persona: Option<String>,
    pub knowledge_hits: Vec<RetrievalHit>,
    pub episodic_hits: Vec<RetrievalHit>,
    pub truncated: bool,
}

/// What a [`MemoryFacade::with_deadline`]-wrapped call returns when the
/// deadline fires before the inner future resolves (§5): a partial,
/// clearly-marked result rather than an opaque cancellation error. Every
/// Facade operation the deadline can wrap implements this.
pub trait PartialOnTimeout {
    fn timed_out() -> Self;
}

impl PartialOnTimeout for RetrievalResult {
    fn timed_out() -> Self {
        RetrievalResult { hits: Vec::new(), stats: None, cache_hit: false, cache_hit_kind: CacheHitKind::None, optimizer_skipped: true }
    }
}

impl PartialOnTimeout for Context {
    fn timed_out() -> Self {
        Context { persona: None, knowledge_hits: Vec::new(), episodic_hits: Vec::new(), truncated: true }
    }
}

impl PartialOnTimeout for StoreOutcome {
    /// The store is blocking by design (see `store/mod.rs`), so a
    /// deadline can only fire before or after a write call runs to
    /// completion, never mid-write — there is no partial-write state to
    /// represent. This reports "nothing was persisted under this call".
    fn timed_out() -> Self {
        StoreOutcome {
            written_ids: Vec::new(),
            classification: IngestClassification { layer: IngestLayer::Knowledge, category: "timed_out".to_string(), confidence: 0.0 },
        }
    }
}

pub struct MemoryFacade {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<SemanticCache>,
    config: Config,
    metrics: Arc<Metrics>,
    ingest_classifier: Arc<dyn IngestClassifier>,
    query_classifier: Arc<dyn Classifier>,
}

impl MemoryFacade {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, cache: Arc<SemanticCache>, config: Config, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            embedder,
            cache,
            config,
            metrics,
            ingest_classifier: Arc::new(RuleBasedIngestClassifier),
            query_classifier: Arc::new(RuleBasedClassifier),
        }
    }

    pub fn with_ingest_classifier(mut self, classifier: Arc<dyn IngestClassifier>) -> Self {
        self.ingest_classifier = classifier;
        self
    }

    pub fn with_query_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.query_classifier = classifier;
        self
    }

    /// Bounds any Facade call with a deadline (§5): on expiry, short-
    /// circuits the remaining pipeline steps and returns `T::timed_out()`
    /// instead of letting the caller hang indefinitely — a partial
    /// result, not an opaque cancellation error. Child store/cache/
    /// capability calls inherit the same budget implicitly, since they
    /// all run inside `fut`.
    pub async fn with_deadline<T: PartialOnTimeout>(&self, deadline: Duration, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Ok(T::timed_out()),
        }
    }

    fn retriever(&self) -> HybridRetriever {
        HybridRetriever::new(self.store.clone(), self.embedder.clone(), self.config.clone(), self.metrics.clone())
    }

    fn optimizer(&self, profile: Option<OptimizerProfile>) -> ContextOptimizer {
        let cfg = match profile {
            Some(p) => OptimizerConfig::for_profile(p),
            None => self.config.optimizer.clone(),
        };
        ContextOptimizer::new(cfg, self.metrics.clone())
    }

    /// §4.H: classifies `text`, persists it as the matching entity, and
    /// invalidates the user's cache so the next retrieval sees it.
    pub async fn ingest_memory(&self, user_id: &str, text: &str, persona_hint: Option<&str>) -> Result<StoreOutcome> {
        let classification = self.ingest_classifier.classify(text, persona_hint);
        let embedding = self.embedder.embed(text).await?;
        let now = Utc::now();

        let written_id = match classification.layer {
            IngestLayer::Persona => {
                let mut persona = Persona::new(user_id, text, embedding.clone());
                persona.updated_at = now;
                self.put_persona(persona)?;
                Uuid::nil()
            }
            IngestLayer::Episodic => {
                // Raw episodic turns are appended to the conversation log by
                // the caller (chat surface), not written here; ingestion of
                // a standalone episodic statement becomes a one-line
                // knowledge item tagged `episodic_event` so it's still
                // retrievable before the episodization job ever runs.
                let mut item = KnowledgeItem::new(user_id, Category::Other, text, embedding.clone());
                item.add_tag("episodic_event");
                self.put_knowledge(item.clone())?;
                item.id
            }
            IngestLayer::Skill | IngestLayer::Process | IngestLayer::Knowledge => {
                let category = match classification.layer {
                    IngestLayer::Skill => Category::Skill,
                    IngestLayer::Process => Category::Process,
                    _ => Category::Knowledge,
                };
                let item = KnowledgeItem::new(user_id, category, text, embedding.clone());
                self.put_knowledge(item.clone())?;
                item.id
            }
        };

        self.cache.invalidate_user(user_id);
        Ok(StoreOutcome { written_ids: vec![written_id].into_iter().filter(|id| !id.is_nil()).collect(), classification })
    }

    fn put_persona(&self, persona: Persona) -> Result<()> {
        let record = StoredRecord {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, persona.user_id.as_bytes()),
            user_id: persona.user_id.clone(),
            kind: RecordKind::Persona,
            embedding: persona.embedding.clone(),
            text: persona.raw_content.clone(),
            fields: serde_json::json!({
                "name": persona.name,
                "preferences": persona.preferences,
                "interests": persona.interests,
                "expertise": persona.expertise,
            }),
            importance: 1.0,
            created_at: persona.created_at,
            updated_at: persona.updated_at,
        };
        match self.store.get(RecordKind::Persona, record.id)? {
            Some(_) => self.store.update(record),
            None => self.store.put(record),
        }
    }

    fn put_knowledge(&self, item: KnowledgeItem) -> Result<()> {
        let record = StoredRecord {
            id: item.id,
            user_id: item.user_id.clone(),
            kind: RecordKind::Knowledge,
            embedding: item.embedding.clone(),
            text: item.content.clone(),
            fields: serde_json::json!({
                "category": item.category.as_str(),
                "tags": item.tags,
                "metadata": item.metadata,
                "confidence": item.confidence,
            }),
            importance: item.importance,
            created_at: item.created_at,
            updated_at: item.updated_at,
        };
        self.store.put(record)
    }

    /// §4.H: hybrid search through the optimizer, cache-first.
    pub async fn retrieve(
        &self,
        user_id: &str,
        query: &str,
        filter: Option<CompiledFilter>,
        k: usize,
        profile: Option<OptimizerProfile>,
    ) -> Result<RetrievalResult> {
        self.retrieve_kind(RecordKind::Knowledge, user_id, query, filter, k, profile).await
    }

    async fn retrieve_kind(
        &self,
        kind: RecordKind,
        user_id: &str,
        query: &str,
        filter: Option<CompiledFilter>,
        k: usize,
        profile: Option<OptimizerProfile>,
    ) -> Result<RetrievalResult> {
        // The filter is folded into the key so two calls with the same
        // query text but different compiled filters (e.g. two
        // `search_by_category` calls) never collide on the same entry.
        let filter_fp = filter.as_ref().map(|f| serde_json::to_string(f).unwrap_or_default()).unwrap_or_default();
        let fp = fingerprint(&format!("{}:{}:{:?}:{}", kind.as_str(), query, profile, filter_fp));

        // Embedding the query here (independent of the retriever's own
        // internal embed call) is what lets the semantic cache's
        // cosine-similarity fallback actually run against real content.
        let query_embedding = if query.is_empty() { None } else { self.embedder.embed(query).await.ok() };

        if let Some(hit) = self.cache.get(Namespace::Query, user_id, Some(&fp), query_embedding.as_deref()) {
            if let Ok(cached) = serde_json::from_value::<Vec<CachedHit>>(hit.value) {
                let label = if hit.exact { "query_hit_exact" } else { "query_hit_semantic" };
                self.metrics.cache_hits.with_label_values(&[label]).inc();
                let cache_hit_kind = if hit.exact { CacheHitKind::Exact } else { CacheHitKind::Semantic };
                return Ok(RetrievalResult { hits: cached.into_iter().map(CachedHit::into_hit).collect(), stats: None, cache_hit: true, cache_hit_kind, optimizer_skipped: false });
            }
        }
        self.metrics.cache_hits.with_label_values(&["query_miss"]).inc();

        let retriever = self.retriever();
        let k_fetch = k.max(self.config.k_fetch_min).min(self.config.optimizer.candidate_ceiling);
        let fetch_started = Instant::now();
        let raw_hits = retriever.retrieve(kind, user_id, query, k_fetch, filter.as_ref(), FusionMethod::ReciprocalRank).await?;
        let fetch_latency_ms = fetch_started.elapsed().as_millis() as u64;

        if raw_hits.is_empty() {
            return Ok(RetrievalResult { hits: Vec::new(), stats: None, cache_hit: false, cache_hit_kind: CacheHitKind::None, optimizer_skipped: false });
        }

        // §5 backpressure ladder: once the store/cache round trip alone
        // has eaten the configured budget, skip the optimizer entirely
        // and hand back the fused-but-unoptimized hits rather than pile
        // optimizer latency on top of an already-slow fetch.
        if fetch_latency_ms >= self.config.backpressure_latency_ms {
            self.metrics.optimizer_dropped.with_label_values(&["backpressure"]).inc();
            let mut hits = raw_hits;
            hits.truncate(k);
            let cacheable: Vec<CachedHit> = hits.iter().map(CachedHit::from_hit).collect();
            if let Ok(value) = serde_json::to_value(&cacheable) {
                self.cache.put(Namespace::Query, user_id, Some(&fp), value, query_embedding);
            }
            return Ok(RetrievalResult { hits, stats: None, cache_hit: false, cache_hit_kind: CacheHitKind::None, optimizer_skipped: true });
        }

        let candidates: Vec<OptimizerCandidate> = raw_hits
            .iter()
            .map(|h| {
                let source_id = h.doc.fields.get("source_id").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| h.doc.id.to_string());
                OptimizerCandidate::new(h.doc.id, source_id, h.doc.text.clone(), h.doc.embedding.clone(), h.fused_score)
            })
            .collect();

        let optimized = self.optimizer(profile).optimize(query, candidates);
        let kept_ids: std::collections::HashSet<Uuid> = optimized.candidates.iter().map(|c| c.id).collect();
        let mut hits: Vec<RetrievalHit> = raw_hits.into_iter().filter(|h| kept_ids.contains(&h.doc.id)).collect();
        hits.truncate(k);

        let cacheable: Vec<CachedHit> = hits.iter().map(CachedHit::from_hit).collect();
        if let Ok(value) = serde_json::to_value(&cacheable) {
            self.cache.put(Namespace::Query, user_id, Some(&fp), value, query_embedding);
        }

        Ok(RetrievalResult { hits, stats: Some(optimized.stats), cache_hit: false, cache_hit_kind: CacheHitKind::None, optimizer_skipped: false })
    }

    /// §4.H: persona + top semantic hits + top episodic hits, merged into
    /// one optimizer-trimmed context object. Recent raw messages are out
    /// of scope here — they live in the conversation log (§4.E), not the
    /// cache, and the caller composing a chat prompt pulls them directly.
    pub async fn get_context(&self, user_id: &str, query: Option<&str>, k: usize) -> Result<Context> {
        let persona_record = self.store.get(RecordKind::Persona, Uuid::new_v5(&Uuid::NAMESPACE_OID, user_id.as_bytes()))?;
        let persona = persona_record.map(|r| r.text);

        let query_text = query.unwrap_or("").to_string();
        if query_text.is_empty() {
            return Ok(Context { persona, knowledge_hits: Vec::new(), episodic_hits: Vec::new(), truncated: false });
        }

        let intent = self.query_classifier.classify(&query_text);
        let knowledge = self.retrieve_kind(RecordKind::Knowledge, user_id, &query_text, None, k, None).await?;
        let episodic = if intent.suggested_sources.contains(&RecordKind::Episode) || intent.suggested_sources.contains(&RecordKind::Instance) {
            self.retrieve_kind(RecordKind::Episode, user_id, &query_text, None, k, None).await?
        } else {
            RetrievalResult { hits: Vec::new(), stats: None, cache_hit: false, cache_hit_kind: CacheHitKind::None, optimizer_skipped: false }
        };

        let truncated = knowledge.optimizer_skipped || episodic.optimizer_skipped;
        Ok(Context { persona, knowledge_hits: knowledge.hits, episodic_hits: episodic.hits, truncated })
    }

    pub async fn search_by_time_window(&self, user_id: &str, query: &str, window: Duration, k: usize) -> Result<RetrievalResult> {
        let expr = FilterExpr::leaf("created_at", Op::TimeWindow(window));
        let filter = compile(expr, &field_registry())?;
        self.retrieve(user_id, query, Some(filter), k, None).await
    }

    pub async fn search_by_category(&self, user_id: &str, query: &str, category: &str, k: usize) -> Result<RetrievalResult> {
        let expr = FilterExpr::leaf("category", Op::Eq(FilterValue::String(category.to_string())));
        let filter = compile(expr, &field_registry())?;
        self.retrieve(user_id, query, Some(filter), k, None).await
    }

    pub async fn search_by_tags(&self, user_id: &str, query: &str, tags: &[String], k: usize) -> Result<RetrievalResult> {
        let values = tags.iter().map(|t| FilterValue::String(t.clone())).collect();
        let expr = FilterExpr::leaf("tags", Op::AnyOf(values));
        let filter = compile(expr, &field_registry())?;
        self.retrieve(user_id, query, Some(filter), k, None).await
    }

    pub async fn search_important_items(&self, user_id: &str, query: &str, min_importance: f32, k: usize) -> Result<RetrievalResult> {
        let expr = FilterExpr::leaf("importance", Op::Gte(FilterValue::Number(min_importance as f64)));
        let filter = compile(expr, &field_registry())?;
        self.retrieve(user_id, query, Some(filter), k, None).await
    }

    pub async fn search_with_metadata(&self, user_id: &str, query: &str, filter: CompiledFilter, k: usize) -> Result<RetrievalResult> {
        self.retrieve(user_id, query, Some(filter), k, None).await
    }
}

/// A `RetrievalHit` minus its embedding, for cache serialization —
/// embeddings are large and re-fetchable from the store by id.
#[derive(serde::Serialize, serde::Deserialize)]
struct CachedHit {
    doc_id: Uuid,
    text: String,
    fields: serde_json::Value,
    importance: f32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    kind: RecordKind,
    vector_score: f32,
    lex_score: f32,
    fused_score: f32,
}

impl CachedHit {
    fn from_hit(hit: &RetrievalHit) -> Self {
        Self {
            doc_id: hit.doc.id,
            text: hit.doc.text.clone(),
            fields: hit.doc.fields.clone(),
            importance: hit.doc.importance,
            created_at: hit.doc.created_at,
            updated_at: hit.doc.updated_at,
            kind: hit.doc.kind,
            vector_score: hit.vector_score,
            lex_score: hit.lex_score,
            fused_score: hit.fused_score,
        }
    }

    fn into_hit(self) -> RetrievalHit {
        RetrievalHit {
            doc: StoredRecord {
                id: self.doc_id,
                user_id: String::new(),
                kind: self.kind,
                embedding: Vec::new(),
                text: self.text,
                fields: self.fields,
                importance: self.importance,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            vector_score: self.vector_score,
            lex_score: self.lex_score,
            fused_score: self.fused_score,
            reasons: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use crate::embedding::hash::HashEmbedder;
    use crate::store::memory::MemoryStore;

    fn facade() -> MemoryFacade {
        facade_with_config(Config::default())
    }

    fn facade_with_config(config: Config) -> MemoryFacade {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(HashEmbedder::new(16));
        let cache = Arc::new(SemanticCache::new(Arc::new(InMemoryCache::new(10)), config.clone()));
        MemoryFacade::new(store, embedder, cache, config, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn ingest_then_retrieve_round_trips() {
        let facade = facade();
        let outcome = facade.ingest_memory("u1", "Rust's ownership model prevents data races.", None).await.unwrap();
        assert_eq!(outcome.classification.layer, IngestLayer::Knowledge);
        assert_eq!(outcome.written_ids.len(), 1);

        let result = facade.retrieve("u1", "rust ownership", None, 5, None).await.unwrap();
        assert!(!result.hits.is_empty());
        assert!(!result.cache_hit);
    }

    #[tokio::test]
    async fn second_identical_query_hits_cache() {
        let facade = facade();
        facade.ingest_memory("u1", "Rust's ownership model prevents data races.", None).await.unwrap();
        facade.retrieve("u1", "rust ownership", None, 5, None).await.unwrap();
        let second = facade.retrieve("u1", "rust ownership", None, 5, None).await.unwrap();
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn persona_statement_is_classified_and_not_retrieved_as_knowledge() {
        let facade = facade();
        let outcome = facade.ingest_memory("u1", "I am a backend engineer who loves Rust.", None).await.unwrap();
        assert_eq!(outcome.classification.layer, IngestLayer::Persona);
        assert!(outcome.written_ids.is_empty());

        let context = facade.get_context("u1", Some("what do you know about me"), 5).await.unwrap();
        assert!(context.persona.is_some());
    }

    #[tokio::test]
    async fn search_by_category_filters_out_other_categories() {
        let facade = facade();
        facade.ingest_memory("u1", "I can write idiomatic Rust generics.", None).await.unwrap();
        facade.ingest_memory("u1", "The borrow checker enforces aliasing rules.", None).await.unwrap();

        let result = facade.search_by_category("u1", "rust", "skill", 5).await.unwrap();
        assert!(result.hits.iter().all(|h| h.doc.fields.get("category").and_then(|v| v.as_str()) == Some("skill")));
    }

    #[tokio::test]
    async fn different_filters_over_same_query_text_do_not_share_a_cache_entry() {
        let facade = facade();
        facade.ingest_memory("u1", "I can write idiomatic Rust generics.", None).await.unwrap();
        facade.ingest_memory("u1", "The borrow checker enforces aliasing rules.", None).await.unwrap();

        let skill_only = facade.search_by_category("u1", "rust", "skill", 5).await.unwrap();
        let knowledge_only = facade.search_by_category("u1", "rust", "knowledge", 5).await.unwrap();

        assert!(skill_only.hits.iter().all(|h| h.doc.fields.get("category").and_then(|v| v.as_str()) == Some("skill")));
        assert!(knowledge_only.hits.iter().all(|h| h.doc.fields.get("category").and_then(|v| v.as_str()) == Some("knowledge")));
    }

    #[tokio::test]
    async fn backpressure_skips_optimizer_when_fetch_is_slow() {
        let mut config = Config::default();
        config.backpressure_latency_ms = 0;
        let facade = facade_with_config(config);
        facade.ingest_memory("u1", "Rust's ownership model prevents data races.", None).await.unwrap();

        let result = facade.retrieve("u1", "rust ownership", None, 5, None).await.unwrap();
        assert!(result.optimizer_skipped);
        assert!(result.stats.is_none());
    }

    #[tokio::test]
    async fn deadline_expiry_returns_truncated_partial_result() {
        let facade = facade();
        let result = facade
            .with_deadline(Duration::from_nanos(1), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(RetrievalResult { hits: vec![], stats: None, cache_hit: false, cache_hit_kind: CacheHitKind::None, optimizer_skipped: false })
            })
            .await
            .unwrap();
        assert!(result.hits.is_empty());
        assert!(result.optimizer_skipped);
    }

    #[tokio::test]
    async fn deadline_expiry_on_ingest_reports_no_write() {
        let facade = facade();
        let outcome = facade
            .with_deadline(Duration::from_nanos(1), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                facade.ingest_memory("u1", "never persisted", None).await
            })
            .await
            .unwrap();
        assert!(outcome.written_ids.is_empty());
        assert_eq!(outcome.classification.category, "timed_out");
    }

    #[tokio::test]
    async fn deadline_within_budget_passes_through() {
        let facade = facade();
        let outcome = facade
            .with_deadline(Duration::from_secs(5), facade.ingest_memory("u1", "The borrow checker enforces aliasing rules.", None))
            .await
            .unwrap();
        assert_eq!(outcome.classification.layer, IngestLayer::Knowledge);
    }
}
