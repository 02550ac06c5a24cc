//! Layered memory engine: persona, knowledge, skill, process and episodic
//! records behind one hybrid retriever, a semantic cache, a context
//! optimizer and a single facade.

pub mod cache;
pub mod classify;
pub mod config;
pub mod domain;
pub mod embedding;
pub mod episodic;
pub mod error;
pub mod facade;
pub mod filter;
pub mod llm;
pub mod metrics;
pub mod optimizer;
pub mod retrieval;
pub mod store;
pub mod telemetry;

pub use cache::semantic::SemanticCache;
pub use classify::{Classifier, IngestClassifier, QueryIntent, RuleBasedClassifier, RuleBasedIngestClassifier};
pub use config::Config;
pub use error::{MemoryError, Result};
pub use facade::{CacheHitKind, Context, MemoryFacade, RetrievalResult, StoreOutcome};
pub use optimizer::{ContextOptimizer, OptimizerCandidate, OptimizerStats};
pub use retrieval::HybridRetriever;
pub use store::{RecordKind, StoredRecord, VectorStore};
