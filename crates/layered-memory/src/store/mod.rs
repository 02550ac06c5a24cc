//! Vector Store contract (§4.A): a single abstraction behind which both
//! semantic and episodic records live, each addressable by ANN, lexical
//! and filtered scan. Concrete implementations live in [`sqlite`] (the
//! durable, HNSW+FTS5-backed store) and [`memory`] (a purely in-memory
//! stub used in tests and buildable without a database).

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::filter::CompiledFilter;

/// Which logical collection a record belongs to. Each kind gets its own
/// ANN index (embedding spaces are not comparable across kinds) but all
/// kinds share the filtered-scan and lexical-search code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Persona,
    Knowledge,
    Episode,
    Instance,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Persona => "persona",
            RecordKind::Knowledge => "knowledge",
            RecordKind::Episode => "episode",
            RecordKind::Instance => "instance",
        }
    }
}

/// The storage-level envelope every domain type is flattened into before
/// hitting the store. `fields` carries the domain payload as JSON so the
/// Filter Algebra's in-memory evaluator and the SQL predicate compiler
/// both operate on the same document shape (§4.C, §8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub user_id: String,
    pub kind: RecordKind,
    pub embedding: Vec<f32>,
    pub text: String,
    pub fields: serde_json::Value,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ANN or lexical hit: the record id plus an un-normalized score in
/// whatever scale that retrieval path produces (cosine similarity for
/// ANN, BM25 for lexical). Fusion normalizes before combining (§4.D).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: Uuid,
    pub score: f32,
}

/// Behind every store op: put/update/delete single records, `ann`/`lex`
/// fetch top-k candidates with an optional pushed-down filter, `scan`
/// walks all records of a kind matching a filter (used by background
/// jobs), and `transaction` gives episodic lifecycle jobs an all-or-
/// nothing commit boundary (§4.A, §4.E).
///
/// Implementations are blocking by design, mirroring the store's
/// underlying (non-async) driver; callers on an async runtime should
/// run them via `spawn_blocking`.
pub trait VectorStore: Send + Sync {
    fn put(&self, record: StoredRecord) -> Result<()>;
    fn update(&self, record: StoredRecord) -> Result<()>;
    fn delete(&self, kind: RecordKind, id: Uuid) -> Result<()>;
    fn get(&self, kind: RecordKind, id: Uuid) -> Result<Option<StoredRecord>>;

    fn ann(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&CompiledFilter>,
    ) -> Result<Vec<ScoredId>>;

    fn lex(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_text: &str,
        k: usize,
        filter: Option<&CompiledFilter>,
    ) -> Result<Vec<ScoredId>>;

    fn scan(
        &self,
        kind: RecordKind,
        user_id: &str,
        filter: Option<&CompiledFilter>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>>;

    fn fetch(&self, kind: RecordKind, ids: &[Uuid]) -> Result<Vec<StoredRecord>>;

    /// Runs `f` against a store handle that either commits every write it
    /// performed or none of them, per the episodic lifecycle's
    /// all-or-nothing commit requirement (§4.E).
    fn transaction(&self, f: &mut dyn FnMut(&dyn StoreTxn) -> Result<()>) -> Result<()>;

    /// Lets a collaborator downcast to a concrete backend when it needs a
    /// capability this trait doesn't expose — e.g.
    /// [`crate::episodic::sqlite_log::SqliteConversationLog`] sharing one
    /// physical SQLite transaction with [`sqlite::SqliteStore`] so an
    /// episode write and its source messages' episodized flag commit or
    /// roll back together (§4.E).
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The write surface exposed inside a [`VectorStore::transaction`]
/// closure. Deliberately narrower than `VectorStore`: episodic jobs only
/// ever insert, move (delete+put) or delete records within a commit.
pub trait StoreTxn {
    fn put(&self, record: StoredRecord) -> Result<()>;
    fn delete(&self, kind: RecordKind, id: Uuid) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_as_str() {
        assert_eq!(RecordKind::Episode.as_str(), "episode");
        assert_eq!(RecordKind::Instance.as_str(), "instance");
    }
}
