//! SQLite-backed [`VectorStore`]: rows in a single `records` table, an
//! FTS5 shadow table for lexical search, and one in-memory HNSW index per
//! [`RecordKind`] for ANN, with a linear-scan fallback while the index
//! is cold.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use regex::RegexBuilder;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

use super::{RecordKind, ScoredId, StoreTxn, StoredRecord, VectorStore};
use crate::error::{MemoryError, Result};
use crate::filter::{evaluate, to_sql, CompiledFilter};

pub(crate) fn store_error(context: &str, err: impl std::fmt::Display) -> MemoryError {
    MemoryError::internal(anyhow::anyhow!("{context}: {err}"))
}

/// Registers the `regexp` scalar function SQLite needs to evaluate the
/// `X REGEXP Y` operator the Filter Algebra's SQL compiler emits for
/// [`crate::filter::Op::Regex`]. Run once per pooled connection.
///
/// `to_sql` discards `Op::Regex`'s `case_sensitive` flag (the column's
/// JSON-extracted text has no case-collation concept to lean on), so this
/// always matches case-insensitively — a superset of a case-sensitive
/// match and therefore still a valid pre-filter; `lex`/`scan` run
/// [`evaluate`] afterward as the precise, case-correct pass.
fn init_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: String = ctx.get(0)?;
            let text: String = ctx.get(1)?;
            let matched = RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map(|re| re.is_match(&text))
                .unwrap_or(false);
            Ok(matched)
        },
    )?;
    Ok(())
}

/// An HNSW index plus the positional mapping back to record ids: hora's
/// index keys are `i64`, so each add assigns the next slot in `ids` as
/// that record's key.
struct AnnIndex {
    index: HNSWIndex<f32, i64>,
    ids: Vec<Uuid>,
}

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    dim: usize,
    ann_indexes: RwLock<HashMap<RecordKind, AnnIndex>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, dim: usize) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(init_connection);
        let pool = Pool::new(manager).map_err(|e| store_error("building connection pool", e))?;
        let store = Self { pool, dim, ann_indexes: RwLock::new(HashMap::new()) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory(dim: usize) -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| store_error("building in-memory pool", e))?;
        let store = Self { pool, dim, ann_indexes: RwLock::new(HashMap::new()) };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| MemoryError::transient(format!("connection pool exhausted: {e}")))
    }

    /// The same pooled connection manager backing this store's `records`
    /// table, for a collaborator (e.g. [`crate::episodic::sqlite_log::SqliteConversationLog`])
    /// that needs to commit a write against both the records table and
    /// its own tables within one physical SQLite transaction (§4.E).
    pub fn pool(&self) -> Pool<SqliteConnectionManager> {
        self.pool.clone()
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                embedding BLOB NOT NULL,
                text TEXT NOT NULL,
                fields TEXT NOT NULL,
                importance REAL NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
                id UNINDEXED,
                text,
                tokenize = 'porter unicode61'
            );

            CREATE INDEX IF NOT EXISTS idx_records_kind_user ON records(kind, user_id);
            CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at DESC);
            "#,
        )
        .map_err(|e| store_error("initializing schema", e))?;
        Ok(())
    }

    /// Shared with [`crate::episodic::sqlite_log::SqliteConversationLog`]
    /// so an episode row can be written inside that module's own
    /// transaction against the same physical connection (§4.E).
    pub(crate) fn write_row(conn: &rusqlite::Connection, record: &StoredRecord) -> Result<()> {
        let embedding_bytes = bincode::serialize(&record.embedding).map_err(|e| store_error("encoding embedding", e))?;
        let fields_json = record.fields.to_string();
        conn.execute(
            "INSERT OR REPLACE INTO records
             (id, user_id, kind, embedding, text, fields, importance, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.user_id,
                record.kind.as_str(),
                embedding_bytes,
                record.text,
                fields_json,
                record.importance,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| store_error("writing record", e))?;

        conn.execute("DELETE FROM records_fts WHERE id = ?1", params![record.id.to_string()])
            .map_err(|e| store_error("clearing fts row", e))?;
        conn.execute(
            "INSERT INTO records_fts (id, text) VALUES (?1, ?2)",
            params![record.id.to_string(), record.text],
        )
        .map_err(|e| store_error("writing fts row", e))?;
        Ok(())
    }

    fn delete_row(conn: &rusqlite::Connection, id: Uuid) -> Result<()> {
        conn.execute("DELETE FROM records WHERE id = ?1", params![id.to_string()])
            .map_err(|e| store_error("deleting record", e))?;
        conn.execute("DELETE FROM records_fts WHERE id = ?1", params![id.to_string()])
            .map_err(|e| store_error("deleting fts row", e))?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StoredRecord> {
        let id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let embedding_bytes: Vec<u8> = row.get(3)?;
        let text: String = row.get(4)?;
        let fields_json: String = row.get(5)?;
        let importance: f32 = row.get(6)?;
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;

        let embedding: Vec<f32> = bincode::deserialize(&embedding_bytes)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let fields: serde_json::Value = serde_json::from_str(&fields_json).unwrap_or(serde_json::Value::Null);

        Ok(StoredRecord {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            user_id,
            kind: parse_kind(&kind),
            embedding,
            text,
            fields,
            importance,
            created_at: parse_rfc3339(&created_at),
            updated_at: parse_rfc3339(&updated_at),
        })
    }

    /// Rebuilds the in-memory HNSW index for one kind from durable storage.
    /// Cheap enough to call after any bulk write; callers needing lower
    /// latency should batch writes and rebuild once.
    pub fn rebuild_ann_index(&self, kind: RecordKind) -> Result<()> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, embedding FROM records WHERE kind = ?1")
            .map_err(|e| store_error("preparing index rebuild query", e))?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| {
                let id: String = row.get(0)?;
                let embedding_bytes: Vec<u8> = row.get(1)?;
                Ok((id, embedding_bytes))
            })
            .map_err(|e| store_error("querying embeddings", e))?;

        let hnsw_params = HNSWParams::<f32> { n_neighbor: 16, ef_build: 100, ef_search: 50, ..Default::default() };
        let mut index = HNSWIndex::<f32, i64>::new(self.dim, &hnsw_params);
        let mut ids = Vec::new();
        for row in rows {
            let (id, embedding_bytes) = row.map_err(|e| store_error("reading embedding row", e))?;
            let Ok(id) = Uuid::parse_str(&id) else { continue };
            let Ok(embedding) = bincode::deserialize::<Vec<f32>>(&embedding_bytes) else { continue };
            if embedding.len() != self.dim {
                continue;
            }
            let slot = ids.len() as i64;
            let _ = index.add(&embedding, slot);
            ids.push(id);
        }
        let count = ids.len();
        if count > 0 {
            index
                .build(Metric::CosineSimilarity)
                .map_err(|e| store_error("building ann index", e))?;
            self.ann_indexes.write().unwrap().insert(kind, AnnIndex { index, ids });
        } else {
            self.ann_indexes.write().unwrap().remove(&kind);
        }
        info!(kind = kind.as_str(), count, "rebuilt ANN index");
        Ok(())
    }

    fn ann_linear(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&CompiledFilter>,
    ) -> Result<Vec<ScoredId>> {
        let candidates = self.scan(kind, user_id, filter, usize::MAX)?;
        let mut scored: Vec<ScoredId> = candidates
            .iter()
            .map(|r| ScoredId { id: r.id, score: cosine_similarity(query_embedding, &r.embedding) })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
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

fn parse_kind(s: &str) -> RecordKind {
    match s {
        "persona" => RecordKind::Persona,
        "knowledge" => RecordKind::Knowledge,
        "episode" => RecordKind::Episode,
        _ => RecordKind::Instance,
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .map(|w| format!("{w}*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl VectorStore for SqliteStore {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn put(&self, record: StoredRecord) -> Result<()> {
        let conn = self.conn()?;
        Self::write_row(&conn, &record)
    }

    fn update(&self, record: StoredRecord) -> Result<()> {
        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM records WHERE id = ?1", params![record.id.to_string()], |r| r.get(0))
            .optional()
            .map_err(|e| store_error("checking existence", e))?;
        if exists.is_none() {
            return Err(MemoryError::NotFound(format!("{}/{}", record.kind.as_str(), record.id)));
        }
        Self::write_row(&conn, &record)
    }

    fn delete(&self, kind: RecordKind, id: Uuid) -> Result<()> {
        let _ = kind;
        let conn = self.conn()?;
        Self::delete_row(&conn, id)
    }

    fn get(&self, kind: RecordKind, id: Uuid) -> Result<Option<StoredRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, user_id, kind, embedding, text, fields, importance, created_at, updated_at
             FROM records WHERE id = ?1 AND kind = ?2",
            params![id.to_string(), kind.as_str()],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| store_error("fetching record", e))
    }

    fn ann(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&CompiledFilter>,
    ) -> Result<Vec<ScoredId>> {
        let index_guard = self.ann_indexes.read().unwrap();
        let Some(entry) = index_guard.get(&kind) else {
            drop(index_guard);
            warn!(kind = kind.as_str(), "ANN index not built, falling back to linear scan");
            return self.ann_linear(kind, user_id, query_embedding, k, filter);
        };
        // Over-fetch from the index, then apply the filter and user scope
        // post-hoc since hora has no concept of a predicate pushdown.
        let slots = entry.index.search(query_embedding, k.saturating_mul(4).max(k + 16));
        let neighbor_ids: Vec<Uuid> = slots.into_iter().filter_map(|slot| entry.ids.get(slot as usize).copied()).collect();
        drop(index_guard);

        let fetched = self.fetch(kind, &neighbor_ids)?;
        let mut scored: Vec<ScoredId> = fetched
            .into_iter()
            .filter(|r| r.user_id == user_id && filter.map(|f| evaluate(f, &r.fields)).unwrap_or(true))
            .map(|r| ScoredId { id: r.id, score: cosine_similarity(query_embedding, &r.embedding) })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn lex(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_text: &str,
        k: usize,
        filter: Option<&CompiledFilter>,
    ) -> Result<Vec<ScoredId>> {
        let fts_query = sanitize_fts_query(query_text);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let where_extra = filter.map(to_sql);
        // Every placeholder here is the bare `?` style (never `?N`) so
        // that SQLite's left-to-right auto-numbering lines up with the
        // order values are pushed below, even though the filter clause's
        // own placeholder count varies per query.
        let sql = match &where_extra {
            Some((clause, _)) => format!(
                "SELECT r.id, bm25(records_fts) FROM records r
                 JOIN records_fts fts ON r.id = fts.id
                 WHERE records_fts MATCH ? AND r.kind = ? AND r.user_id = ? AND ({clause})
                 ORDER BY bm25(records_fts) LIMIT ?"
            ),
            None => "SELECT r.id, bm25(records_fts) FROM records r
                 JOIN records_fts fts ON r.id = fts.id
                 WHERE records_fts MATCH ? AND r.kind = ? AND r.user_id = ?
                 ORDER BY bm25(records_fts) LIMIT ?"
                .to_string(),
        };
        let mut stmt = conn.prepare(&sql).map_err(|e| store_error("preparing lexical query", e))?;

        let mut bind_params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(fts_query),
            Box::new(kind.as_str().to_string()),
            Box::new(user_id.to_string()),
        ];
        if let Some((_, values)) = &where_extra {
            for v in values {
                bind_params.push(Box::new(v.clone()));
            }
        }
        bind_params.push(Box::new(k as i64));
        let param_refs: Vec<&dyn rusqlite::ToSql> = bind_params.iter().map(|b| b.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let id: String = row.get(0)?;
                // bm25() is negative-is-better; flip sign so higher is better,
                // matching the ANN score convention used by fusion.
                let bm25: f64 = row.get(1)?;
                Ok((id, -bm25 as f32))
            })
            .map_err(|e| store_error("running lexical query", e))?;

        let mut candidates: Vec<ScoredId> = Vec::new();
        for row in rows {
            let (id, score) = row.map_err(|e| store_error("reading lexical row", e))?;
            if let Ok(id) = Uuid::parse_str(&id) {
                candidates.push(ScoredId { id, score });
            }
        }

        // `where_extra`'s clauses are an over-inclusive pre-filter (see
        // `to_sql`'s own doc comment); `evaluate` is the source of truth,
        // same post-filter pass `ann` already applies. bm25 order from the
        // query above is preserved since filtering only removes entries.
        let out = match filter {
            Some(f) => {
                let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
                let fields_by_id: HashMap<Uuid, serde_json::Value> =
                    self.fetch(kind, &ids)?.into_iter().map(|r| (r.id, r.fields)).collect();
                candidates.into_iter().filter(|c| fields_by_id.get(&c.id).map(|fields| evaluate(f, fields)).unwrap_or(false)).collect()
            }
            None => candidates,
        };
        Ok(out)
    }

    fn scan(
        &self,
        kind: RecordKind,
        user_id: &str,
        filter: Option<&CompiledFilter>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let conn = self.conn()?;
        let (where_clause, values) = filter.map(to_sql).unwrap_or_else(|| ("1".to_string(), Vec::new()));
        // Bare `?` throughout, same reasoning as in `lex`.
        let sql = format!(
            "SELECT id, user_id, kind, embedding, text, fields, importance, created_at, updated_at
             FROM records WHERE kind = ? AND user_id = ? AND ({where_clause})
             ORDER BY created_at DESC LIMIT ?"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| store_error("preparing scan", e))?;

        let mut bind_params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(kind.as_str().to_string()), Box::new(user_id.to_string())];
        for v in &values {
            bind_params.push(Box::new(v.clone()));
        }
        bind_params.push(Box::new(limit.min(i64::MAX as usize) as i64));
        let param_refs: Vec<&dyn rusqlite::ToSql> = bind_params.iter().map(|b| b.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_record)
            .map_err(|e| store_error("running scan", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| store_error("reading scan row", e))?);
        }
        // Same over-inclusive-pre-filter-then-evaluate reconciliation as
        // `ann`/`lex`, so all three store paths agree with the in-memory
        // evaluator bit-for-bit.
        if let Some(f) = filter {
            out.retain(|r| evaluate(f, &r.fields));
        }
        Ok(out)
    }

    fn fetch(&self, kind: RecordKind, ids: &[Uuid]) -> Result<Vec<StoredRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT id, user_id, kind, embedding, text, fields, importance, created_at, updated_at
             FROM records WHERE kind = ? AND id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| store_error("preparing fetch", e))?;
        let mut bind_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(kind.as_str().to_string())];
        for id in ids {
            bind_params.push(Box::new(id.to_string()));
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> = bind_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_record)
            .map_err(|e| store_error("running fetch", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| store_error("reading fetch row", e))?);
        }
        Ok(out)
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn StoreTxn) -> Result<()>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| store_error("opening transaction", e))?;
        let handle = SqliteTxn { conn: &tx };
        match f(&handle) {
            Ok(()) => tx.commit().map_err(|e| store_error("committing transaction", e)),
            Err(e) => {
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}

struct SqliteTxn<'a> {
    conn: &'a rusqlite::Transaction<'a>,
}

impl StoreTxn for SqliteTxn<'_> {
    fn put(&self, record: StoredRecord) -> Result<()> {
        SqliteStore::write_row(self.conn, &record)
    }

    fn delete(&self, kind: RecordKind, id: Uuid) -> Result<()> {
        let _ = kind;
        SqliteStore::delete_row(self.conn, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: RecordKind, user_id: &str, embedding: Vec<f32>, text: &str) -> StoredRecord {
        StoredRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            embedding,
            text: text.to_string(),
            fields: json!({"importance": 0.5}),
            importance: 0.5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let r = record(RecordKind::Knowledge, "u1", vec![1.0, 0.0], "rust ownership model");
        let id = r.id;
        store.put(r).unwrap();
        let fetched = store.get(RecordKind::Knowledge, id).unwrap().unwrap();
        assert_eq!(fetched.text, "rust ownership model");
    }

    #[test]
    fn lexical_search_finds_matching_text() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store.put(record(RecordKind::Knowledge, "u1", vec![0.0, 0.0], "borrow checker and lifetimes")).unwrap();
        store.put(record(RecordKind::Knowledge, "u1", vec![0.0, 0.0], "completely unrelated content")).unwrap();
        let hits = store.lex(RecordKind::Knowledge, "u1", "lifetimes", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn ann_falls_back_to_linear_scan_without_index() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store.put(record(RecordKind::Knowledge, "u1", vec![1.0, 0.0], "a")).unwrap();
        store.put(record(RecordKind::Knowledge, "u1", vec![0.0, 1.0], "b")).unwrap();
        let hits = store.ann(RecordKind::Knowledge, "u1", &[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.9);
    }

    #[test]
    fn rebuild_ann_index_then_search_uses_index() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        store.put(record(RecordKind::Knowledge, "u1", vec![1.0, 0.0], "a")).unwrap();
        store.put(record(RecordKind::Knowledge, "u1", vec![0.0, 1.0], "b")).unwrap();
        store.rebuild_ann_index(RecordKind::Knowledge).unwrap();
        let hits = store.ann(RecordKind::Knowledge, "u1", &[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn update_on_missing_id_is_not_found() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let r = record(RecordKind::Knowledge, "u1", vec![0.0], "x");
        assert!(matches!(store.update(r), Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = SqliteStore::open_in_memory(2).unwrap();
        let existing = record(RecordKind::Episode, "u1", vec![0.0], "seed");
        let existing_id = existing.id;
        store.put(existing).unwrap();

        let result = store.transaction(&mut |txn| {
            txn.delete(RecordKind::Episode, existing_id)?;
            Err(MemoryError::Transient("simulated failure".into()))
        });
        assert!(result.is_err());
        assert!(store.get(RecordKind::Episode, existing_id).unwrap().is_some());
    }
}
