//! A purely in-memory [`VectorStore`], so the rest of the crate (and its
//! tests) can run without a database (§9: "buildable against a purely
//! in-memory stub"). ANN is linear cosine similarity; lexical search is
//! term-overlap scoring. Neither is meant to be fast, only correct.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::{RecordKind, ScoredId, StoreTxn, StoredRecord, VectorStore};
use crate::error::{MemoryError, Result};
use crate::filter::{evaluate, CompiledFilter};

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<RecordKind, HashMap<Uuid, StoredRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RecordKind, HashMap<Uuid, StoredRecord>>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
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

fn term_overlap_score(query: &str, text: &str) -> f32 {
    let q_terms: Vec<String> = query.to_lowercase().split_whitespace().map(String::from).collect();
    if q_terms.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let hits = q_terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f32 / q_terms.len() as f32
}

fn matches(record: &StoredRecord, user_id: &str, filter: Option<&CompiledFilter>) -> bool {
    if record.user_id != user_id {
        return false;
    }
    filter.map(|f| evaluate(f, &record.fields)).unwrap_or(true)
}

impl VectorStore for MemoryStore {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn put(&self, record: StoredRecord) -> Result<()> {
        self.lock().entry(record.kind).or_default().insert(record.id, record);
        Ok(())
    }

    fn update(&self, record: StoredRecord) -> Result<()> {
        let mut guard = self.lock();
        let bucket = guard.entry(record.kind).or_default();
        if !bucket.contains_key(&record.id) {
            return Err(MemoryError::NotFound(format!("{}/{}", record.kind.as_str(), record.id)));
        }
        bucket.insert(record.id, record);
        Ok(())
    }

    fn delete(&self, kind: RecordKind, id: Uuid) -> Result<()> {
        self.lock().entry(kind).or_default().remove(&id);
        Ok(())
    }

    fn get(&self, kind: RecordKind, id: Uuid) -> Result<Option<StoredRecord>> {
        Ok(self.lock().get(&kind).and_then(|b| b.get(&id)).cloned())
    }

    fn ann(
        &self,
        kind: RecordKind,
        user_id: &str,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&CompiledFilter>,
    ) -> Result<Vec<ScoredId>> {
        let guard = self.lock();
        let Some(bucket) = guard.get(&kind) else { return Ok(Vec::new()) };
        let mut scored: Vec<ScoredId> = bucket
            .values()
            .filter(|r| matches(r, user_id, filter))
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
        let guard = self.lock();
        let Some(bucket) = guard.get(&kind) else { return Ok(Vec::new()) };
        let mut scored: Vec<ScoredId> = bucket
            .values()
            .filter(|r| matches(r, user_id, filter))
            .map(|r| ScoredId { id: r.id, score: term_overlap_score(query_text, &r.text) })
            .filter(|s| s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    fn scan(
        &self,
        kind: RecordKind,
        user_id: &str,
        filter: Option<&CompiledFilter>,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        let guard = self.lock();
        let Some(bucket) = guard.get(&kind) else { return Ok(Vec::new()) };
        let mut out: Vec<StoredRecord> = bucket.values().filter(|r| matches(r, user_id, filter)).cloned().collect();
        out.sort_by_key(|r| r.created_at);
        out.truncate(limit);
        Ok(out)
    }

    fn fetch(&self, kind: RecordKind, ids: &[Uuid]) -> Result<Vec<StoredRecord>> {
        let guard = self.lock();
        let Some(bucket) = guard.get(&kind) else { return Ok(Vec::new()) };
        Ok(ids.iter().filter_map(|id| bucket.get(id).cloned()).collect())
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn StoreTxn) -> Result<()>) -> Result<()> {
        let snapshot = self.lock().clone();
        let working = std::cell::RefCell::new(snapshot);
        let handle = MemoryTxn { working: &working };
        f(&handle)?;
        *self.lock() = working.into_inner();
        Ok(())
    }
}

struct MemoryTxn<'a> {
    working: &'a std::cell::RefCell<HashMap<RecordKind, HashMap<Uuid, StoredRecord>>>,
}

impl StoreTxn for MemoryTxn<'_> {
    fn put(&self, record: StoredRecord) -> Result<()> {
        self.working.borrow_mut().entry(record.kind).or_default().insert(record.id, record);
        Ok(())
    }

    fn delete(&self, kind: RecordKind, id: Uuid) -> Result<()> {
        self.working.borrow_mut().entry(kind).or_default().remove(&id);
        Ok(())
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
            fields: json!({}),
            importance: 0.5,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let store = MemoryStore::new();
        let r = record(RecordKind::Knowledge, "u1", vec![1.0, 0.0], "rust ownership");
        let id = r.id;
        store.put(r).unwrap();
        assert!(store.get(RecordKind::Knowledge, id).unwrap().is_some());
    }

    #[test]
    fn ann_ranks_by_cosine_similarity() {
        let store = MemoryStore::new();
        store.put(record(RecordKind::Knowledge, "u1", vec![1.0, 0.0], "a")).unwrap();
        store.put(record(RecordKind::Knowledge, "u1", vec![0.0, 1.0], "b")).unwrap();
        let hits = store.ann(RecordKind::Knowledge, "u1", &[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.9);
    }

    #[test]
    fn ann_is_scoped_to_user() {
        let store = MemoryStore::new();
        store.put(record(RecordKind::Knowledge, "u1", vec![1.0, 0.0], "a")).unwrap();
        store.put(record(RecordKind::Knowledge, "u2", vec![1.0, 0.0], "b")).unwrap();
        let hits = store.ann(RecordKind::Knowledge, "u1", &[1.0, 0.0], 10, None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = MemoryStore::new();
        let existing = record(RecordKind::Episode, "u1", vec![0.0], "seed");
        let existing_id = existing.id;
        store.put(existing).unwrap();

        let new_id = Uuid::new_v4();
        let result = store.transaction(&mut |txn| {
            txn.delete(RecordKind::Episode, existing_id)?;
            txn.put(record(RecordKind::Instance, "u1", vec![0.0], "x"))?;
            let _ = new_id;
            Err(MemoryError::Transient("simulated failure".into()))
        });
        assert!(result.is_err());
        assert!(store.get(RecordKind::Episode, existing_id).unwrap().is_some());
    }

    #[test]
    fn transaction_commits_all_ops_on_success() {
        let store = MemoryStore::new();
        let ep = record(RecordKind::Episode, "u1", vec![0.0], "seed");
        let ep_id = ep.id;
        store.put(ep).unwrap();
        let inst = record(RecordKind::Instance, "u1", vec![0.0], "compressed");
        let inst_id = inst.id;

        store
            .transaction(&mut |txn| {
                txn.delete(RecordKind::Episode, ep_id)?;
                txn.put(inst.clone())?;
                Ok(())
            })
            .unwrap();

        assert!(store.get(RecordKind::Episode, ep_id).unwrap().is_none());
        assert!(store.get(RecordKind::Instance, inst_id).unwrap().is_some());
    }
}
