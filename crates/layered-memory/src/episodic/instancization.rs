//! Instancization (§4.E): moves Episodes past the retention window into
//! Instances, and separately flags Instances past the compression window
//! as compression candidates. The compression transformation itself is
//! pluggable and out of scope; this job only ever sets the flag.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value as Json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::store::{RecordKind, StoredRecord, VectorStore};

use super::conversation_log::SharedConversationLog;

#[derive(Debug, Default, Clone, Copy)]
pub struct InstancizationReport {
    pub instancized: usize,
    pub compression_candidates_marked: usize,
    pub orphans_logged: usize,
}

pub struct InstancizationJob {
    log: SharedConversationLog,
    store: Arc<dyn VectorStore>,
    config: Config,
    metrics: Arc<Metrics>,
}

impl InstancizationJob {
    pub fn new(log: SharedConversationLog, store: Arc<dyn VectorStore>, config: Config, metrics: Arc<Metrics>) -> Self {
        Self { log, store, config, metrics }
    }

    /// Runs one pass for a single user; the construction root enumerates
    /// users and schedules this daily, same as [`super::episodization::EpisodizationJob`].
    pub fn run_for_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<InstancizationReport> {
        let mut report = InstancizationReport::default();
        let retention_cutoff = now - ChronoDuration::days(self.config.episodic_retention_days);
        let compress_cutoff = now - ChronoDuration::days(self.config.episodic_compress_after_days);

        let episodes = self.store.scan(RecordKind::Episode, user_id, None, usize::MAX)?;
        for episode in episodes {
            if episode.created_at > retention_cutoff {
                continue;
            }
            let source_id = episode.fields.get("source_id").and_then(Json::as_str).and_then(|s| Uuid::parse_str(s).ok());
            if let Some(source_id) = source_id {
                if self.log.conversation(source_id).is_none() {
                    report.orphans_logged += 1;
                    warn!(episode_id = %episode.id, %source_id, "orphan episode: source conversation no longer exists");
                    continue;
                }
            }

            match self.instancize_one(user_id, episode, now) {
                Ok(()) => {
                    report.instancized += 1;
                    self.metrics.episodic_runs.with_label_values(&["instancization", "success"]).inc();
                }
                Err(e) => {
                    self.metrics.episodic_runs.with_label_values(&["instancization", "failure"]).inc();
                    warn!(error = %e, "instancization commit failed, will retry next run");
                }
            }
        }

        let instances = self.store.scan(RecordKind::Instance, user_id, None, usize::MAX)?;
        for instance in instances {
            if instance.created_at > compress_cutoff {
                continue;
            }
            if instance.fields.get("compression_candidate").and_then(Json::as_bool).unwrap_or(false) {
                continue;
            }
            if self.mark_compression_candidate(instance).is_ok() {
                report.compression_candidates_marked += 1;
            }
        }

        info!(
            user_id,
            instancized = report.instancized,
            compression_candidates = report.compression_candidates_marked,
            orphans = report.orphans_logged,
            "instancization pass complete"
        );
        Ok(report)
    }

    fn instancize_one(&self, user_id: &str, episode: StoredRecord, now: DateTime<Utc>) -> Result<()> {
        let instance_id = Uuid::new_v4();
        let mut fields = episode.fields.clone();
        if let Some(obj) = fields.as_object_mut() {
            obj.insert("original_episode_id".to_string(), json!(episode.id));
            obj.insert("instancized_at".to_string(), json!(now));
            obj.insert("compressed".to_string(), json!(false));
            obj.insert("compression_candidate".to_string(), json!(false));
        }

        let instance = StoredRecord {
            id: instance_id,
            user_id: user_id.to_string(),
            kind: RecordKind::Instance,
            embedding: episode.embedding,
            text: episode.text,
            fields,
            importance: episode.importance,
            created_at: episode.created_at,
            updated_at: now,
        };

        self.store.transaction(&mut |txn| {
            txn.put(instance.clone())?;
            txn.delete(RecordKind::Episode, episode.id)
        })
    }

    fn mark_compression_candidate(&self, mut instance: StoredRecord) -> Result<()> {
        if let Some(obj) = instance.fields.as_object_mut() {
            obj.insert("compression_candidate".to_string(), json!(true));
        }
        instance.updated_at = Utc::now();
        self.store.update(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{hash::HashEmbedder, Embedder};
    use crate::episodic::conversation_log::InMemoryConversationLog;
    use crate::store::memory::MemoryStore;
    use tokio::runtime::Runtime;

    fn episode_record(user: &str, source_id: Uuid, created_at: DateTime<Utc>) -> StoredRecord {
        StoredRecord {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            kind: RecordKind::Episode,
            embedding: vec![0.0; 8],
            text: "hello".to_string(),
            fields: json!({"source_id": source_id.to_string(), "compressed": false}),
            importance: 0.5,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn moves_old_episode_into_instance() {
        let store = Arc::new(MemoryStore::new());
        let log: SharedConversationLog = Arc::new(InMemoryConversationLog::new());
        let conv = crate::domain::message::Conversation::new_super_chat("u1");
        let conv_id = conv.id;
        log.put_conversation(conv);

        let now = Utc::now();
        let old = episode_record("u1", conv_id, now - ChronoDuration::days(40));
        let old_id = old.id;
        store.put(old).unwrap();

        let job = InstancizationJob::new(log, store.clone(), Config::default(), Arc::new(Metrics::new()));
        let report = job.run_for_user("u1", now).unwrap();

        assert_eq!(report.instancized, 1);
        assert!(store.get(RecordKind::Episode, old_id).unwrap().is_none());
        let instances = store.scan(RecordKind::Instance, "u1", None, 10).unwrap();
        assert_eq!(instances.len(), 1);
    }

    #[test]
    fn recent_episode_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let log: SharedConversationLog = Arc::new(InMemoryConversationLog::new());
        let conv = crate::domain::message::Conversation::new_super_chat("u1");
        let conv_id = conv.id;
        log.put_conversation(conv);

        let now = Utc::now();
        let recent = episode_record("u1", conv_id, now - ChronoDuration::days(1));
        store.put(recent).unwrap();

        let job = InstancizationJob::new(log, store.clone(), Config::default(), Arc::new(Metrics::new()));
        let report = job.run_for_user("u1", now).unwrap();

        assert_eq!(report.instancized, 0);
        assert_eq!(store.scan(RecordKind::Episode, "u1", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn orphan_episode_is_logged_not_deleted() {
        let store = Arc::new(MemoryStore::new());
        let log: SharedConversationLog = Arc::new(InMemoryConversationLog::new());

        let now = Utc::now();
        let orphan = episode_record("u1", Uuid::new_v4(), now - ChronoDuration::days(40));
        store.put(orphan).unwrap();

        let job = InstancizationJob::new(log, store.clone(), Config::default(), Arc::new(Metrics::new()));
        let report = job.run_for_user("u1", now).unwrap();

        assert_eq!(report.orphans_logged, 1);
        assert_eq!(report.instancized, 0);
        assert_eq!(store.scan(RecordKind::Episode, "u1", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn old_instance_gets_marked_as_compression_candidate() {
        let store = Arc::new(MemoryStore::new());
        let log: SharedConversationLog = Arc::new(InMemoryConversationLog::new());
        let now = Utc::now();

        let embedder = HashEmbedder::new(8);
        let embedding = Runtime::new().unwrap().block_on(embedder.embed("hi")).unwrap();
        let instance = StoredRecord {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            kind: RecordKind::Instance,
            embedding,
            text: "hi".to_string(),
            fields: json!({"compression_candidate": false}),
            importance: 0.5,
            created_at: now - ChronoDuration::days(100),
            updated_at: now - ChronoDuration::days(100),
        };
        store.put(instance).unwrap();

        let job = InstancizationJob::new(log, store.clone(), Config::default(), Arc::new(Metrics::new()));
        let report = job.run_for_user("u1", now).unwrap();

        assert_eq!(report.compression_candidates_marked, 1);
    }
}
