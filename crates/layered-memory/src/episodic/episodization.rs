//! Episodization (§4.E): groups a conversation's un-episodized messages
//! into windowed episodes and commits each closed group as one
//! transaction against the store.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::episode::{Episode, SourceKind};
use crate::domain::message::{ChatMessage, ConversationKind};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::store::{RecordKind, StoredRecord, VectorStore};

use super::conversation_log::SharedConversationLog;

/// Per-embedding-call character budget. Long groups are sampled rather
/// than truncated blindly: the head carries the opening context, the
/// tail carries the most recent turns.
const EMBEDDING_CHAR_BUDGET: usize = 8_000;

fn source_kind_of(kind: ConversationKind) -> SourceKind {
    match kind {
        ConversationKind::SuperChat => SourceKind::SuperChat,
        ConversationKind::DeepDive => SourceKind::DeepDive,
    }
}

fn window_and_cap(config: &Config, kind: ConversationKind) -> (ChronoDuration, usize) {
    let window = ChronoDuration::seconds(config.episodic_window_seconds as i64);
    let cap = match kind {
        ConversationKind::SuperChat => config.episodic_super_chat_cap,
        ConversationKind::DeepDive => config.episodic_deep_dive_cap,
    };
    (window, cap)
}

/// Splits ordered messages into closed groups per the window/cap/idle-gap
/// policy. The trailing group is only returned once `now` shows its idle
/// gap has actually elapsed — otherwise it's left for the next run, since
/// more messages may still land in it.
pub fn group_messages(
    messages: &[ChatMessage],
    window: ChronoDuration,
    cap: usize,
    idle_gap: ChronoDuration,
    now: DateTime<Utc>,
) -> Vec<Vec<ChatMessage>> {
    let mut groups: Vec<Vec<ChatMessage>> = Vec::new();
    let mut current: Vec<ChatMessage> = Vec::new();

    for msg in messages {
        if let Some(first) = current.first() {
            let last = current.last().unwrap();
            let idle = msg.created_at - last.created_at;
            let elapsed = msg.created_at - first.created_at;
            if current.len() >= cap || idle > idle_gap || elapsed > window {
                groups.push(std::mem::take(&mut current));
            }
        }
        current.push(msg.clone());
    }

    if let Some(last) = current.last() {
        let closed_by_bound = current.len() >= cap;
        let closed_by_idle = now - last.created_at > idle_gap;
        if closed_by_bound || closed_by_idle {
            groups.push(current);
        }
    }

    groups
}

/// Builds the embedder's input text from a group: the concatenation of
/// `role: content` lines, sampled from head and tail when it would
/// exceed the per-embedding character budget.
fn group_text(messages: &[ChatMessage]) -> String {
    let full: String = messages.iter().map(|m| format!("{:?}: {}\n", m.role, m.content)).collect();
    if full.len() <= EMBEDDING_CHAR_BUDGET {
        return full;
    }
    let half = EMBEDDING_CHAR_BUDGET / 2;
    let head: String = full.chars().take(half).collect();
    let tail: String = full.chars().rev().take(half).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{head}\n...\n{tail}")
}

pub struct EpisodizationJob {
    log: SharedConversationLog,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: Config,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EpisodizationReport {
    pub conversations_scanned: usize,
    pub groups_closed: usize,
    pub messages_episodized: usize,
}

impl EpisodizationJob {
    pub fn new(log: SharedConversationLog, store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, config: Config, metrics: Arc<Metrics>) -> Self {
        Self { log, store, embedder, config, metrics }
    }

    /// Runs one pass for a single user. The construction root is
    /// responsible for enumerating users and invoking this on an
    /// interval loop (§4.E: "no ambient global scheduler").
    pub async fn run_for_user(&self, user_id: &str) -> Result<EpisodizationReport> {
        let now = Utc::now();
        let idle_gap = ChronoDuration::seconds(self.config.episodic_idle_gap_seconds as i64);
        let mut report = EpisodizationReport::default();

        for conversation_id in self.log.pending_conversations(user_id) {
            report.conversations_scanned += 1;
            let Some(kind) = self.log.conversation_kind(conversation_id) else {
                warn!(%conversation_id, "orphan pending messages: conversation no longer exists");
                continue;
            };
            let pending = self.log.pending_messages(conversation_id);
            if pending.is_empty() {
                continue;
            }
            let (window, cap) = window_and_cap(&self.config, kind);
            let groups = group_messages(&pending, window, cap, idle_gap, now);

            for group in groups {
                match self.commit_group(user_id, conversation_id, kind, group).await {
                    Ok(count) => {
                        report.groups_closed += 1;
                        report.messages_episodized += count;
                        self.metrics.episodic_groups_produced.with_label_values(&[source_kind_label(kind)]).inc();
                        self.metrics.episodic_runs.with_label_values(&["episodization", "success"]).inc();
                    }
                    Err(e) => {
                        self.metrics.episodic_runs.with_label_values(&["episodization", "failure"]).inc();
                        warn!(%conversation_id, error = %e, "episodization group commit failed, will retry next run");
                    }
                }
            }
        }

        info!(user_id, conversations = report.conversations_scanned, groups = report.groups_closed, "episodization pass complete");
        Ok(report)
    }

    async fn commit_group(&self, user_id: &str, conversation_id: Uuid, kind: ConversationKind, group: Vec<ChatMessage>) -> Result<usize> {
        let text = group_text(&group);
        let embedding = self.embedder.embed(&text).await?;
        let message_ids: Vec<Uuid> = group.iter().map(|m| m.id).collect();
        let count = group.len();

        let episode = Episode::from_group(user_id, source_kind_of(kind), conversation_id, group, embedding.clone())
            .expect("non-empty group per minimum group size invariant");

        let record = StoredRecord {
            id: episode.id,
            user_id: user_id.to_string(),
            kind: RecordKind::Episode,
            embedding,
            text,
            fields: json!({
                "source_kind": episode.source_kind,
                "source_id": episode.source_id,
                "message_count": episode.message_count,
                "date_from": episode.date_from,
                "date_to": episode.date_to,
                "tags": episode.tags,
                "metadata": episode.metadata,
                "messages": episode.messages,
            }),
            importance: episode.importance,
            created_at: episode.created_at,
            updated_at: episode.created_at,
        };

        let now = Utc::now();
        self.log.commit_episode(self.store.as_ref(), record, conversation_id, &message_ids, now)?;
        Ok(count)
    }
}

fn source_kind_label(kind: ConversationKind) -> &'static str {
    match kind {
        ConversationKind::SuperChat => "super_chat",
        ConversationKind::DeepDive => "deep_dive",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Role;

    fn msg_at(conv: Uuid, offset_secs: i64) -> ChatMessage {
        let mut m = ChatMessage::new(conv, Role::User, "hi");
        m.created_at = Utc::now() + ChronoDuration::seconds(offset_secs);
        m
    }

    #[test]
    fn closes_group_on_cap() {
        let conv = Uuid::new_v4();
        let messages: Vec<ChatMessage> = (0..5).map(|i| msg_at(conv, i * 10)).collect();
        let now = messages.last().unwrap().created_at;
        let groups = group_messages(&messages, ChronoDuration::hours(6), 3, ChronoDuration::seconds(120), now);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn closes_group_on_large_gap() {
        let conv = Uuid::new_v4();
        let mut messages: Vec<ChatMessage> = (0..12).map(|i| msg_at(conv, i * 600)).collect();
        let tail_start = messages.last().unwrap().created_at + ChronoDuration::minutes(30);
        for i in 0..3 {
            let mut m = msg_at(conv, 0);
            m.created_at = tail_start + ChronoDuration::seconds(i * 10);
            messages.push(m);
        }
        let now = messages.last().unwrap().created_at + ChronoDuration::minutes(5);
        let groups = group_messages(&messages, ChronoDuration::hours(6), 50, ChronoDuration::seconds(120), now);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 12);
        assert_eq!(groups[1].len(), 3);
    }

    #[test]
    fn trailing_group_waits_for_idle_gap_to_elapse() {
        let conv = Uuid::new_v4();
        let messages = vec![msg_at(conv, 0)];
        let now = messages[0].created_at + ChronoDuration::seconds(5);
        let groups = group_messages(&messages, ChronoDuration::hours(6), 50, ChronoDuration::seconds(120), now);
        assert!(groups.is_empty());
    }

    #[test]
    fn single_message_group_is_allowed_once_idle() {
        let conv = Uuid::new_v4();
        let messages = vec![msg_at(conv, 0)];
        let now = messages[0].created_at + ChronoDuration::seconds(200);
        let groups = group_messages(&messages, ChronoDuration::hours(6), 50, ChronoDuration::seconds(120), now);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
    }
}
