use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::ChatMessage;
use super::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SuperChat,
    DeepDive,
}

/// A consolidated, frozen run of messages from one conversation (§3).
/// Invariants are enforced at construction: `message_count == len(messages)`
/// and `date_from <= date_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub user_id: String,
    pub source_kind: SourceKind,
    pub source_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub message_count: usize,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub tags: Vec<String>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    /// Builds an episode from a non-empty, chronologically ordered snapshot.
    pub fn from_group(
        user_id: impl Into<String>,
        source_kind: SourceKind,
        source_id: Uuid,
        messages: Vec<ChatMessage>,
        embedding: Vec<f32>,
    ) -> Option<Self> {
        let first = messages.first()?;
        let last = messages.last()?;
        let date_from = first.created_at;
        let date_to = last.created_at;
        Some(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            source_kind,
            source_id,
            message_count: messages.len(),
            messages,
            date_from,
            date_to,
            embedding,
            metadata: Metadata::new(),
            tags: Vec::new(),
            importance: 0.5,
            created_at: Utc::now(),
        })
    }

    pub fn invariants_hold(&self) -> bool {
        self.message_count == self.messages.len() && self.date_from <= self.date_to
    }
}

/// An archived episode past the retention window (§3). An Episode and its
/// Instance never coexist: instancization deletes the Episode row in the
/// same transaction that inserts this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub original_episode_id: Uuid,
    pub user_id: String,
    pub source_kind: SourceKind,
    pub source_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub message_count: usize,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub tags: Vec<String>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub instancized_at: DateTime<Utc>,
    pub compressed: bool,
    pub compressed_blob: Option<Vec<u8>>,
}

impl Instance {
    pub fn from_episode(episode: Episode) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_episode_id: episode.id,
            user_id: episode.user_id,
            source_kind: episode.source_kind,
            source_id: episode.source_id,
            messages: episode.messages,
            message_count: episode.message_count,
            date_from: episode.date_from,
            date_to: episode.date_to,
            embedding: episode.embedding,
            metadata: episode.metadata,
            tags: episode.tags,
            importance: episode.importance,
            created_at: episode.created_at,
            instancized_at: Utc::now(),
            compressed: false,
            compressed_blob: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Role;

    fn msg(conv: Uuid, offset_secs: i64) -> ChatMessage {
        let mut m = ChatMessage::new(conv, Role::User, "hi");
        m.created_at = Utc::now() + chrono::Duration::seconds(offset_secs);
        m
    }

    #[test]
    fn from_group_rejects_empty_input() {
        assert!(Episode::from_group("u1", SourceKind::SuperChat, Uuid::new_v4(), vec![], vec![]).is_none());
    }

    #[test]
    fn from_group_derives_date_bounds() {
        let conv = Uuid::new_v4();
        let messages = vec![msg(conv, 0), msg(conv, 10), msg(conv, 20)];
        let ep = Episode::from_group("u1", SourceKind::SuperChat, conv, messages, vec![0.0]).unwrap();
        assert!(ep.invariants_hold());
        assert_eq!(ep.message_count, 3);
        assert!(ep.date_from <= ep.date_to);
    }

    #[test]
    fn from_episode_carries_payload_and_marks_uncompressed() {
        let conv = Uuid::new_v4();
        let ep = Episode::from_group("u1", SourceKind::DeepDive, conv, vec![msg(conv, 0)], vec![0.1]).unwrap();
        let ep_id = ep.id;
        let inst = Instance::from_episode(ep);
        assert_eq!(inst.original_episode_id, ep_id);
        assert!(!inst.compressed);
    }
}
