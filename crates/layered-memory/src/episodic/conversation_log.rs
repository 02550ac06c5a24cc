//! Where raw turns live before they're grouped into episodes. Not part
//! of the [`crate::store::VectorStore`] contract — messages aren't
//! embedded or retrieved individually, only the episodes built from
//! them are — so this gets its own small trait, grounded on the
//! teacher's `MemoryStore` (a session-keyed `DashMap` behind a trait).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::message::{ChatMessage, Conversation, ConversationKind};
use crate::error::Result;
use crate::store::{StoredRecord, VectorStore};

pub trait ConversationLog: Send + Sync {
    fn put_conversation(&self, conversation: Conversation);
    fn append_message(&self, message: ChatMessage);
    fn conversation(&self, conversation_id: Uuid) -> Option<Conversation>;
    fn conversation_kind(&self, conversation_id: Uuid) -> Option<ConversationKind>;

    /// Conversations for a user with at least one message where
    /// `episodized = false`.
    fn pending_conversations(&self, user_id: &str) -> Vec<Uuid>;

    /// Un-episodized messages for a conversation, ordered by `created_at`.
    fn pending_messages(&self, conversation_id: Uuid) -> Vec<ChatMessage>;

    fn mark_episodized(&self, conversation_id: Uuid, message_ids: &[Uuid], at: DateTime<Utc>);

    /// Persists `episode` through `store` and flags `message_ids` as
    /// episodized as one unit (§4.E): a crash between the two must never
    /// leave an episode written but its source messages still pending
    /// (re-episodizing them), or the flags flipped with no episode to
    /// show for it.
    ///
    /// This default runs the steps sequentially, which is all the
    /// in-memory backend can offer — it has nothing durable to lose on a
    /// crash between them, so the gap is harmless there.
    /// [`crate::episodic::sqlite_log::SqliteConversationLog`] overrides
    /// this to commit both sides inside one physical SQLite transaction
    /// when `store` is a [`crate::store::sqlite::SqliteStore`] sharing
    /// its connection pool.
    fn commit_episode(
        &self,
        store: &dyn VectorStore,
        episode: StoredRecord,
        conversation_id: Uuid,
        message_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<()> {
        store.transaction(&mut |txn| txn.put(episode.clone()))?;
        self.mark_episodized(conversation_id, message_ids, at);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConversationLog {
    conversations: DashMap<Uuid, Conversation>,
    messages: DashMap<Uuid, Vec<ChatMessage>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationLog for InMemoryConversationLog {
    fn put_conversation(&self, conversation: Conversation) {
        self.conversations.insert(conversation.id, conversation);
    }

    fn append_message(&self, message: ChatMessage) {
        self.messages.entry(message.conversation_id).or_default().push(message);
    }

    fn conversation(&self, conversation_id: Uuid) -> Option<Conversation> {
        self.conversations.get(&conversation_id).map(|c| c.clone())
    }

    fn conversation_kind(&self, conversation_id: Uuid) -> Option<ConversationKind> {
        self.conversations.get(&conversation_id).map(|c| c.kind)
    }

    fn pending_conversations(&self, user_id: &str) -> Vec<Uuid> {
        self.messages
            .iter()
            .filter(|entry| entry.value().iter().any(|m| !m.episodized))
            .map(|entry| *entry.key())
            .filter(|id| self.conversations.get(id).map(|c| c.user_id == user_id).unwrap_or(false))
            .collect()
    }

    fn pending_messages(&self, conversation_id: Uuid) -> Vec<ChatMessage> {
        let mut pending: Vec<ChatMessage> = self
            .messages
            .get(&conversation_id)
            .map(|m| m.iter().filter(|m| !m.episodized).cloned().collect())
            .unwrap_or_default();
        pending.sort_by_key(|m| m.created_at);
        pending
    }

    fn mark_episodized(&self, conversation_id: Uuid, message_ids: &[Uuid], at: DateTime<Utc>) {
        if let Some(mut entry) = self.messages.get_mut(&conversation_id) {
            for m in entry.iter_mut() {
                if message_ids.contains(&m.id) {
                    m.mark_episodized(at);
                }
            }
        }
    }
}

pub type SharedConversationLog = Arc<dyn ConversationLog>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Role;

    fn msg(conv: Uuid) -> ChatMessage {
        ChatMessage::new(conv, Role::User, "hi")
    }

    #[test]
    fn pending_messages_excludes_already_episodized() {
        let log = InMemoryConversationLog::new();
        let conv = Uuid::new_v4();
        log.put_conversation(Conversation::new_super_chat("u1"));
        let m1 = msg(conv);
        let id1 = m1.id;
        log.append_message(m1);
        log.append_message(msg(conv));

        log.mark_episodized(conv, &[id1], Utc::now());
        let pending = log.pending_messages(conv);
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].id, id1);
    }

    #[test]
    fn pending_conversations_scoped_to_user() {
        let log = InMemoryConversationLog::new();
        let c1 = Conversation::new_super_chat("u1");
        let c2 = Conversation::new_super_chat("u2");
        let (id1, id2) = (c1.id, c2.id);
        log.put_conversation(c1);
        log.put_conversation(c2);
        log.append_message(msg(id1));
        log.append_message(msg(id2));

        let pending = log.pending_conversations("u1");
        assert_eq!(pending, vec![id1]);
    }
}
