use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    SuperChat,
    DeepDive,
}

/// One turn in a conversation. Immutable after write except `episodized`/`episodized_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub episodized: bool,
    pub episodized_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(conversation_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            episodized: false,
            episodized_at: None,
        }
    }

    /// One-way transition; a no-op if already episodized (at-most-once progression).
    pub fn mark_episodized(&mut self, at: DateTime<Utc>) {
        if !self.episodized {
            self.episodized = true;
            self.episodized_at = Some(at);
        }
    }
}

/// Container for messages. `SuperChat` is at most one per user; `DeepDive`
/// is a per-topic thread with a title and optional tenant scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub tenant_scope: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new_super_chat(user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind: ConversationKind::SuperChat,
            title: None,
            tenant_scope: None,
            created_at: Utc::now(),
        }
    }

    pub fn new_deep_dive(user_id: impl Into<String>, title: impl Into<String>, tenant_scope: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind: ConversationKind::DeepDive,
            title: Some(title.into()),
            tenant_scope,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_episodized_is_one_way() {
        let conv = Uuid::new_v4();
        let mut m = ChatMessage::new(conv, Role::User, "hi");
        let t1 = Utc::now();
        m.mark_episodized(t1);
        let stamped = m.episodized_at.unwrap();
        m.mark_episodized(Utc::now());
        assert_eq!(m.episodized_at.unwrap(), stamped);
    }
}
