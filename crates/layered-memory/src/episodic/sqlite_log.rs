//! Durable [`ConversationLog`] backed by SQLite (§6): `super_chat`/
//! `super_chat_messages` hold the single per-user super-chat thread,
//! `deepdive_conversations`/`deepdive_messages` hold per-topic deep-dive
//! threads. Sharing a connection pool with a
//! [`crate::store::sqlite::SqliteStore`] is what lets
//! [`ConversationLog::commit_episode`] commit an episode write and the
//! flagging of its source messages inside one physical transaction.

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use super::conversation_log::ConversationLog;
use crate::domain::message::{ChatMessage, Conversation, ConversationKind, Role};
use crate::error::Result;
use crate::store::sqlite::{store_error, SqliteStore};
use crate::store::{StoredRecord, VectorStore};

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

pub struct SqliteConversationLog {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteConversationLog {
    /// Callers that need atomic [`ConversationLog::commit_episode`]
    /// against a [`SqliteStore`] must build both from the same
    /// `SqliteStore::pool()` clone — two independently opened pools
    /// against the same file are different connections and cannot share
    /// a transaction.
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Result<Self> {
        let log = Self { pool };
        log.init_schema()?;
        Ok(log)
    }

    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(|e| store_error("building in-memory pool", e))?;
        Self::new(pool)
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| store_error("connection pool exhausted", e))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS super_chat (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                tenant_scope TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS super_chat_messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                episodized INTEGER NOT NULL DEFAULT 0,
                episodized_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_super_chat_messages_conv ON super_chat_messages(conversation_id);

            CREATE TABLE IF NOT EXISTS deepdive_conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                tenant_scope TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS deepdive_messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                episodized INTEGER NOT NULL DEFAULT 0,
                episodized_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_deepdive_messages_conv ON deepdive_messages(conversation_id);
            "#,
        )
        .map_err(|e| store_error("initializing conversation log schema", e))?;
        Ok(())
    }
}

fn tables(kind: ConversationKind) -> (&'static str, &'static str) {
    match kind {
        ConversationKind::SuperChat => ("super_chat", "super_chat_messages"),
        ConversationKind::DeepDive => ("deepdive_conversations", "deepdive_messages"),
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn role_from_str(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        _ => Role::User,
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    let id: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let episodized: i64 = row.get(5)?;
    let episodized_at: Option<String> = row.get(6)?;

    Ok(ChatMessage {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        conversation_id: Uuid::parse_str(&conversation_id).unwrap_or_default(),
        role: role_from_str(&role),
        content,
        created_at: parse_rfc3339(&created_at),
        episodized: episodized != 0,
        episodized_at: episodized_at.map(|s| parse_rfc3339(&s)),
    })
}

fn row_to_conversation(kind: ConversationKind) -> impl Fn(&rusqlite::Row) -> rusqlite::Result<Conversation> {
    move |row| {
        let id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let title: Option<String> = row.get(2)?;
        let tenant_scope: Option<String> = row.get(3)?;
        let created_at: String = row.get(4)?;
        Ok(Conversation {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            user_id,
            kind,
            title,
            tenant_scope,
            created_at: parse_rfc3339(&created_at),
        })
    }
}

/// Marks `message_ids` as episodized in `messages_table` through `conn` —
/// shared between the plain [`ConversationLog::mark_episodized`] path
/// (its own connection) and [`ConversationLog::commit_episode`]'s atomic
/// path (a connection borrowed from an in-flight transaction).
fn mark_episodized_rows(
    conn: &rusqlite::Connection,
    messages_table: &str,
    conversation_id: Uuid,
    message_ids: &[Uuid],
    at: DateTime<Utc>,
) -> Result<()> {
    for id in message_ids {
        conn.execute(
            &format!("UPDATE {messages_table} SET episodized = 1, episodized_at = ?1 WHERE id = ?2 AND conversation_id = ?3"),
            params![at.to_rfc3339(), id.to_string(), conversation_id.to_string()],
        )
        .map_err(|e| store_error("marking message episodized", e))?;
    }
    Ok(())
}

impl ConversationLog for SqliteConversationLog {
    fn put_conversation(&self, conversation: Conversation) {
        let Ok(conn) = self.conn() else { return };
        let (conv_table, _) = tables(conversation.kind);
        let _ = conn.execute(
            &format!("INSERT OR REPLACE INTO {conv_table} (id, user_id, title, tenant_scope, created_at) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                conversation.id.to_string(),
                conversation.user_id,
                conversation.title,
                conversation.tenant_scope,
                conversation.created_at.to_rfc3339(),
            ],
        );
    }

    fn append_message(&self, message: ChatMessage) {
        let Some(kind) = self.conversation_kind(message.conversation_id) else { return };
        let Ok(conn) = self.conn() else { return };
        let (_, messages_table) = tables(kind);
        let _ = conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {messages_table}
                 (id, conversation_id, role, content, created_at, episodized, episodized_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                role_to_str(message.role),
                message.content,
                message.created_at.to_rfc3339(),
                message.episodized as i64,
                message.episodized_at.map(|t| t.to_rfc3339()),
            ],
        );
    }

    fn conversation(&self, conversation_id: Uuid) -> Option<Conversation> {
        let kind = self.conversation_kind(conversation_id)?;
        let (conv_table, _) = tables(kind);
        let conn = self.conn().ok()?;
        conn.query_row(
            &format!("SELECT id, user_id, title, tenant_scope, created_at FROM {conv_table} WHERE id = ?1"),
            params![conversation_id.to_string()],
            row_to_conversation(kind),
        )
        .optional()
        .ok()
        .flatten()
    }

    fn conversation_kind(&self, conversation_id: Uuid) -> Option<ConversationKind> {
        let conn = self.conn().ok()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM super_chat WHERE id = ?1", params![conversation_id.to_string()], |r| r.get(0))
            .optional()
            .ok()
            .flatten();
        if found.is_some() {
            return Some(ConversationKind::SuperChat);
        }
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM deepdive_conversations WHERE id = ?1", params![conversation_id.to_string()], |r| r.get(0))
            .optional()
            .ok()
            .flatten();
        found.map(|_| ConversationKind::DeepDive)
    }

    fn pending_conversations(&self, user_id: &str) -> Vec<Uuid> {
        let Ok(conn) = self.conn() else { return Vec::new() };
        let mut ids = Vec::new();
        for (conv_table, messages_table) in [tables(ConversationKind::SuperChat), tables(ConversationKind::DeepDive)] {
            let query = format!(
                "SELECT DISTINCT c.id FROM {conv_table} c
                 JOIN {messages_table} m ON m.conversation_id = c.id
                 WHERE c.user_id = ?1 AND m.episodized = 0"
            );
            let Ok(mut stmt) = conn.prepare(&query) else { continue };
            let Ok(rows) = stmt.query_map(params![user_id], |row| row.get::<_, String>(0)) else { continue };
            for row in rows.flatten() {
                if let Ok(id) = Uuid::parse_str(&row) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    fn pending_messages(&self, conversation_id: Uuid) -> Vec<ChatMessage> {
        let Some(kind) = self.conversation_kind(conversation_id) else { return Vec::new() };
        let (_, messages_table) = tables(kind);
        let Ok(conn) = self.conn() else { return Vec::new() };
        let query = format!(
            "SELECT id, conversation_id, role, content, created_at, episodized, episodized_at
             FROM {messages_table} WHERE conversation_id = ?1 AND episodized = 0 ORDER BY created_at ASC"
        );
        let Ok(mut stmt) = conn.prepare(&query) else { return Vec::new() };
        let Ok(rows) = stmt.query_map(params![conversation_id.to_string()], row_to_message) else { return Vec::new() };
        rows.flatten().collect()
    }

    fn mark_episodized(&self, conversation_id: Uuid, message_ids: &[Uuid], at: DateTime<Utc>) {
        let Some(kind) = self.conversation_kind(conversation_id) else { return };
        let (_, messages_table) = tables(kind);
        if let Ok(conn) = self.conn() {
            let _ = mark_episodized_rows(&conn, messages_table, conversation_id, message_ids, at);
        }
    }

    fn commit_episode(
        &self,
        store: &dyn VectorStore,
        episode: StoredRecord,
        conversation_id: Uuid,
        message_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<()> {
        if store.as_any().downcast_ref::<SqliteStore>().is_none() {
            store.transaction(&mut |txn| txn.put(episode.clone()))?;
            self.mark_episodized(conversation_id, message_ids, at);
            return Ok(());
        }
        let Some(kind) = self.conversation_kind(conversation_id) else {
            // No known conversation to flag — still persist the episode so the
            // caller's work isn't lost, matching the non-atomic default's behavior.
            return store.transaction(&mut |txn| txn.put(episode.clone()));
        };
        let (_, messages_table) = tables(kind);

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| store_error("opening episode commit transaction", e))?;
        SqliteStore::write_row(&tx, &episode)?;
        mark_episodized_rows(&tx, messages_table, conversation_id, message_ids, at)?;
        tx.commit().map_err(|e| store_error("committing episode", e))?;
        Ok(())
    }
}
