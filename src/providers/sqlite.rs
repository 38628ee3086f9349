use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_sqlite::{
    rusqlite::{params, Connection, OptionalExtension},
    Config as DeadpoolSqliteConfig, Pool as DeadpoolSqlitePool, Runtime as DeadpoolRuntime,
};
use tracing::{debug, info};

use crate::domains::chat::{now_ms, Chat, Message, Persona, Role};
use crate::error::{ChaiRelayError, Result};
use crate::interfaces::providers::ConversationStore;

const CREATE_CHATS_SQL: &str = include_str!("../../migrations/20260101_create_chats/up.sql");
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

struct MessageRow {
    id: String,
    chat_id: String,
    role: String,
    content: String,
    created_at: i64,
    is_generating: bool,
}

impl MessageRow {
    fn from_row(row: &deadpool_sqlite::rusqlite::Row<'_>) -> deadpool_sqlite::rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            created_at: row.get(4)?,
            is_generating: row.get(5)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        let role: Role = self.role.parse()?;
        Ok(Message {
            id: self.id,
            chat_id: self.chat_id,
            role,
            content: self.content,
            created_at: self.created_at,
            is_generating: self.is_generating,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, created_at, is_generating";

/// SQLite-backed conversation store. Reads go straight to the pool; writes
/// are serialized through `write_gate` so updates to one message never
/// interleave.
#[derive(Clone)]
pub struct SqliteConversationStore {
    sqlite_path: String,
    pool: DeadpoolSqlitePool,
    write_gate: Arc<tokio::sync::Mutex<()>>,
}

impl SqliteConversationStore {
    pub async fn new(sqlite_path: impl Into<String>) -> Result<Self> {
        let sqlite_path = sqlite_path.into();
        ensure_parent_dir(&sqlite_path)?;

        let pool = DeadpoolSqliteConfig::new(sqlite_path.clone())
            .create_pool(DeadpoolRuntime::Tokio1)
            .map_err(|e| ChaiRelayError::Storage(e.to_string()))?;

        let store = Self {
            sqlite_path,
            pool,
            write_gate: Arc::new(tokio::sync::Mutex::new(())),
        };
        store
            .interact(|conn| conn.execute_batch(CREATE_CHATS_SQL))
            .await?;
        info!(sqlite_path = %store.sqlite_path, "Conversation store ready");
        Ok(store)
    }

    pub fn sqlite_path(&self) -> &str {
        &self.sqlite_path
    }

    async fn interact<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> deadpool_sqlite::rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| ChaiRelayError::Storage(e.to_string()))?;
        conn.interact(move |conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            f(conn)
        })
        .await
        .map_err(|e| ChaiRelayError::Storage(e.to_string()))?
        .map_err(|e| ChaiRelayError::Storage(e.to_string()))
    }

    pub async fn create_persona(&self, persona: &Persona) -> Result<()> {
        let persona = persona.clone();
        let _write_guard = self.write_gate.lock().await;
        self.interact(move |conn| {
            conn.execute(
                "INSERT INTO personas (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![persona.id, persona.name, persona.description, now_ms()],
            )
        })
        .await?;
        Ok(())
    }

    /// Creates a chat seating `persona_ids` in order.
    pub async fn create_chat(&self, chat_id: &str, persona_ids: &[&str]) -> Result<()> {
        let chat_id = chat_id.to_string();
        let persona_ids: Vec<String> = persona_ids.iter().map(|id| id.to_string()).collect();
        let _write_guard = self.write_gate.lock().await;
        self.interact(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chats (id, created_at) VALUES (?1, ?2)",
                params![chat_id, now_ms()],
            )?;
            for (position, persona_id) in persona_ids.iter().enumerate() {
                tx.execute(
                    "INSERT INTO chat_personas (chat_id, persona_id, position) VALUES (?1, ?2, ?3)",
                    params![chat_id, persona_id, position as i64],
                )?;
            }
            tx.commit()
        })
        .await
    }

    pub async fn insert_message(&self, message: &Message) -> Result<()> {
        let message = message.clone();
        let _write_guard = self.write_gate.lock().await;
        self.interact(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_id, role, content, created_at, is_generating)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.chat_id,
                    message.role.as_str(),
                    message.content,
                    message.created_at,
                    message.is_generating
                ],
            )
        })
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        let message_id = message_id.to_string();
        let row = self
            .interact(move |conn| {
                conn.query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    params![message_id],
                    MessageRow::from_row,
                )
                .optional()
            })
            .await?;
        row.map(MessageRow::into_message).transpose()
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get_chat_with_personas(&self, chat_id: &str) -> Result<Option<Chat>> {
        let chat_id = chat_id.to_string();
        self.interact(move |conn| {
            let exists = conn
                .query_row(
                    "SELECT id FROM chats WHERE id = ?1",
                    params![chat_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            let Some(id) = exists else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT p.id, p.name, p.description
                 FROM chat_personas cp
                 JOIN personas p ON p.id = cp.persona_id
                 WHERE cp.chat_id = ?1
                 ORDER BY cp.position ASC",
            )?;
            let personas = stmt
                .query_map(params![id], |row| {
                    Ok(Persona {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                })?
                .collect::<deadpool_sqlite::rusqlite::Result<Vec<_>>>()?;

            Ok(Some(Chat { id, personas }))
        })
        .await
    }

    async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>> {
        let chat_id = chat_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .interact(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE chat_id = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![chat_id, limit], MessageRow::from_row)?
                    .collect::<deadpool_sqlite::rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    async fn edit_message(&self, chat_id: &str, message_id: &str, content: &str) -> Result<()> {
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        let content = content.to_string();
        let _write_guard = self.write_gate.lock().await;
        let updated = self
            .interact({
                let chat_id = chat_id.clone();
                let message_id = message_id.clone();
                move |conn| {
                    conn.execute(
                        "UPDATE messages SET content = ?1, is_generating = 0
                         WHERE id = ?2 AND chat_id = ?3",
                        params![content, message_id, chat_id],
                    )
                }
            })
            .await?;
        if updated == 0 {
            return Err(ChaiRelayError::NotFound(format!(
                "message {message_id} in chat {chat_id}"
            )));
        }
        debug!(chat_id = %chat_id, message_id = %message_id, "Message content updated");
        Ok(())
    }
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ChaiRelayError::Storage(e.to_string()))?;
    }
    Ok(())
}
