//! `SQLite`-backed conversation history and summary storage.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
}

impl MessageRole {
    /// Convert to string representation for database storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            _ => Self::User, // Default fallback
        }
    }
}

/// A single persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Database row ID
    pub id: i64,
    /// Owning user ID
    pub user_id: String,
    /// Message role (user/assistant)
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// A stored conversation summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// Database row ID
    pub id: i64,
    /// Owning user ID
    pub user_id: String,
    /// Condensed summary text
    pub content: String,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// `SQLite` store for per-user history and summaries.
///
/// History rows are appended on every exchange and deleted in bulk once
/// summarized; summary rows accumulate without further compaction.
#[derive(Clone)]
pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    /// Create a new history store at the given database path.
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        // The user store opens its own connection to the same file.
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Initialize database schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    TEXT NOT NULL,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_user ON history(user_id);
            CREATE INDEX IF NOT EXISTS idx_history_user_created ON history(user_id, created_at);

            CREATE TABLE IF NOT EXISTS summaries (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_summaries_user ON summaries(user_id);",
        )?;
        Ok(())
    }

    /// Add a message to a user's history.
    pub fn add_message(&self, user_id: &str, role: MessageRole, content: &str) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;

        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO history (user_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, role.as_str(), content, now],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get all messages for a user, ordered by creation time.
    pub fn get_messages(&self, user_id: &str) -> Result<Vec<HistoryMessage>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, role, content, created_at
             FROM history
             WHERE user_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![user_id], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Get the oldest `limit` messages for a user, ordered by creation time.
    pub fn oldest_messages(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryMessage>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, role, content, created_at
             FROM history
             WHERE user_id = ?1
             ORDER BY created_at ASC, id ASC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![user_id, limit as i64], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Get the number of history messages for a user.
    pub fn message_count(&self, user_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM history WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// Replace summarized messages with a summary row, atomically.
    ///
    /// Inserts one summary row and deletes exactly the given message IDs
    /// in a single transaction. Returns the new summary's row ID.
    pub fn replace_with_summary(
        &self,
        user_id: &str,
        summary: &str,
        message_ids: &[i64],
    ) -> Result<i64> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;

        let tx = conn.transaction()?;

        let now = Utc::now().timestamp();
        tx.execute(
            "INSERT INTO summaries (user_id, content, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, summary, now],
        )?;
        let summary_id = tx.last_insert_rowid();

        if !message_ids.is_empty() {
            // Build IN clause for the IDs to delete
            let placeholders: Vec<String> = (0..message_ids.len())
                .map(|i| format!("?{}", i + 2))
                .collect();
            let sql = format!(
                "DELETE FROM history WHERE user_id = ?1 AND id IN ({})",
                placeholders.join(", ")
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(user_id.to_string())];
            for id in message_ids {
                params_vec.push(Box::new(*id));
            }
            let params_ref: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(AsRef::as_ref).collect();
            tx.execute(&sql, params_ref.as_slice())?;
        }

        tx.commit()?;
        Ok(summary_id)
    }

    /// Get all summaries for a user, oldest first.
    pub fn summaries(&self, user_id: &str) -> Result<Vec<Summary>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, content, created_at
             FROM summaries
             WHERE user_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![user_id], |row| {
            Ok(Summary {
                id: row.get(0)?,
                user_id: row.get(1)?,
                content: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Get the number of summaries for a user.
    pub fn summary_count(&self, user_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM summaries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// Health check: verify database is accessible.
    pub fn health_check(&self) -> bool {
        self.conn
            .lock()
            .map(|c| c.execute_batch("SELECT 1").is_ok())
            .unwrap_or(false)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryMessage> {
    Ok(HistoryMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        role: MessageRole::parse(&row.get::<_, String>(2)?),
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}
