//! Conversation persistence.
//!
//! A conversation belongs to exactly one student; its messages cascade
//! with it and are totally ordered by append time. Appending any message
//! advances the conversation's `updated_at`.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Conversation, Message, Sender};

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_conversation(&self, student_id: &str) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO conversations (id, student_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(student_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Conversation {
            id,
            student_id: student_id.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        let row = sqlx::query(
            "SELECT id, student_id, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("conversation not found: {}", id)))?;

        Ok(Conversation {
            id: row.get("id"),
            student_id: row.get("student_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    pub async fn list_conversations(&self, student_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT id, student_id, created_at, updated_at FROM conversations \
             WHERE student_id = ? ORDER BY updated_at DESC, id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Conversation {
                id: row.get("id"),
                student_id: row.get("student_id"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Append one message and advance the conversation's `updated_at` to
    /// the message's timestamp.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        content: &str,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "conversation not found: {}",
                conversation_id
            )));
        }

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender, content, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(sender.as_str())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            sender,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Messages in append order. `rowid` breaks ties between messages
    /// appended within the same second.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        // Surface NotFound for a missing conversation rather than an
        // empty list.
        self.get_conversation(conversation_id).await?;

        let rows = sqlx::query(
            "SELECT id, conversation_id, sender, content, created_at FROM messages \
             WHERE conversation_id = ? ORDER BY created_at, rowid",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let sender: String = row.get("sender");
                Ok(Message {
                    id: row.get("id"),
                    conversation_id: row.get("conversation_id"),
                    sender: Sender::parse(&sender)?,
                    content: row.get("content"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}
