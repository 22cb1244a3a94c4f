use parley_core::error::StoreError;
use parley_core::message::{Role, StoredMessage};
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use crate::{Database, col, db_err};

fn message_from_row(row: &SqliteRow) -> Result<StoredMessage, StoreError> {
    let role: String = col(row, "role")?;
    Ok(StoredMessage {
        id: col(row, "id")?,
        conversation_id: col(row, "conversation_id")?,
        role: Role::parse(&role)
            .ok_or_else(|| StoreError::Database(format!("unknown message role: {role}")))?,
        content: col(row, "content")?,
        created_at: col(row, "created_at")?,
    })
}

impl Database {
    pub async fn insert_message(&self, message: &StoredMessage) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err("insert message"))?;
        Ok(())
    }

    /// Insert unless a message with the same id already exists.
    /// Returns whether a row was written.
    pub async fn insert_message_if_absent(
        &self,
        message: &StoredMessage,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(self.pool())
        .await
        .map_err(db_err("insert message"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Messages of one conversation in creation order.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at FROM messages
             WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err("list messages"))?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let row = sqlx::query(
            "SELECT id, conversation_id, role, content, created_at FROM messages WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("get message"))?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Remove a user message and everything after it in its conversation,
    /// so the turn can be edited and resent. Returns the conversation id.
    pub async fn truncate_from(&self, message_id: &str) -> Result<String, StoreError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(db_err("begin truncate"))?;

        let row = sqlx::query(
            "SELECT rowid AS seq, id, conversation_id, role, content, created_at
             FROM messages WHERE id = ?1",
        )
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err("get message"))?;
        let row = row.ok_or_else(|| StoreError::NotFound {
            entity: "Message",
            id: message_id.to_string(),
        })?;
        let target = message_from_row(&row)?;
        let seq: i64 = col(&row, "seq")?;

        if target.role != Role::User {
            return Err(StoreError::Invalid("Only user messages can be edited".into()));
        }

        // Same order as `list_messages`: creation time, then insertion.
        let deleted = sqlx::query(
            "DELETE FROM messages WHERE conversation_id = ?1
             AND (created_at > ?2 OR (created_at = ?2 AND rowid >= ?3))",
        )
        .bind(&target.conversation_id)
        .bind(target.created_at)
        .bind(seq)
        .execute(&mut *tx)
        .await
        .map_err(db_err("truncate messages"))?;

        sqlx::query("UPDATE conversations SET updated_at = ?2 WHERE id = ?1")
            .bind(&target.conversation_id)
            .bind(parley_core::now_millis())
            .execute(&mut *tx)
            .await
            .map_err(db_err("touch conversation"))?;

        tx.commit().await.map_err(db_err("commit truncate"))?;
        debug!(
            conversation_id = %target.conversation_id,
            removed = deleted.rows_affected(),
            "Conversation truncated"
        );
        Ok(target.conversation_id)
    }
}
