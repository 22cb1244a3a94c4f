use parley_core::conversation::{Conversation, ConversationDetail, ConversationPatch, NewConversation};
use parley_core::error::StoreError;
use sqlx::sqlite::SqliteRow;
use tracing::debug;

use crate::{Database, col, db_err};

const SELECT_CONVERSATION: &str = "SELECT id, provider_id, agent_id, folder_id, model, title, created_at, updated_at FROM conversations";

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, StoreError> {
    Ok(Conversation {
        id: col(row, "id")?,
        provider_id: col(row, "provider_id")?,
        agent_id: col(row, "agent_id")?,
        folder_id: col(row, "folder_id")?,
        model: col(row, "model")?,
        title: col(row, "title")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

impl Database {
    /// All conversations, most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query(&format!("{SELECT_CONVERSATION} ORDER BY updated_at DESC"))
            .fetch_all(self.pool())
            .await
            .map_err(db_err("list conversations"))?;
        rows.iter().map(conversation_from_row).collect()
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_CONVERSATION} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("get conversation"))?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    /// Header plus messages in creation order.
    pub async fn get_conversation_detail(
        &self,
        id: &str,
    ) -> Result<Option<ConversationDetail>, StoreError> {
        let Some(conversation) = self.get_conversation(id).await? else {
            return Ok(None);
        };
        let messages = self.list_messages(id).await?;
        Ok(Some(ConversationDetail {
            conversation,
            messages,
        }))
    }

    pub async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, StoreError> {
        let conversation = new.into_conversation(parley_core::now_millis());
        sqlx::query(
            "INSERT INTO conversations (id, provider_id, agent_id, folder_id, model, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&conversation.id)
        .bind(&conversation.provider_id)
        .bind(&conversation.agent_id)
        .bind(&conversation.folder_id)
        .bind(&conversation.model)
        .bind(&conversation.title)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(self.pool())
        .await
        .map_err(db_err("create conversation"))?;
        debug!(id = %conversation.id, "Conversation created");
        Ok(conversation)
    }

    /// Apply a partial update. Absent fields keep their value, `null` clears,
    /// an empty string keeps.
    pub async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, StoreError> {
        let mut conversation =
            self.get_conversation(id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "Conversation",
                    id: id.to_string(),
                })?;
        patch.apply(&mut conversation, parley_core::now_millis());

        sqlx::query(
            "UPDATE conversations
             SET provider_id = ?2, agent_id = ?3, folder_id = ?4, model = ?5, title = ?6, updated_at = ?7
             WHERE id = ?1",
        )
        .bind(&conversation.id)
        .bind(&conversation.provider_id)
        .bind(&conversation.agent_id)
        .bind(&conversation.folder_id)
        .bind(&conversation.model)
        .bind(&conversation.title)
        .bind(conversation.updated_at)
        .execute(self.pool())
        .await
        .map_err(db_err("update conversation"))?;
        Ok(conversation)
    }

    /// Delete a conversation and, by cascade, its messages.
    pub async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err("delete conversation"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "Conversation",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Record the model a turn actually used.
    pub async fn set_conversation_model(&self, id: &str, model: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET model = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(model)
            .bind(parley_core::now_millis())
            .execute(self.pool())
            .await
            .map_err(db_err("set conversation model"))?;
        Ok(())
    }

    pub async fn touch_conversation(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(parley_core::now_millis())
            .execute(self.pool())
            .await
            .map_err(db_err("touch conversation"))?;
        Ok(())
    }

    /// Set the title only when none is stored yet. Returns whether a row changed.
    pub async fn set_title_if_absent(&self, id: &str, title: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?2, updated_at = ?3
             WHERE id = ?1 AND (title IS NULL OR title = '')",
        )
        .bind(id)
        .bind(title)
        .bind(parley_core::now_millis())
        .execute(self.pool())
        .await
        .map_err(db_err("set default title"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the title unconditionally.
    pub async fn set_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET title = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(title)
            .bind(parley_core::now_millis())
            .execute(self.pool())
            .await
            .map_err(db_err("set title"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::{Role, StoredMessage};

    fn new_conv(id: &str) -> NewConversation {
        NewConversation {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_and_get() {
        let db = Database::in_memory().await.unwrap();
        let created = db
            .create_conversation(NewConversation {
                id: Some("c1".into()),
                model: Some("gpt-4o".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let fetched = db.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(created, fetched);
        assert!(db.get_conversation("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_recent_update() {
        let db = Database::in_memory().await.unwrap();
        db.create_conversation(NewConversation {
            updated_at: Some(10),
            ..new_conv("old")
        })
        .await
        .unwrap();
        db.create_conversation(NewConversation {
            updated_at: Some(20),
            ..new_conv("new")
        })
        .await
        .unwrap();
        let ids: Vec<_> = db
            .list_conversations()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn update_applies_patch_semantics() {
        let db = Database::in_memory().await.unwrap();
        db.create_conversation(NewConversation {
            title: Some("Keep".into()),
            model: Some("m1".into()),
            ..new_conv("c1")
        })
        .await
        .unwrap();

        let patch: ConversationPatch =
            serde_json::from_str(r#"{"title":"","model":null}"#).unwrap();
        let updated = db.update_conversation("c1", &patch).await.unwrap();
        assert_eq!(updated.title.as_deref(), Some("Keep"));
        assert_eq!(updated.model, None);

        let err = db
            .update_conversation("nope", &ConversationPatch::title("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_cascades_messages() {
        let db = Database::in_memory().await.unwrap();
        db.create_conversation(new_conv("c1")).await.unwrap();
        db.insert_message(&StoredMessage::new("c1", Role::User, "hi"))
            .await
            .unwrap();
        db.delete_conversation("c1").await.unwrap();
        assert!(db.list_messages("c1").await.unwrap().is_empty());
        assert!(matches!(
            db.delete_conversation("c1").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn default_title_only_when_absent() {
        let db = Database::in_memory().await.unwrap();
        db.create_conversation(new_conv("c1")).await.unwrap();
        assert!(db.set_title_if_absent("c1", "First").await.unwrap());
        assert!(!db.set_title_if_absent("c1", "Second").await.unwrap());
        let conv = db.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conv.title.as_deref(), Some("First"));

        db.set_title("c1", "Refined").await.unwrap();
        let conv = db.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conv.title.as_deref(), Some("Refined"));
    }

    #[tokio::test]
    async fn detail_includes_ordered_messages() {
        let db = Database::in_memory().await.unwrap();
        db.create_conversation(new_conv("c1")).await.unwrap();
        let mut second = StoredMessage::new("c1", Role::Assistant, "b");
        second.created_at = 2;
        let mut first = StoredMessage::new("c1", Role::User, "a");
        first.created_at = 1;
        db.insert_message(&second).await.unwrap();
        db.insert_message(&first).await.unwrap();

        let detail = db.get_conversation_detail("c1").await.unwrap().unwrap();
        let contents: Vec<_> = detail.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
    }
}
