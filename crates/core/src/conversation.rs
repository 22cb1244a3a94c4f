//! Conversation records and the patch/merge rules shared by the server
//! store and the client cache.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::message::StoredMessage;

/// A conversation header. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Per-conversation model override
    #[serde(default)]
    pub model: Option<String>,
    /// Set at most once by the chat pipeline; users may override it.
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A conversation together with its messages in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

/// Body of a create request. Every field is optional; the server fills
/// in a fresh id and the current time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl NewConversation {
    /// Materialize into a conversation, generating missing identity and
    /// timestamps. Empty strings count as absent.
    pub fn into_conversation(self, now: i64) -> Conversation {
        let id = self
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Conversation {
            id,
            provider_id: non_empty(self.provider_id),
            agent_id: non_empty(self.agent_id),
            folder_id: non_empty(self.folder_id),
            model: non_empty(self.model),
            title: non_empty(self.title),
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
        }
    }
}

/// Partial update.
///
/// For each field: absent keeps the current value, `null` clears it, an
/// empty string keeps the current value, anything else replaces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub model: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub title: Option<Option<String>>,
}

impl ConversationPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(Some(title.into())),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.provider_id.is_none()
            && self.agent_id.is_none()
            && self.folder_id.is_none()
            && self.model.is_none()
            && self.title.is_none()
    }

    /// Merge this patch into `conversation` and stamp `updated_at`.
    pub fn apply(&self, conversation: &mut Conversation, now: i64) {
        merge(&mut conversation.provider_id, &self.provider_id);
        merge(&mut conversation.agent_id, &self.agent_id);
        merge(&mut conversation.folder_id, &self.folder_id);
        merge(&mut conversation.model, &self.model);
        merge(&mut conversation.title, &self.title);
        conversation.updated_at = now;
    }
}

fn merge(slot: &mut Option<String>, patch: &Option<Option<String>>) {
    match patch {
        None => {}
        Some(None) => *slot = None,
        Some(Some(v)) if v.is_empty() => {}
        Some(Some(v)) => *slot = Some(v.clone()),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
