//! Optimistic mutations as command objects.
//!
//! A mutation is applied to local state first, then sent. The server's answer
//! is folded back in with `confirm`; a failed send undoes the local change with
//! `rollback`. Each step is a plain method so the whole cycle can be driven by
//! hand against a [`CacheState`] without any transport.

use async_trait::async_trait;
use parley_core::conversation::{
    Conversation, ConversationDetail, ConversationPatch, NewConversation,
};

use crate::api::ConversationApi;
use crate::cache::CacheState;
use crate::error::ClientError;

#[async_trait]
pub trait Mutation: Send + Sync {
    type Output: Send;

    /// Change local state and remember whatever `rollback` will need.
    fn apply(&mut self, state: &mut CacheState) -> Result<(), ClientError>;

    async fn send(&self, api: &dyn ConversationApi) -> Result<Self::Output, ClientError>;

    /// Reconcile with the server's answer; the server wins for computed fields.
    fn confirm(&self, state: &mut CacheState, output: &Self::Output);

    fn rollback(&self, state: &mut CacheState);
}

/// Create with a locally generated id and timestamps.
pub struct CreateConversation {
    draft: Conversation,
}

impl CreateConversation {
    pub fn new(new: NewConversation, now: i64) -> Self {
        Self {
            draft: new.into_conversation(now),
        }
    }

    pub fn draft(&self) -> &Conversation {
        &self.draft
    }
}

#[async_trait]
impl Mutation for CreateConversation {
    type Output = Conversation;

    fn apply(&mut self, state: &mut CacheState) -> Result<(), ClientError> {
        state.conversations.insert(0, self.draft.clone());
        state.cached.insert(
            self.draft.id.clone(),
            ConversationDetail {
                conversation: self.draft.clone(),
                messages: Vec::new(),
            },
        );
        Ok(())
    }

    async fn send(&self, api: &dyn ConversationApi) -> Result<Conversation, ClientError> {
        let draft = &self.draft;
        let body = NewConversation {
            id: Some(draft.id.clone()),
            provider_id: draft.provider_id.clone(),
            agent_id: draft.agent_id.clone(),
            folder_id: draft.folder_id.clone(),
            model: draft.model.clone(),
            title: draft.title.clone(),
            created_at: Some(draft.created_at),
            updated_at: Some(draft.updated_at),
        };
        api.create(&body).await
    }

    fn confirm(&self, state: &mut CacheState, saved: &Conversation) {
        if let Some(index) = state.position(&self.draft.id) {
            state.conversations[index] = saved.clone();
        }
        let messages = state
            .cached
            .remove(&self.draft.id)
            .map(|detail| detail.messages)
            .unwrap_or_default();
        state.cached.insert(
            saved.id.clone(),
            ConversationDetail {
                conversation: saved.clone(),
                messages,
            },
        );
    }

    fn rollback(&self, state: &mut CacheState) {
        state.conversations.retain(|c| c.id != self.draft.id);
        state.cached.remove(&self.draft.id);
    }
}

/// Patch a conversation's metadata.
pub struct UpdateConversation {
    id: String,
    patch: ConversationPatch,
    now: i64,
    previous: Option<(usize, Conversation)>,
}

impl UpdateConversation {
    pub fn new(id: impl Into<String>, patch: ConversationPatch, now: i64) -> Self {
        Self {
            id: id.into(),
            patch,
            now,
            previous: None,
        }
    }
}

#[async_trait]
impl Mutation for UpdateConversation {
    type Output = Conversation;

    fn apply(&mut self, state: &mut CacheState) -> Result<(), ClientError> {
        let index = state
            .position(&self.id)
            .ok_or_else(|| ClientError::NotFound(self.id.clone()))?;
        let previous = state.conversations[index].clone();
        let mut next = previous.clone();
        self.patch.apply(&mut next, self.now);
        state.sync_metadata(&next);
        self.previous = Some((index, previous));
        Ok(())
    }

    async fn send(&self, api: &dyn ConversationApi) -> Result<Conversation, ClientError> {
        api.update(&self.id, &self.patch).await
    }

    fn confirm(&self, state: &mut CacheState, saved: &Conversation) {
        state.sync_metadata(saved);
    }

    /// Put the old value back at the index it had, wherever the entry
    /// has moved since.
    fn rollback(&self, state: &mut CacheState) {
        let Some((index, previous)) = &self.previous else {
            return;
        };
        state.conversations.retain(|c| c.id != self.id);
        let index = (*index).min(state.conversations.len());
        state.conversations.insert(index, previous.clone());
        state.sync_metadata(previous);
    }
}

/// Delete a conversation.
pub struct RemoveConversation {
    id: String,
    removed: Option<Conversation>,
}

impl RemoveConversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            removed: None,
        }
    }
}

#[async_trait]
impl Mutation for RemoveConversation {
    type Output = ();

    fn apply(&mut self, state: &mut CacheState) -> Result<(), ClientError> {
        self.removed = state
            .position(&self.id)
            .map(|index| state.conversations.remove(index));
        state.cached.remove(&self.id);
        if state.active_id.as_deref() == Some(self.id.as_str()) {
            state.active_id = None;
            state.active = None;
        }
        Ok(())
    }

    async fn send(&self, api: &dyn ConversationApi) -> Result<(), ClientError> {
        api.delete(&self.id).await
    }

    fn confirm(&self, _state: &mut CacheState, _output: &()) {}

    /// The entry comes back at the head of the list, not its old slot.
    fn rollback(&self, state: &mut CacheState) {
        if let Some(removed) = &self.removed {
            state.conversations.insert(0, removed.clone());
        }
    }
}
