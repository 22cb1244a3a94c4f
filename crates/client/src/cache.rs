//! Conversation cache: summary list plus full records.
//!
//! Every [`ConversationCache::load`] takes a fresh token from a monotonic
//! counter. A fetched record is applied only if that token is still the
//! current one and its conversation is still the selected one; anything
//! else is dropped on arrival. In-flight requests are never cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use parley_core::conversation::{Conversation, ConversationDetail, ConversationPatch, NewConversation};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::api::ConversationApi;
use crate::error::ClientError;
use crate::mutation::{CreateConversation, Mutation, RemoveConversation, UpdateConversation};

/// Everything the cache holds. Cloned out by [`ConversationCache::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    /// Summary list, most recent first
    pub conversations: Vec<Conversation>,
    /// The selected conversation
    pub active_id: Option<String>,
    /// Full record shown for the selection
    pub active: Option<ConversationDetail>,
    /// Full records by id
    pub cached: HashMap<String, ConversationDetail>,
    pub loading: bool,
    pub(crate) load_token: u64,
}

impl CacheState {
    pub fn position(&self, id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    fn begin_load(&mut self, id: &str) -> u64 {
        self.load_token += 1;
        self.active_id = Some(id.to_string());
        self.load_token
    }

    fn is_current(&self, token: u64, id: &str) -> bool {
        token == self.load_token && self.active_id.as_deref() == Some(id)
    }

    /// Write new header fields into the list, the cached record and the
    /// active record. Messages are left alone.
    pub(crate) fn sync_metadata(&mut self, conversation: &Conversation) {
        if let Some(index) = self.position(&conversation.id) {
            self.conversations[index] = conversation.clone();
        }
        if let Some(detail) = self.cached.get_mut(&conversation.id) {
            detail.conversation = conversation.clone();
        }
        if let Some(active) = self.active.as_mut()
            && active.conversation.id == conversation.id
        {
            active.conversation = conversation.clone();
        }
    }
}

/// What a [`ConversationCache::load`] call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Load {
    /// Served from cache; a background refresh was started.
    Cached,
    /// Fetched and applied.
    Fetched,
    /// Fetched, but a newer load or selection superseded it.
    Stale,
    /// Fetch failed with nothing cached; the record was cleared.
    Failed,
}

/// Race-safe client view of the conversation endpoints. Cheap to clone.
#[derive(Clone)]
pub struct ConversationCache {
    api: Arc<dyn ConversationApi>,
    state: Arc<RwLock<CacheState>>,
}

impl ConversationCache {
    pub fn new(api: Arc<dyn ConversationApi>) -> Self {
        Self::with_state(api, CacheState::default())
    }

    /// Start from previously persisted state (e.g. restored from disk).
    pub fn with_state(api: Arc<dyn ConversationApi>, state: CacheState) -> Self {
        Self {
            api,
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn snapshot(&self) -> CacheState {
        self.state.read().await.clone()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.clone()
    }

    pub async fn active(&self) -> Option<ConversationDetail> {
        self.state.read().await.active.clone()
    }

    /// Select a conversation without loading it. Clearing the selection
    /// clears the active record, and either way pending loads go stale.
    pub async fn set_active(&self, id: Option<&str>) {
        let mut state = self.state.write().await;
        state.active_id = id.map(str::to_string);
        if id.is_none() {
            state.active = None;
        }
    }

    /// Fetch the summary list. A non-empty result replaces the local list;
    /// an empty result or a failure keeps it. Returns whether it replaced.
    pub async fn refresh_list(&self) -> bool {
        match self.api.list().await {
            Ok(rows) if !rows.is_empty() => {
                self.state.write().await.conversations = rows;
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "Conversation list refresh failed, keeping local list");
                false
            }
        }
    }

    /// Populate the summary list: refresh in the background when something
    /// is already shown, otherwise wait for the fetch.
    pub async fn load_list(&self) {
        {
            let mut state = self.state.write().await;
            if !state.conversations.is_empty() {
                state.loading = false;
                drop(state);
                let cache = self.clone();
                tokio::spawn(async move {
                    cache.refresh_list().await;
                });
                return;
            }
            state.loading = true;
        }
        self.refresh_list().await;
        self.state.write().await.loading = false;
    }

    /// Select `id` and show its full record.
    pub async fn load(&self, id: &str) -> Load {
        let (token, cached) = {
            let mut state = self.state.write().await;
            let token = state.begin_load(id);
            let cached = state.cached.get(id).cloned();
            let hit = cached.is_some();
            state.active = cached;
            state.loading = !hit;
            (token, hit)
        };

        if cached {
            let cache = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                if let Err(e) = cache.fetch(&id, token).await {
                    debug!(conversation_id = %id, error = %e, "Background refresh failed, keeping cached copy");
                }
            });
            return Load::Cached;
        }

        let result = self.fetch(id, token).await;
        let mut state = self.state.write().await;
        let outcome = match result {
            Ok(true) => Load::Fetched,
            Ok(false) => Load::Stale,
            Err(e) if state.is_current(token, id) => {
                warn!(conversation_id = %id, error = %e, "Failed to load conversation");
                state.active = None;
                Load::Failed
            }
            Err(_) => Load::Stale,
        };
        if token == state.load_token {
            state.loading = false;
        }
        outcome
    }

    /// Fetch one record and apply it if `token` is still current.
    async fn fetch(&self, id: &str, token: u64) -> Result<bool, ClientError> {
        let detail = self.api.get(id).await?;
        let mut state = self.state.write().await;
        if !state.is_current(token, id) {
            debug!(conversation_id = %id, token, "Dropping stale conversation load");
            return Ok(false);
        }
        state.cached.insert(id.to_string(), detail.clone());
        state.active = Some(detail);
        Ok(true)
    }

    /// Apply locally, send, then confirm or roll back. The error of a
    /// failed send is returned after the rollback.
    pub async fn run<M: Mutation>(&self, mut mutation: M) -> Result<M::Output, ClientError> {
        mutation.apply(&mut *self.state.write().await)?;
        match mutation.send(self.api.as_ref()).await {
            Ok(output) => {
                mutation.confirm(&mut *self.state.write().await, &output);
                Ok(output)
            }
            Err(e) => {
                warn!(error = %e, "Conversation change rejected, rolling back");
                mutation.rollback(&mut *self.state.write().await);
                Err(e)
            }
        }
    }

    pub async fn create(&self, new: NewConversation) -> Result<Conversation, ClientError> {
        self.run(CreateConversation::new(new, parley_core::now_millis()))
            .await
    }

    pub async fn update(
        &self,
        id: &str,
        patch: ConversationPatch,
    ) -> Result<Conversation, ClientError> {
        self.run(UpdateConversation::new(id, patch, parley_core::now_millis()))
            .await
    }

    pub async fn remove(&self, id: &str) -> Result<(), ClientError> {
        self.run(RemoveConversation::new(id)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use parley_core::message::{Role, StoredMessage};
    use tokio::sync::oneshot;

    use super::*;

    fn conversation(id: &str, title: &str) -> Conversation {
        Conversation {
            id: id.into(),
            provider_id: None,
            agent_id: None,
            folder_id: None,
            model: None,
            title: Some(title.into()),
            created_at: 1,
            updated_at: 1,
        }
    }

    fn detail(id: &str, title: &str) -> ConversationDetail {
        ConversationDetail {
            conversation: conversation(id, title),
            messages: vec![StoredMessage::new(id, Role::User, format!("hello {id}"))],
        }
    }

    /// In-memory API. Reads of a gated id wait until the gate is released.
    #[derive(Default)]
    struct FakeApi {
        list: Mutex<Vec<Conversation>>,
        details: Mutex<HashMap<String, ConversationDetail>>,
        gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl FakeApi {
        fn with(details: &[ConversationDetail]) -> Arc<Self> {
            let api = Self::default();
            for d in details {
                api.list.lock().unwrap().push(d.conversation.clone());
                api.details
                    .lock()
                    .unwrap()
                    .insert(d.conversation.id.clone(), d.clone());
            }
            Arc::new(api)
        }

        fn gate(&self, id: &str) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(id.into(), rx);
            tx
        }

        fn offline() -> ClientError {
            ClientError::Transport("offline".into())
        }

        fn check_write(&self) -> Result<(), ClientError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::offline());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ConversationApi for FakeApi {
        async fn list(&self) -> Result<Vec<Conversation>, ClientError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(Self::offline());
            }
            Ok(self.list.lock().unwrap().clone())
        }

        async fn get(&self, id: &str) -> Result<ConversationDetail, ClientError> {
            let gate = self.gates.lock().unwrap().remove(id);
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(Self::offline());
            }
            self.details
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| ClientError::from_body(404, "Conversation not found"))
        }

        async fn create(&self, new: &NewConversation) -> Result<Conversation, ClientError> {
            self.check_write()?;
            let mut saved = new.clone().into_conversation(99);
            saved.title.get_or_insert_with(|| "Server default".into());
            Ok(saved)
        }

        async fn update(
            &self,
            id: &str,
            patch: &ConversationPatch,
        ) -> Result<Conversation, ClientError> {
            self.check_write()?;
            let mut current = self
                .details
                .lock()
                .unwrap()
                .get(id)
                .map(|d| d.conversation.clone())
                .ok_or_else(|| ClientError::from_body(404, "Conversation not found"))?;
            patch.apply(&mut current, 42);
            Ok(current)
        }

        async fn delete(&self, _id: &str) -> Result<(), ClientError> {
            self.check_write()
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn later_load_wins_over_slower_earlier_load() {
        let api = FakeApi::with(&[detail("a", "A"), detail("b", "B")]);
        let release_a = api.gate("a");
        let cache = ConversationCache::new(api.clone());

        let slow = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.load("a").await })
        };
        settle().await;
        assert_eq!(cache.snapshot().await.active_id.as_deref(), Some("a"));

        assert_eq!(cache.load("b").await, Load::Fetched);
        release_a.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), Load::Stale);

        let state = cache.snapshot().await;
        assert_eq!(state.active_id.as_deref(), Some("b"));
        assert_eq!(state.active.unwrap().conversation.id, "b");
        assert!(!state.cached.contains_key("a"));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn deselect_while_loading_drops_the_result() {
        let api = FakeApi::with(&[detail("a", "A")]);
        let release = api.gate("a");
        let cache = ConversationCache::new(api.clone());

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.load("a").await })
        };
        settle().await;
        cache.set_active(None).await;
        release.send(()).unwrap();

        assert_eq!(pending.await.unwrap(), Load::Stale);
        assert!(cache.active().await.is_none());
    }

    #[tokio::test]
    async fn cached_record_is_served_and_refreshed() {
        let api = FakeApi::with(&[detail("a", "A")]);
        let cache = ConversationCache::new(api.clone());
        assert_eq!(cache.load("a").await, Load::Fetched);

        api.details.lock().unwrap().insert("a".into(), detail("a", "A2"));
        assert_eq!(cache.load("a").await, Load::Cached);
        assert_eq!(cache.active().await.unwrap().conversation.title.as_deref(), Some("A"));

        settle().await;
        assert_eq!(cache.active().await.unwrap().conversation.title.as_deref(), Some("A2"));
    }

    #[tokio::test]
    async fn offline_refresh_keeps_cached_record() {
        let api = FakeApi::with(&[detail("a", "A")]);
        let cache = ConversationCache::new(api.clone());
        cache.load("a").await;

        api.fail_reads.store(true, Ordering::SeqCst);
        assert_eq!(cache.load("a").await, Load::Cached);
        settle().await;
        let active = cache.active().await.unwrap();
        assert_eq!(active.conversation, conversation("a", "A"));
        assert_eq!(active.messages.len(), 1);
    }

    #[tokio::test]
    async fn failed_load_without_cache_clears_record() {
        let api = FakeApi::with(&[detail("a", "A")]);
        api.fail_reads.store(true, Ordering::SeqCst);
        let cache = ConversationCache::new(api.clone());

        assert_eq!(cache.load("a").await, Load::Failed);
        let state = cache.snapshot().await;
        assert!(state.active.is_none());
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn refresh_list_keeps_local_list_on_empty_or_error() {
        let api = FakeApi::with(&[detail("a", "A"), detail("b", "B")]);
        let cache = ConversationCache::new(api.clone());
        cache.load_list().await;
        assert_eq!(cache.conversations().await.len(), 2);

        api.list.lock().unwrap().clear();
        assert!(!cache.refresh_list().await);
        api.fail_reads.store(true, Ordering::SeqCst);
        assert!(!cache.refresh_list().await);
        assert_eq!(cache.conversations().await.len(), 2);
    }

    #[tokio::test]
    async fn failed_update_restores_value_at_original_index() {
        let api = FakeApi::with(&[detail("a", "A"), detail("b", "B"), detail("c", "C")]);
        let cache = ConversationCache::new(api.clone());
        cache.refresh_list().await;
        cache.load("b").await;

        api.fail_writes.store(true, Ordering::SeqCst);
        let result = cache.update("b", ConversationPatch::title("x")).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));

        let state = cache.snapshot().await;
        assert_eq!(state.conversations[1], conversation("b", "B"));
        assert_eq!(state.active.unwrap().conversation.title.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn update_is_reconciled_with_server_record() {
        let api = FakeApi::with(&[detail("a", "A")]);
        let cache = ConversationCache::new(api.clone());
        cache.refresh_list().await;

        let saved = cache.update("a", ConversationPatch::title("Renamed")).await.unwrap();
        assert_eq!(saved.updated_at, 42);
        assert_eq!(cache.conversations().await[0], saved);
    }

    #[tokio::test]
    async fn create_adopts_server_defaults() {
        let api = FakeApi::with(&[detail("a", "A")]);
        let cache = ConversationCache::new(api.clone());
        cache.refresh_list().await;

        let saved = cache.create(NewConversation::default()).await.unwrap();
        let state = cache.snapshot().await;
        assert_eq!(state.conversations[0], saved);
        assert_eq!(saved.title.as_deref(), Some("Server default"));
        assert!(state.cached[&saved.id].messages.is_empty());
    }

    #[tokio::test]
    async fn failed_create_removes_the_speculative_entry() {
        let api = FakeApi::with(&[detail("a", "A")]);
        api.fail_writes.store(true, Ordering::SeqCst);
        let cache = ConversationCache::new(api.clone());
        cache.refresh_list().await;

        assert!(cache.create(NewConversation::default()).await.is_err());
        let state = cache.snapshot().await;
        assert_eq!(state.conversations.len(), 1);
        assert_eq!(state.cached.len(), 0);
    }

    #[tokio::test]
    async fn failed_remove_reinserts_at_head_and_errors() {
        let api = FakeApi::with(&[detail("a", "A"), detail("b", "B")]);
        let cache = ConversationCache::new(api.clone());
        cache.refresh_list().await;
        cache.load("b").await;

        api.fail_writes.store(true, Ordering::SeqCst);
        assert!(cache.remove("b").await.is_err());

        let state = cache.snapshot().await;
        assert_eq!(state.conversations[0].id, "b");
        assert_eq!(state.conversations[1].id, "a");
        // The selection is not restored.
        assert!(state.active_id.is_none());
    }

    #[tokio::test]
    async fn remove_clears_selection_and_cache() {
        let api = FakeApi::with(&[detail("a", "A")]);
        let cache = ConversationCache::new(api.clone());
        cache.refresh_list().await;
        cache.load("a").await;

        cache.remove("a").await.unwrap();
        let state = cache.snapshot().await;
        assert!(state.conversations.is_empty());
        assert!(state.cached.is_empty());
        assert!(state.active.is_none());
    }
}
