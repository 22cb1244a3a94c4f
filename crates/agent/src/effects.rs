//! Post-stream effects of a chat turn.
//!
//! Runs once the provider call has settled, whether or not the client is
//! still reading:
//! 1. persist the assistant reply and bump the conversation
//! 2. extract memories and deliver the "memory saved" notice
//! 3. title an untitled conversation
//!
//! Steps 2 and 3 are best-effort. Their failures are logged and never undo
//! step 1 or each other.

use std::sync::Arc;
use std::time::Instant;

use parley_config::ChatConfig;
use parley_core::error::{ProviderError, Result};
use parley_core::memory::MemoryCandidate;
use parley_core::message::{Message, Role, StoredMessage};
use parley_core::provider::{Provider, ProviderRequest};
use parley_memory::MemoryStore;
use parley_store::Database;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::notify::{Delivery, MemoryNotice, NoticeSlot};
use crate::prompts::Prompts;
use crate::writer::StreamWriter;

/// What the stream produced, plus the per-request model overrides.
#[derive(Debug, Clone, Default)]
pub struct FinishedTurn {
    pub conversation_id: String,
    /// The conversation had a non-empty title before this turn
    pub had_title: bool,
    pub user_text: String,
    pub assistant_text: String,
    /// The chat model
    pub model: String,
    pub title_model: Option<String>,
    pub memory_model: Option<String>,
    pub task_model: Option<String>,
}

impl FinishedTurn {
    fn memory_model(&self) -> &str {
        pick(&self.memory_model)
            .or(pick(&self.task_model))
            .unwrap_or(&self.model)
    }

    fn title_model(&self) -> Option<&str> {
        pick(&self.title_model).or(pick(&self.task_model))
    }

    fn exchange(&self) -> String {
        format!("User: {}\nAssistant: {}", self.user_text, self.assistant_text)
    }
}

fn pick(model: &Option<String>) -> Option<&str> {
    model.as_deref().map(str::trim).filter(|m| !m.is_empty())
}

/// Outcome of [`PostStreamEffects::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct EffectsReport {
    pub persisted: bool,
    pub memories_stored: usize,
    pub notice: Delivery,
    /// Title written by this turn, if any
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Extraction {
    #[serde(default)]
    should_store: bool,
    #[serde(default)]
    memories: Vec<ExtractedMemory>,
}

#[derive(Debug, Deserialize)]
struct ExtractedMemory {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    source: Option<String>,
}

pub struct PostStreamEffects {
    db: Database,
    memory: Arc<MemoryStore>,
    prompts: Arc<Prompts>,
    config: ChatConfig,
}

impl PostStreamEffects {
    pub fn new(
        db: Database,
        memory: Arc<MemoryStore>,
        prompts: Arc<Prompts>,
        config: ChatConfig,
    ) -> Self {
        Self {
            db,
            memory,
            prompts,
            config,
        }
    }

    pub async fn run(
        &self,
        provider: &dyn Provider,
        turn: &FinishedTurn,
        writer: Option<&StreamWriter>,
    ) -> EffectsReport {
        let persisted = match self.persist_assistant(turn).await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(conversation_id = %turn.conversation_id, error = %e, "Failed to persist assistant message");
                false
            }
        };

        let mut slot = NoticeSlot::new();
        let memories_stored = match self.extract_memories(provider, turn, &mut slot).await {
            Ok(count) => count,
            Err(e) => {
                warn!(conversation_id = %turn.conversation_id, error = %e, "Memory extraction failed");
                0
            }
        };
        let notice = slot.deliver(writer).await;
        debug!(conversation_id = %turn.conversation_id, ?notice, "Memory notice");

        let title = match self.generate_title(provider, turn).await {
            Ok(title) => title,
            Err(e) => {
                warn!(conversation_id = %turn.conversation_id, error = %e, "Failed to set title");
                None
            }
        };

        EffectsReport {
            persisted,
            memories_stored,
            notice,
            title,
        }
    }

    /// Store non-blank reply text. The conversation timestamp moves either way.
    pub async fn persist_assistant(&self, turn: &FinishedTurn) -> Result<bool> {
        let persisted = if turn.assistant_text.trim().is_empty() {
            false
        } else {
            let message =
                StoredMessage::new(&turn.conversation_id, Role::Assistant, &turn.assistant_text);
            self.db.insert_message(&message).await?;
            true
        };
        self.db.touch_conversation(&turn.conversation_id).await?;
        Ok(persisted)
    }

    /// Ask the model what is worth remembering and store it. The first
    /// stored memory is stashed in `slot`. Returns the number stored.
    pub async fn extract_memories(
        &self,
        provider: &dyn Provider,
        turn: &FinishedTurn,
        slot: &mut NoticeSlot,
    ) -> Result<usize> {
        if turn.user_text.trim().is_empty() || turn.assistant_text.trim().is_empty() {
            return Ok(0);
        }
        let settings = self.memory.get_settings().await?;
        if !settings.enabled {
            return Ok(0);
        }

        let start = Instant::now();
        let model = turn.memory_model().to_string();
        let request = ProviderRequest::new(
            model.clone(),
            vec![
                Message::system(self.prompts.memory().await),
                Message::user(turn.exchange()),
            ],
        )
        .with_json_schema("memory_extraction", extraction_schema());
        let response = provider.complete(request).await?;
        let extraction: Extraction = serde_json::from_str(strip_fences(&response.message.content))?;

        if !extraction.should_store || extraction.memories.is_empty() {
            debug!(conversation_id = %turn.conversation_id, %model, "Nothing worth remembering");
            return Ok(0);
        }

        let default_source = format!("conversation:{}", turn.conversation_id);
        let candidates: Vec<MemoryCandidate> = extraction
            .memories
            .into_iter()
            .take(self.config.max_memories)
            .map(|m| MemoryCandidate {
                title: m.title,
                content: m.content,
                source: Some(
                    m.source
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| default_source.clone()),
                ),
            })
            .collect();

        let stored = self.memory.insert(candidates, &settings).await?;
        if let Some(first) = stored.first() {
            slot.stash(MemoryNotice {
                title: first.title.clone(),
                content: first.content.clone(),
            });
        }
        info!(
            conversation_id = %turn.conversation_id,
            %model,
            count = stored.len(),
            ms = start.elapsed().as_millis() as u64,
            "Memories extracted"
        );
        Ok(stored.len())
    }

    /// Title an untitled conversation from the reply, refined by the title
    /// model when one is configured. Never overwrites an existing title.
    pub async fn generate_title(
        &self,
        provider: &dyn Provider,
        turn: &FinishedTurn,
    ) -> Result<Option<String>> {
        let text = turn.assistant_text.trim();
        if turn.had_title || text.is_empty() {
            return Ok(None);
        }

        let mut title = default_title(text, self.config.default_title_len);
        if let Some(model) = turn.title_model() {
            match self.refine_title(provider, model, turn).await {
                Ok(Some(refined)) => title = refined,
                Ok(None) => {}
                Err(e) => {
                    warn!(conversation_id = %turn.conversation_id, model, error = %e, "Title generation failed, keeping default");
                }
            }
        }

        if self.db.set_title_if_absent(&turn.conversation_id, &title).await? {
            debug!(conversation_id = %turn.conversation_id, %title, "Conversation titled");
            Ok(Some(title))
        } else {
            Ok(None)
        }
    }

    async fn refine_title(
        &self,
        provider: &dyn Provider,
        model: &str,
        turn: &FinishedTurn,
    ) -> std::result::Result<Option<String>, ProviderError> {
        let request = ProviderRequest::new(
            model,
            vec![
                Message::system(self.prompts.title().await),
                Message::user(turn.exchange()),
            ],
        );
        let response = provider.complete(request).await?;
        let refined = response.message.content.trim();
        if refined.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            refined.chars().take(self.config.max_title_len).collect(),
        ))
    }
}

/// First `len` characters, with `...` when cut.
pub fn default_title(text: &str, len: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(len).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "shouldStore": { "type": "boolean" },
            "memories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "content": { "type": "string" },
                        "source": { "type": ["string", "null"] }
                    },
                    "required": ["title", "content", "source"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["shouldStore", "memories"],
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::DropReason;
    use crate::stream_event::StreamPart;
    use crate::testing::{ScriptedProvider, VecEmbedder};
    use parley_core::conversation::NewConversation;
    use parley_core::memory::MemorySettingsUpdate;

    async fn fixture() -> (PostStreamEffects, Database, Arc<MemoryStore>) {
        let db = Database::in_memory().await.unwrap();
        let memory = Arc::new(MemoryStore::new(db.clone(), Arc::new(VecEmbedder), true));
        db.create_conversation(NewConversation {
            id: Some("c1".into()),
            ..Default::default()
        })
        .await
        .unwrap();
        let effects = PostStreamEffects::new(
            db.clone(),
            memory.clone(),
            Arc::new(Prompts::builtin()),
            ChatConfig::default(),
        );
        (effects, db, memory)
    }

    async fn enable_memory(memory: &MemoryStore) {
        memory
            .update_settings(MemorySettingsUpdate {
                api_key: Some("key".into()),
                embedding_dimensions: Some(3),
                enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    fn turn(reply: &str) -> FinishedTurn {
        FinishedTurn {
            conversation_id: "c1".into(),
            user_text: "I have a dog called Rex".into(),
            assistant_text: reply.into(),
            model: "chat-model".into(),
            ..Default::default()
        }
    }

    #[test]
    fn default_title_truncates_by_chars() {
        assert_eq!(default_title("short", 50), "short");
        let long = "é".repeat(60);
        let title = default_title(&long, 50);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
        assert_eq!(default_title(&"a".repeat(50), 50), "a".repeat(50));
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn model_fallbacks() {
        let mut t = turn("x");
        assert_eq!(t.memory_model(), "chat-model");
        assert_eq!(t.title_model(), None);
        t.task_model = Some("task".into());
        assert_eq!(t.memory_model(), "task");
        assert_eq!(t.title_model(), Some("task"));
        t.memory_model = Some(" ".into());
        t.title_model = Some("titler".into());
        assert_eq!(t.memory_model(), "task");
        assert_eq!(t.title_model(), Some("titler"));
    }

    #[tokio::test]
    async fn persists_reply_and_default_title() {
        let (effects, db, _) = fixture().await;
        let provider = ScriptedProvider::new(vec![]);
        let reply = "Rex sounds like a wonderful companion, tell me more about him please";

        let report = effects.run(&provider, &turn(reply), None).await;
        assert!(report.persisted);
        assert_eq!(report.memories_stored, 0);
        assert_eq!(report.notice, Delivery::Dropped(DropReason::NothingPending));
        let expected = format!("{}...", &reply[..50]);
        assert_eq!(report.title.as_deref(), Some(expected.as_str()));

        let detail = db.get_conversation_detail("c1").await.unwrap().unwrap();
        assert_eq!(detail.messages.len(), 1);
        assert_eq!(detail.messages[0].role, Role::Assistant);
        assert_eq!(detail.conversation.title.as_deref(), Some(expected.as_str()));
        // Memory disabled and no title model: no secondary calls.
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn blank_reply_only_touches() {
        let (effects, db, _) = fixture().await;
        let before = db.get_conversation("c1").await.unwrap().unwrap().updated_at;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let provider = ScriptedProvider::new(vec![]);

        let report = effects.run(&provider, &turn("   "), None).await;
        assert!(!report.persisted);
        assert_eq!(report.title, None);
        let conv = db.get_conversation_detail("c1").await.unwrap().unwrap();
        assert!(conv.messages.is_empty());
        assert!(conv.conversation.updated_at > before);
    }

    #[tokio::test]
    async fn existing_title_is_kept() {
        let (effects, db, _) = fixture().await;
        db.set_title("c1", "Keep me").await.unwrap();
        let provider = ScriptedProvider::new(vec![]);
        let mut t = turn("Some reply");
        t.had_title = true;
        t.title_model = Some("titler".into());

        assert_eq!(effects.run(&provider, &t, None).await.title, None);
        let conv = db.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conv.title.as_deref(), Some("Keep me"));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn refined_title_is_trimmed_and_capped() {
        let (effects, _, _) = fixture().await;
        let long = format!("  {}  ", "T".repeat(100));
        let provider = ScriptedProvider::new(vec![]).with_completions(vec![Ok(long)]);
        let mut t = turn("A reply");
        t.title_model = Some("titler".into());

        let title = effects.generate_title(&provider, &t).await.unwrap().unwrap();
        assert_eq!(title, "T".repeat(80));
        let requests = provider.requests();
        assert_eq!(requests[0].model, "titler");
        assert_eq!(requests[0].messages[1].content, "User: I have a dog called Rex\nAssistant: A reply");
    }

    #[tokio::test]
    async fn failed_refinement_keeps_default() {
        let (effects, _, _) = fixture().await;
        let provider = ScriptedProvider::new(vec![]).with_completions(vec![Err(
            ProviderError::Network("offline".into()),
        )]);
        let mut t = turn("A reply");
        t.task_model = Some("task".into());

        let title = effects.generate_title(&provider, &t).await.unwrap();
        assert_eq!(title.as_deref(), Some("A reply"));
    }

    #[tokio::test]
    async fn extraction_stores_and_notifies() {
        let (effects, _, memory) = fixture().await;
        enable_memory(&memory).await;
        let json = r#"{"shouldStore":true,"memories":[
            {"title":"Pet","content":"The user has a dog named Rex","source":null},
            {"title":"Tagged","content":"Other fact","source":"manual"},
            {"title":"","content":"dropped","source":null}
        ]}"#;
        let provider = ScriptedProvider::new(vec![]).with_completions(vec![Ok(json.into())]);
        let (writer, mut rx) = StreamWriter::channel(8);
        let mut t = turn("Nice dog!");
        t.memory_model = Some("mem-model".into());
        t.had_title = true;

        let report = effects.run(&provider, &t, Some(&writer)).await;
        assert_eq!(report.memories_stored, 2);
        assert_eq!(report.notice, Delivery::Delivered);
        assert_eq!(
            rx.recv().await,
            Some(StreamPart::memory_saved("Pet", "The user has a dog named Rex"))
        );

        let stored = memory.list().await.unwrap();
        let pet = stored.iter().find(|m| m.title == "Pet").unwrap();
        assert_eq!(pet.source, "conversation:c1");
        let tagged = stored.iter().find(|m| m.title == "Tagged").unwrap();
        assert_eq!(tagged.source, "manual");

        let request = &provider.requests()[0];
        assert_eq!(request.model, "mem-model");
        assert_eq!(
            request.response_format.as_ref().unwrap()["json_schema"]["name"],
            "memory_extraction"
        );
    }

    #[tokio::test]
    async fn notice_dropped_when_client_gone() {
        let (effects, _, memory) = fixture().await;
        enable_memory(&memory).await;
        let json = r#"{"shouldStore":true,"memories":[{"title":"Pet","content":"Dog","source":null}]}"#;
        let provider = ScriptedProvider::new(vec![]).with_completions(vec![Ok(json.into())]);
        let (writer, rx) = StreamWriter::channel(8);
        drop(rx);
        let mut t = turn("Nice dog!");
        t.had_title = true;

        let report = effects.run(&provider, &t, Some(&writer)).await;
        assert_eq!(report.memories_stored, 1);
        assert_eq!(report.notice, Delivery::Dropped(DropReason::WriterClosed));
        assert_eq!(memory.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_does_not_block_title() {
        let (effects, db, memory) = fixture().await;
        enable_memory(&memory).await;
        let provider = ScriptedProvider::new(vec![])
            .with_completions(vec![Ok("not json".into())]);

        let report = effects.run(&provider, &turn("Hello there"), None).await;
        assert!(report.persisted);
        assert_eq!(report.memories_stored, 0);
        assert_eq!(report.title.as_deref(), Some("Hello there"));
        assert_eq!(memory.count().await.unwrap(), 0);
        let conv = db.get_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conv.title.as_deref(), Some("Hello there"));
    }

    #[tokio::test]
    async fn should_store_false_stores_nothing() {
        let (effects, _, memory) = fixture().await;
        enable_memory(&memory).await;
        let json = r#"{"shouldStore":false,"memories":[{"title":"x","content":"y","source":null}]}"#;
        let provider = ScriptedProvider::new(vec![]).with_completions(vec![Ok(json.into())]);
        let mut slot = NoticeSlot::new();

        let stored = effects
            .extract_memories(&provider, &turn("ok"), &mut slot)
            .await
            .unwrap();
        assert_eq!(stored, 0);
        assert!(slot.pending().is_none());
    }
}
