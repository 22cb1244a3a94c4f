//! The chat turn: validate, build context, stream, finalize.
//!
//! [`ChatService::start`] does everything up to and including opening the
//! first provider stream, so every failure before the first byte is an
//! ordinary [`ChatError`]. The rest runs on a spawned task that writes
//! [`StreamPart`]s into a bounded channel. That task keeps draining the
//! provider and runs the post-stream effects even after the reader is gone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_config::ChatConfig;
use parley_core::catalog::{Agent, WEB_NAVIGATE};
use parley_core::error::{ProviderError, StoreError};
use parley_core::message::{Message, MessageToolCall, Role, StoredMessage, UiMessage};
use parley_core::provider::{ChunkReceiver, Provider, ProviderFactory, ProviderRequest};
use parley_core::tool::{ToolCall, ToolRegistry};
use parley_memory::MemoryStore;
use parley_store::Database;
use parley_tools::web_registry;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::{AssemblyInput, ContextAssembler};
use crate::effects::{EffectsReport, FinishedTurn, PostStreamEffects};
use crate::prompts::Prompts;
use crate::smooth::WordSmoother;
use crate::stream_event::{MessageMetadata, StreamPart};
use crate::writer::StreamWriter;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// Missing keys or other setup the user has to fix
    #[error("{0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ChatError {
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Validation(_) | ChatError::Config(_) => 400,
            ChatError::NotFound(_) => 404,
            ChatError::Upstream(_) => 502,
            ChatError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        ChatError::Internal(e.to_string())
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub messages: Vec<UiMessage>,
    #[serde(default)]
    pub title_model: Option<String>,
    #[serde(default)]
    pub memory_model: Option<String>,
    #[serde(default)]
    pub task_model: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    /// `null` and absent both mean no tools.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

/// A started turn.
pub struct ChatStream {
    /// Model the turn runs on
    pub model: String,
    pub parts: mpsc::Receiver<StreamPart>,
    /// Resolves after finalization; `None` when the stream failed.
    pub done: JoinHandle<Option<EffectsReport>>,
}

pub struct ChatService {
    db: Database,
    providers: Arc<dyn ProviderFactory>,
    assembler: Arc<ContextAssembler>,
    effects: Arc<PostStreamEffects>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        db: Database,
        memory: Arc<MemoryStore>,
        providers: Arc<dyn ProviderFactory>,
        prompts: Arc<Prompts>,
        assembler: Arc<ContextAssembler>,
        config: ChatConfig,
    ) -> Self {
        let effects = Arc::new(PostStreamEffects::new(
            db.clone(),
            memory,
            prompts,
            config.clone(),
        ));
        Self {
            db,
            providers,
            assembler,
            effects,
            config,
        }
    }

    pub async fn start(&self, request: ChatRequest) -> Result<ChatStream, ChatError> {
        let conversation_id = request.conversation_id.trim().to_string();
        if conversation_id.is_empty() {
            return Err(ChatError::Validation("conversationId is required".into()));
        }
        if request.messages.is_empty() {
            return Err(ChatError::Validation("messages are required".into()));
        }

        let conversation = self
            .db
            .get_conversation(&conversation_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Conversation not found".into()))?;
        let provider_id = conversation
            .provider_id
            .as_deref()
            .ok_or_else(|| ChatError::Config("Conversation has no provider configured".into()))?;
        let provider_config = self
            .db
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Provider not found".into()))?;
        if !provider_config.has_api_key() {
            return Err(ChatError::Config(
                "Provider has no API key configured".into(),
            ));
        }

        let agent = match conversation.agent_id.as_deref() {
            Some(agent_id) => self.db.get_agent(agent_id).await?,
            None => None,
        };
        let model = resolve_model(
            conversation.model.as_deref(),
            agent.as_ref(),
            &self.config.fallback_model,
        );
        if conversation.model.as_deref() != Some(model.as_str()) {
            self.db.set_conversation_model(&conversation_id, &model).await?;
        }

        let user_text = self.record_user_message(&conversation_id, &request.messages).await?;

        let mut messages = self
            .assembler
            .assemble(AssemblyInput {
                agent: agent.as_ref(),
                time_zone: request.time_zone.as_deref(),
                query: &user_text,
            })
            .await;
        messages.extend(request.messages.iter().map(UiMessage::to_message));

        let tools = self.tools_for(request.tools.as_deref().unwrap_or_default()).await?;
        let provider = self.providers.build(&provider_config).map_err(|e| match e {
            ProviderError::NotConfigured(_) => {
                ChatError::Config("Provider has no API key configured".into())
            }
            other => ChatError::Upstream(other.to_string()),
        })?;

        let started = Instant::now();
        let first = provider
            .stream(provider_request(&model, &messages, &tools))
            .await
            .map_err(|e| {
                error!(conversation_id = %conversation_id, %model, error = %e, "Provider request failed");
                ChatError::Upstream(e.to_string())
            })?;
        info!(conversation_id = %conversation_id, %model, tools = tools.len(), "Chat stream opened");

        let (writer, parts) = StreamWriter::channel(self.config.stream_buffer);
        let turn = Turn {
            provider,
            tools,
            writer,
            messages,
            started,
            config: self.config.clone(),
            effects: self.effects.clone(),
            finished: FinishedTurn {
                conversation_id,
                had_title: conversation
                    .title
                    .as_deref()
                    .is_some_and(|t| !t.trim().is_empty()),
                user_text,
                assistant_text: String::new(),
                model: model.clone(),
                title_model: request.title_model,
                memory_model: request.memory_model,
                task_model: request.task_model,
            },
        };
        let done = tokio::spawn(turn.run(first));

        Ok(ChatStream { model, parts, done })
    }

    /// Persist the trailing user message unless its id is already stored.
    /// Returns its text.
    async fn record_user_message(
        &self,
        conversation_id: &str,
        messages: &[UiMessage],
    ) -> Result<String, ChatError> {
        let Some(last) = messages.last().filter(|m| m.role == Role::User) else {
            return Ok(String::new());
        };
        let text = last.first_text().unwrap_or_default().to_string();
        let mut stored = StoredMessage::new(conversation_id, Role::User, &text);
        if !last.id.trim().is_empty() {
            stored.id = last.id.clone();
        }
        if !self.db.insert_message_if_absent(&stored).await? {
            debug!(conversation_id, message_id = %stored.id, "User message already recorded");
        }
        Ok(text)
    }

    async fn tools_for(&self, requested: &[String]) -> Result<ToolRegistry, ChatError> {
        if !requested.iter().any(|t| t == WEB_NAVIGATE) {
            return Ok(ToolRegistry::new());
        }
        match self.db.enabled_tool(WEB_NAVIGATE).await? {
            Some(config) => Ok(web_registry(&config)),
            None => {
                debug!("Web tools requested but none configured");
                Ok(ToolRegistry::new())
            }
        }
    }
}

/// Conversation override, then the agent's model, then `fallback`.
pub fn resolve_model(conversation: Option<&str>, agent: Option<&Agent>, fallback: &str) -> String {
    conversation
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .or_else(|| {
            agent
                .map(|a| a.base_model.trim())
                .filter(|m| !m.is_empty())
        })
        .unwrap_or(fallback)
        .to_string()
}

fn provider_request(model: &str, messages: &[Message], tools: &ToolRegistry) -> ProviderRequest {
    let mut request = ProviderRequest::new(model, messages.to_vec()).with_tools(tools.definitions());
    request.stream = true;
    request
}

/// State owned by the spawned half of a turn.
struct Turn {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    writer: StreamWriter,
    messages: Vec<Message>,
    started: Instant,
    config: ChatConfig,
    effects: Arc<PostStreamEffects>,
    finished: FinishedTurn,
}

/// How one provider step ended.
enum Step {
    Text,
    ToolCalls(Vec<MessageToolCall>),
    Failed(ProviderError),
}

impl Turn {
    async fn run(mut self, first: ChunkReceiver) -> Option<EffectsReport> {
        let conversation_id = self.finished.conversation_id.clone();
        self.writer
            .send(StreamPart::Start {
                message_id: Uuid::new_v4().to_string(),
                message_metadata: MessageMetadata {
                    x_model: self.finished.model.clone(),
                },
            })
            .await;

        let max_steps = if self.tools.is_empty() {
            1
        } else {
            self.config.max_tool_steps.max(1)
        };
        let mut first_token = false;
        let mut rx = first;
        let mut step = 1;

        loop {
            self.writer.send(StreamPart::StartStep).await;
            let text_before = self.finished.assistant_text.len();
            let outcome = self.stream_step(&mut rx, &mut first_token).await;

            let calls = match outcome {
                Step::Failed(e) => {
                    error!(conversation_id = %conversation_id, step, error = %e, "Provider stream failed");
                    self.writer
                        .send(StreamPart::Error {
                            error_text: format!("Provider error: {e}"),
                        })
                        .await;
                    return None;
                }
                Step::Text => Vec::new(),
                Step::ToolCalls(calls) => calls,
            };

            if calls.is_empty() || self.tools.is_empty() || step >= max_steps {
                if !calls.is_empty() {
                    warn!(conversation_id = %conversation_id, step, "Tool step limit reached");
                }
                self.writer.send(StreamPart::FinishStep).await;
                break;
            }

            let step_text = self.finished.assistant_text[text_before..].to_string();
            self.run_tools(step_text, calls).await;
            self.writer.send(StreamPart::FinishStep).await;

            step += 1;
            let request = provider_request(&self.finished.model, &self.messages, &self.tools);
            rx = match self.provider.stream(request).await {
                Ok(rx) => rx,
                Err(e) => {
                    error!(conversation_id = %conversation_id, step, error = %e, "Provider request failed");
                    self.writer
                        .send(StreamPart::Error {
                            error_text: format!("Provider error: {e}"),
                        })
                        .await;
                    return None;
                }
            };
        }

        let report = self
            .effects
            .run(self.provider.as_ref(), &self.finished, Some(&self.writer))
            .await;
        self.writer.send(StreamPart::Finish).await;
        info!(
            conversation_id = %conversation_id,
            ms = self.started.elapsed().as_millis() as u64,
            steps = step,
            persisted = report.persisted,
            "Chat turn finished"
        );
        Some(report)
    }

    /// Drain one provider response, forwarding smoothed text.
    async fn stream_step(&mut self, rx: &mut ChunkReceiver, first_token: &mut bool) -> Step {
        let text_id = Uuid::new_v4().to_string();
        let mut smoother = WordSmoother::new();
        let mut text_open = false;
        let mut calls = Vec::new();

        while let Some(chunk) = rx.recv().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Step::Failed(e),
            };
            if let Some(content) = chunk.content.as_deref().filter(|c| !c.is_empty()) {
                if !*first_token {
                    *first_token = true;
                    info!(
                        conversation_id = %self.finished.conversation_id,
                        ms = self.started.elapsed().as_millis() as u64,
                        "First token"
                    );
                }
                self.finished.assistant_text.push_str(content);
                for word in smoother.push(content) {
                    self.emit_text(&text_id, &mut text_open, word).await;
                }
            }
            calls.extend(chunk.tool_calls);
            if chunk.done {
                break;
            }
        }

        if let Some(rest) = smoother.flush() {
            self.emit_text(&text_id, &mut text_open, rest).await;
        }
        if text_open {
            self.writer.send(StreamPart::TextEnd { id: text_id }).await;
        }

        if calls.is_empty() {
            Step::Text
        } else {
            Step::ToolCalls(calls)
        }
    }

    async fn emit_text(&self, id: &str, open: &mut bool, delta: String) {
        if !self.writer.is_open() {
            return;
        }
        if !*open {
            *open = true;
            self.writer
                .send(StreamPart::TextStart { id: id.to_string() })
                .await;
        }
        self.writer
            .send(StreamPart::TextDelta {
                id: id.to_string(),
                delta,
            })
            .await;
        if self.config.smooth_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.smooth_delay_ms)).await;
        }
    }

    /// Execute the step's tool calls and append the exchange to the history.
    async fn run_tools(&mut self, step_text: String, calls: Vec<MessageToolCall>) {
        self.messages
            .push(Message::assistant_tool_calls(step_text, calls.clone()));

        for call in calls {
            let arguments = serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
            self.writer
                .send(StreamPart::ToolInputAvailable {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: arguments.clone(),
                })
                .await;

            let started = Instant::now();
            let tool_call = ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments,
            };
            let output = match self.tools.execute(&tool_call).await {
                Ok(result) => result.output,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool call failed");
                    serde_json::json!({ "error": e.to_string() })
                }
            };
            debug!(
                tool = %call.name,
                ms = started.elapsed().as_millis() as u64,
                "Tool call finished"
            );

            self.writer
                .send(StreamPart::ToolOutputAvailable {
                    tool_call_id: call.id.clone(),
                    output: output.clone(),
                })
                .await;
            self.messages
                .push(Message::tool_result(call.id, output.to_string()));
        }
    }
}
