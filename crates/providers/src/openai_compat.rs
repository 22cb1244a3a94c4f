//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming, optionally with a JSON schema)
//! - Streaming SSE, passed through [`ReasoningFilter`] before decoding
//! - Tool use / function calling

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parley_core::catalog::ProviderConfig;
use parley_core::error::ProviderError;
use parley_core::message::{Message, MessageToolCall, Role};
use parley_core::provider::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::base_url::resolve_base_url;
use crate::sse_filter::ReasoningFilter;

/// Shared HTTP client. No overall timeout: streamed replies can run for minutes.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Map a non-success status to a provider error, preserving the body.
pub(crate) async fn map_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    match status {
        200..=299 => Ok(response),
        429 => Err(ProviderError::RateLimited {
            retry_after_secs: response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }),
        401 | 403 => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::AuthenticationFailed(if body.is_empty() {
                "Invalid API key or insufficient permissions".into()
            } else {
                body
            }))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Provider returned error");
            Err(ProviderError::ApiError {
                status_code: status,
                message: api_error_message(&body),
            })
        }
    }
}

/// Pull `error.message` out of an OpenAI-style error body, else the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_owned))
        .unwrap_or_else(|| body.to_string())
}

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    stream_buffer: usize,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider. `base_url` is used as given
    /// apart from trailing slashes.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self::with_client(name, base_url, api_key, http_client())
    }

    pub fn with_client(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            stream_buffer: 64,
        }
    }

    /// Build from a stored provider row, normalizing its base URL.
    pub fn from_config(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self::with_client(
            config.name.clone(),
            resolve_base_url(config.base_url.as_deref()),
            config.api_key.clone(),
            client,
        )
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": stream,
        });
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if let Some(format) = &request.response_format {
            body["response_format"] = format.clone();
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = map_status(response).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let tool_calls: Vec<MessageToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| MessageToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let message = Message {
            role: Role::Assistant,
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            tool_call_id: None,
        };

        Ok(ProviderResponse {
            message,
            usage: api_response.usage.map(Usage::from),
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = map_status(response).await?;

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let provider_name = self.name.clone();

        // Bytes -> reasoning filter -> SSE decoder -> chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut filter = ReasoningFilter::new();
            let mut decoder = ChunkDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                let filtered = filter.push_bytes(&bytes);
                for line in filtered.lines() {
                    match decoder.decode_line(line) {
                        Decoded::Skip => {}
                        Decoded::Chunk(chunk) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        Decoded::Done(chunk) => {
                            let _ = tx.send(Ok(chunk)).await;
                            return;
                        }
                        Decoded::Failed(err) => {
                            warn!(provider = %provider_name, error = %err, "Provider reported error mid-stream");
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let rest = filter.finish();
            let last = match decoder.decode_line(&rest) {
                Decoded::Chunk(chunk) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                    decoder.finish()
                }
                Decoded::Done(chunk) => chunk,
                Decoded::Failed(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
                Decoded::Skip => decoder.finish(),
            };
            trace!(provider = %provider_name, "Stream ended without [DONE]");
            let _ = tx.send(Ok(last)).await;
        });

        Ok(rx)
    }
}

/// Builds [`OpenAiCompatProvider`]s from stored provider rows, sharing one
/// connection pool.
pub struct OpenAiCompatFactory {
    client: reqwest::Client,
    stream_buffer: usize,
}

impl OpenAiCompatFactory {
    pub fn new(stream_buffer: usize) -> Self {
        Self {
            client: http_client(),
            stream_buffer,
        }
    }
}

impl Default for OpenAiCompatFactory {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ProviderFactory for OpenAiCompatFactory {
    fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
        if !config.has_api_key() {
            return Err(ProviderError::NotConfigured(format!(
                "Provider '{}' has no API key",
                config.name
            )));
        }
        Ok(Arc::new(
            OpenAiCompatProvider::from_config(config, self.client.clone())
                .with_stream_buffer(self.stream_buffer),
        ))
    }
}

// --- SSE decoding ---

enum Decoded {
    Skip,
    Chunk(StreamChunk),
    Done(StreamChunk),
    Failed(ProviderError),
}

/// Turns filtered `data:` lines into stream chunks, accumulating tool-call
/// deltas by index until the step finishes.
#[derive(Default)]
struct ChunkDecoder {
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    /// Latest usage seen; some providers repeat it on every chunk.
    usage: Option<Usage>,
}

impl ChunkDecoder {
    fn decode_line(&mut self, line: &str) -> Decoded {
        let line = line.trim_end_matches('\r');

        // Skip empty lines and SSE comments
        if line.is_empty() || line.starts_with(':') {
            return Decoded::Skip;
        }
        let Some(data) = line.strip_prefix("data: ") else {
            return Decoded::Skip;
        };
        let data = data.trim();

        if data == "[DONE]" {
            return Decoded::Done(self.finish());
        }

        let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
            Ok(r) => r,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return Decoded::Skip;
            }
        };

        if let Some(error) = stream_resp.error {
            let message = error["message"]
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            return Decoded::Failed(ProviderError::StreamInterrupted(message));
        }

        let mut content = None;
        if let Some(choice) = stream_resp.choices.into_iter().next() {
            for tc_delta in choice.delta.tool_calls.unwrap_or_default() {
                let acc = self.tool_calls.entry(tc_delta.index).or_default();
                if let Some(id) = tc_delta.id {
                    acc.id = id;
                }
                if let Some(func) = tc_delta.function {
                    if let Some(name) = func.name {
                        acc.name = name;
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
            }
            content = choice.delta.content.filter(|c| !c.is_empty());
        }

        // Only `[DONE]` or the end of the body finishes the stream.
        if let Some(usage) = stream_resp.usage {
            self.usage = Some(usage.into());
        }

        match content {
            Some(text) => Decoded::Chunk(StreamChunk {
                content: Some(text),
                ..Default::default()
            }),
            None => Decoded::Skip,
        }
    }

    /// Final chunk carrying every completed tool call in index order.
    fn finish(&mut self) -> StreamChunk {
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_values()
            .filter(|acc| !acc.name.is_empty())
            .map(ToolCallAccumulator::into_tool_call)
            .collect();
        StreamChunk {
            content: None,
            tool_calls,
            done: true,
            usage: self.usage.take(),
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> MessageToolCall {
        MessageToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}
