//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley chat backend.
//! Every other crate depends inward on this one.
//!
//! The seams are traits: [`Provider`] for chat completion, [`Embedder`] for
//! vectors, [`Tool`] for model-callable capabilities. Implementations live in
//! their own crates so tests can swap in mocks.

pub mod catalog;
pub mod conversation;
pub mod error;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use catalog::{Agent, KnowledgeFile, ProviderConfig, ToolConfig};
pub use conversation::{Conversation, ConversationDetail, ConversationPatch, NewConversation};
pub use error::{Error, MemoryError, ProviderError, Result, StoreError, ToolError};
pub use memory::{Embedder, EmbeddingRequest, EmbeddingResponse, MemoryCandidate, MemoryRecord, MemorySettings, MemorySettingsUpdate};
pub use message::{Message, MessageToolCall, Role, StoredMessage, UiMessage, UiPart};
pub use provider::{ChunkReceiver, Provider, ProviderFactory, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};

/// Current wall-clock time as epoch milliseconds, the timestamp unit of
/// every persisted record.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
