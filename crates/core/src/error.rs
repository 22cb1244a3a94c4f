//! Error enums, one per bounded context, plus the umbrella [`Error`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures talking to a chat or embedding endpoint.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Non-success status; `message` is the endpoint's own text when it sent one
    #[error("{message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The vector index is unavailable or memory is switched off.
    #[error("Memory unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid memory settings: {0}")]
    InvalidSettings(String),

    /// Dimension change requested while records exist.
    #[error("Delete existing memories before changing embedding dimensions ({count} stored)")]
    DimensionLocked { count: i64 },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: sent {expected} inputs, got {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
