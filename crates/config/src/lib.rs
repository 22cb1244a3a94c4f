//! Configuration loading and validation for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// SQLite database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Long-term memory and vector index
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Agent knowledge-base vault
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Chat pipeline tuning
    #[serde(default)]
    pub chat: ChatConfig,

    /// Prompt template overrides
    #[serde(default)]
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    3000
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file; `:memory:` keeps everything in process
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite page cache size
    #[serde(default = "default_cache_mb")]
    pub cache_mb: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    AppConfig::config_dir()
        .join("parley.db")
        .to_string_lossy()
        .into_owned()
}
fn default_cache_mb() -> u32 {
    64
}
fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            cache_mb: default_cache_mb(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Whether the vector search index is available in this process
    #[serde(default = "default_true")]
    pub vector_index: bool,

    /// OpenAI-compatible embeddings endpoint
    #[serde(default = "default_embeddings_url")]
    pub embeddings_url: String,

    /// Nearest memories injected into a chat turn
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

fn default_true() -> bool {
    true
}
fn default_embeddings_url() -> String {
    "https://openrouter.ai/api/v1/embeddings".into()
}
fn default_search_limit() -> usize {
    5
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            vector_index: true,
            embeddings_url: default_embeddings_url(),
            search_limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Root of the Obsidian vault that agent knowledge paths are relative to.
    /// Knowledge loading is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Model used when neither the conversation nor its agent names one
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,

    /// Upper bound on model/tool round trips in one turn
    #[serde(default = "default_max_tool_steps")]
    pub max_tool_steps: usize,

    /// Pause between smoothed word chunks
    #[serde(default = "default_smooth_delay_ms")]
    pub smooth_delay_ms: u64,

    /// Capacity of the response channel between the pipeline and the socket
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Characters kept when deriving a title from the reply
    #[serde(default = "default_title_len")]
    pub default_title_len: usize,

    /// Cap on generated titles
    #[serde(default = "default_max_title_len")]
    pub max_title_len: usize,

    /// Cap on memories stored per turn
    #[serde(default = "default_max_memories")]
    pub max_memories: usize,
}

fn default_fallback_model() -> String {
    "gpt-4o".into()
}
fn default_max_tool_steps() -> usize {
    50
}
fn default_smooth_delay_ms() -> u64 {
    10
}
fn default_stream_buffer() -> usize {
    64
}
fn default_title_len() -> usize {
    50
}
fn default_max_title_len() -> usize {
    80
}
fn default_max_memories() -> usize {
    5
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            fallback_model: default_fallback_model(),
            max_tool_steps: default_max_tool_steps(),
            smooth_delay_ms: default_smooth_delay_ms(),
            stream_buffer: default_stream_buffer(),
            default_title_len: default_title_len(),
            max_title_len: default_max_title_len(),
            max_memories: default_max_memories(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Directory holding `title.md` and `memory.md`; built-in prompts are
    /// used for any file that is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default location with env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Environment variable overrides (highest priority).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("PARLEY_DATABASE").filter(|v| !v.is_empty()) {
            self.database.path = path;
        }
        if let Some(port) = lookup("PARLEY_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(vault) = lookup("OBSIDIAN_VAULT_PATH").filter(|v| !v.is_empty()) {
            self.knowledge.vault_path = Some(PathBuf::from(vault));
        }
        if let Some(flag) = lookup("PARLEY_VECTOR_INDEX") {
            self.memory.vector_index = !matches!(flag.trim(), "0" | "false" | "off");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("server.port must be > 0".into()));
        }
        if self.chat.stream_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "chat.stream_buffer must be > 0".into(),
            ));
        }
        if self.chat.max_tool_steps == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_tool_steps must be > 0".into(),
            ));
        }
        if self.memory.search_limit == 0 {
            return Err(ConfigError::ValidationError(
                "memory.search_limit must be > 0".into(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
