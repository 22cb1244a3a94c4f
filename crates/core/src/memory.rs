//! Long-term memory records, settings and the embedding seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A stored memory. The embedding lives only in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Where the memory came from, e.g. `conversation:<id>`
    pub source: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// Cosine distance to the query (search results only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// A memory proposed by extraction or by a manual insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MemoryCandidate {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Row id of the singleton settings record.
pub const DEFAULT_SETTINGS_ID: &str = "default";
pub const DEFAULT_EMBEDDING_MODEL: &str = "openai/text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Singleton memory configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySettings {
    pub id: String,
    pub api_key: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            id: DEFAULT_SETTINGS_ID.into(),
            api_key: String::new(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.into(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            enabled: false,
            created_at: 0,
            updated_at: 0,
        }
    }
}

impl MemorySettings {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Enabled and able to call the embedding service.
    pub fn is_active(&self) -> bool {
        self.enabled && self.has_api_key()
    }
}

impl std::fmt::Debug for MemorySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySettings")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Partial settings update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySettingsUpdate {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub embedding_dimensions: Option<i64>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// The model to use (e.g. "openai/text-embedding-3-small").
    pub model: String,

    /// The texts to embed.
    pub inputs: Vec<String>,
}

/// An embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The embedding vectors, one per input text, in input order.
    pub embeddings: Vec<Vec<f32>>,

    /// Which model was used.
    pub model: String,
}

/// Turns text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(
        &self,
        api_key: &str,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_schema_defaults() {
        let s = MemorySettings::default();
        assert_eq!(s.id, "default");
        assert_eq!(s.embedding_model, "openai/text-embedding-3-small");
        assert_eq!(s.embedding_dimensions, 1536);
        assert!(!s.enabled);
        assert!(!s.is_active());
    }

    #[test]
    fn enabled_without_key_is_inactive() {
        let s = MemorySettings {
            enabled: true,
            api_key: " ".into(),
            ..Default::default()
        };
        assert!(!s.is_active());
    }

    #[test]
    fn settings_debug_redacts_key() {
        let s = MemorySettings {
            api_key: "or-key".into(),
            ..Default::default()
        };
        assert!(!format!("{s:?}").contains("or-key"));
    }

    #[test]
    fn record_skips_missing_distance() {
        let r = MemoryRecord {
            id: "m1".into(),
            title: "t".into(),
            content: "c".into(),
            source: String::new(),
            created_at: 1,
            updated_at: 1,
            distance: None,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("distance").is_none());
        assert_eq!(json["createdAt"], 1);
    }
}
