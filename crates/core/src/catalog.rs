//! Collaborator records the chat pipeline reads but does not manage:
//! providers, agents, tools and agent knowledge files.

use serde::{Deserialize, Serialize};

/// An OpenAI-compatible endpoint with its credentials.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// A persona: system prompt plus default model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub base_model: String,
}

/// Kind tag stored in the `tools.type` column for web tools.
pub const WEB_NAVIGATE: &str = "web_navigate";

/// Credentials for the web tools.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// Google Programmable Search key
    #[serde(default)]
    pub api_key: String,
    /// Google Programmable Search engine id
    #[serde(default)]
    pub engine_id: String,
    #[serde(default)]
    pub tavily_api_key: String,
    pub enabled: bool,
}

impl std::fmt::Debug for ToolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("engine_id", &self.engine_id)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// A vault-relative file attached to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeFile {
    pub id: String,
    pub agent_id: String,
    pub file_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_debug_redacts_key() {
        let p = ProviderConfig {
            id: "p1".into(),
            name: "OpenRouter".into(),
            api_key: "sk-secret".into(),
            base_url: None,
        };
        let dbg = format!("{p:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("***"));
    }

    #[test]
    fn blank_key_is_missing() {
        let p = ProviderConfig {
            id: "p1".into(),
            name: "x".into(),
            api_key: "   ".into(),
            base_url: None,
        };
        assert!(!p.has_api_key());
    }

    #[test]
    fn tool_config_uses_type_field() {
        let json = serde_json::json!({
            "id": "t1", "type": "web_navigate", "name": "Web",
            "apiKey": "k", "engineId": "e", "tavilyApiKey": "tv", "enabled": true
        });
        let tool: ToolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(tool.kind, WEB_NAVIGATE);
        assert!(!format!("{tool:?}").contains("tv"));
    }
}
