//! Web search through Google Programmable Search.
//!
//! Failures never raise: the model gets `{query, results: [], error}` and
//! can decide what to do next.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::Tool;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const GOOGLE_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
const MAX_RESULTS: u64 = 5;

pub struct WebSearchTool {
    api_key: String,
    engine_id: String,
    endpoint: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: impl Into<String>, engine_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            endpoint: GOOGLE_SEARCH_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.engine_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: String,
}

#[derive(Debug, Default, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    display_link: Option<String>,
}

impl From<GoogleItem> for SearchResult {
    fn from(item: GoogleItem) -> Self {
        Self {
            title: item.title.unwrap_or_default(),
            url: item.link.unwrap_or_default(),
            snippet: item.snippet.unwrap_or_default(),
            source: item.display_link.unwrap_or_default(),
        }
    }
}

fn failure(query: &str, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "query": query, "results": [], "error": message.into() })
}

/// Clamp the requested count into 1..=5; absent means 5.
fn result_limit(arguments: &serde_json::Value) -> u64 {
    arguments["maxResults"]
        .as_u64()
        .unwrap_or(MAX_RESULTS)
        .clamp(1, MAX_RESULTS)
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for up-to-date information using Google Programmable Search Engine."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query to look up on the web."
                },
                "maxResults": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 5,
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        if !self.is_configured() {
            return Ok(failure(query, "Web search is not configured"));
        }

        let limit = result_limit(&arguments);
        debug!(query, limit, "Web search");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", &limit.to_string()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Web search request failed");
                return Ok(failure(query, e.to_string()));
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Ok(failure(query, format!("Search failed with status {status}")));
        }

        let data: GoogleResponse = match response.json().await {
            Ok(d) => d,
            Err(e) => return Ok(failure(query, e.to_string())),
        };
        let results: Vec<SearchResult> = data.items.into_iter().map(SearchResult::from).collect();

        Ok(serde_json::json!({ "query": query, "results": results }))
    }
}
