//! Page extraction through Tavily Extract.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::Tool;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const TAVILY_EXTRACT_URL: &str = "https://api.tavily.com/extract";
const MAX_URLS: usize = 20;

pub struct WebReadTool {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl WebReadTool {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: TAVILY_EXTRACT_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// One URL or a list, as the model supplies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Urls {
    One(String),
    Many(Vec<String>),
}

impl Urls {
    fn as_slice(&self) -> &[String] {
        match self {
            Urls::One(url) => std::slice::from_ref(url),
            Urls::Many(urls) => urls,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadArgs {
    urls: Urls,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    chunks_per_source: Option<u8>,
    #[serde(default)]
    extract_depth: Option<String>,
    #[serde(default)]
    include_images: Option<bool>,
    #[serde(default)]
    include_favicon: Option<bool>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    timeout: Option<u32>,
}

/// Request body in Tavily's snake_case; unset options are omitted.
#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    urls: &'a Urls,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks_per_source: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extract_depth: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_images: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_favicon: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u32>,
}

impl ReadArgs {
    fn validate(&self) -> Result<(), String> {
        let urls = self.urls.as_slice();
        if urls.is_empty() || urls.len() > MAX_URLS {
            return Err(format!("Provide between 1 and {MAX_URLS} URLs"));
        }
        if let Some(bad) = urls
            .iter()
            .find(|u| !u.starts_with("http://") && !u.starts_with("https://"))
        {
            return Err(format!("Invalid URL: {bad}"));
        }
        if let Some(depth) = &self.extract_depth
            && !matches!(depth.as_str(), "basic" | "advanced")
        {
            return Err(format!("Invalid extractDepth: {depth}"));
        }
        if let Some(format) = &self.format
            && !matches!(format.as_str(), "markdown" | "text")
        {
            return Err(format!("Invalid format: {format}"));
        }
        Ok(())
    }

    fn request(&self) -> ExtractRequest<'_> {
        ExtractRequest {
            urls: &self.urls,
            query: self.query.as_deref(),
            chunks_per_source: self.chunks_per_source.map(|n| n.clamp(1, 5)),
            extract_depth: self.extract_depth.as_deref(),
            include_images: self.include_images,
            include_favicon: self.include_favicon,
            format: self.format.as_deref(),
            timeout: self.timeout.map(|t| t.clamp(1, 60)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    results: Vec<ExtractedPage>,
    #[serde(default)]
    failed_results: Vec<FailedPage>,
    #[serde(default)]
    response_time: Option<f64>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractedPage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    raw_content: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    favicon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FailedPage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ExtractResponse {
    fn into_output(self) -> serde_json::Value {
        let results: Vec<_> = self
            .results
            .into_iter()
            .map(|page| {
                serde_json::json!({
                    "url": page.url.unwrap_or_default(),
                    "content": page.raw_content.unwrap_or_default(),
                    "images": page.images,
                    "favicon": page.favicon,
                })
            })
            .collect();
        let failed: Vec<_> = self
            .failed_results
            .into_iter()
            .map(|page| {
                serde_json::json!({
                    "url": page.url.unwrap_or_default(),
                    "error": page.error.unwrap_or_default(),
                })
            })
            .collect();
        serde_json::json!({
            "results": results,
            "failedResults": failed,
            "responseTime": self.response_time,
            "usage": self.usage,
            "requestId": self.request_id,
        })
    }
}

fn failure(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

#[async_trait]
impl Tool for WebReadTool {
    fn name(&self) -> &str {
        "web_read"
    }

    fn description(&self) -> &str {
        "Extract web page content from one or more URLs using Tavily Extract."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "urls": {
                    "description": "One URL or a list of URLs to extract content from.",
                    "anyOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "string" }, "minItems": 1, "maxItems": 20 }
                    ]
                },
                "query": {
                    "type": "string",
                    "description": "Optional intent for reranking extracted chunks."
                },
                "chunksPerSource": { "type": "integer", "minimum": 1, "maximum": 5 },
                "extractDepth": { "type": "string", "enum": ["basic", "advanced"] },
                "includeImages": { "type": "boolean" },
                "includeFavicon": { "type": "boolean" },
                "format": { "type": "string", "enum": ["markdown", "text"] },
                "timeout": { "type": "integer", "minimum": 1, "maximum": 60 }
            },
            "required": ["urls"]
        })
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let args: ReadArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        args.validate().map_err(ToolError::InvalidArguments)?;

        if self.api_key.trim().is_empty() {
            return Ok(failure("Web read is not configured"));
        }

        debug!(count = args.urls.as_slice().len(), "Web read");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&args.request())
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Web read request failed");
                return Ok(failure(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Ok(serde_json::json!({
                "error": format!("Extract failed with status {}", status.as_u16()),
                "detail": detail,
            }));
        }

        match response.json::<ExtractResponse>().await {
            Ok(data) => Ok(data.into_output()),
            Err(e) => Ok(failure(e.to_string())),
        }
    }
}
