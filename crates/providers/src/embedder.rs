//! HTTP embeddings client for OpenAI-compatible `/embeddings` endpoints.

use async_trait::async_trait;
use parley_core::error::ProviderError;
use parley_core::memory::{Embedder, EmbeddingRequest, EmbeddingResponse};
use serde::Deserialize;
use tracing::debug;

use crate::openai_compat::{http_client, map_status};

/// Posts `{model, input}` to a fixed embeddings URL.
pub struct HttpEmbedder {
    url: String,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, http_client())
    }

    pub fn with_client(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(
        &self,
        api_key: &str,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "An API key is required for embeddings".into(),
            ));
        }

        debug!(
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let response = map_status(response).await?;

        let payload: EmbeddingApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("embeddings: {e}")))?;

        Ok(payload.into_response(request.model))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingApiResponse {
    /// Order by `index` when the server provides one; entries without a
    /// vector are dropped so the caller's count check catches them.
    fn into_response(mut self, requested_model: String) -> EmbeddingResponse {
        if self.data.iter().all(|d| d.index.is_some()) {
            self.data.sort_by_key(|d| d.index);
        }
        EmbeddingResponse {
            embeddings: self.data.into_iter().filter_map(|d| d.embedding).collect(),
            model: self.model.unwrap_or(requested_model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_embedding_response_in_index_order() {
        let data = r#"{
            "data": [
                {"embedding": [0.4, 0.5], "index": 1},
                {"embedding": [0.1, 0.2], "index": 0}
            ],
            "model": "text-embedding-3-small"
        }"#;
        let parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        let resp = parsed.into_response("fallback".into());
        assert_eq!(resp.embeddings, vec![vec![0.1, 0.2], vec![0.4, 0.5]]);
        assert_eq!(resp.model, "text-embedding-3-small");
    }

    #[test]
    fn missing_vectors_are_dropped() {
        let data = r#"{"data": [{"embedding": [1.0]}, {}]}"#;
        let parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        let resp = parsed.into_response("m".into());
        assert_eq!(resp.embeddings.len(), 1);
        assert_eq!(resp.model, "m");
    }

    #[tokio::test]
    async fn blank_key_fails_before_network() {
        let embedder = HttpEmbedder::new("http://127.0.0.1:9/embeddings");
        let err = embedder
            .embed(
                "",
                EmbeddingRequest {
                    model: "m".into(),
                    inputs: vec!["x".into()],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
