//! Transport seam for the conversation cache.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::conversation::{
    Conversation, ConversationDetail, ConversationPatch, NewConversation,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::ClientError;

/// The conversation endpoints, as the cache sees them.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn list(&self) -> Result<Vec<Conversation>, ClientError>;

    async fn get(&self, id: &str) -> Result<ConversationDetail, ClientError>;

    async fn create(&self, conversation: &NewConversation) -> Result<Conversation, ClientError>;

    async fn update(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, ClientError>;

    async fn delete(&self, id: &str) -> Result<(), ClientError>;
}

/// [`ConversationApi`] over HTTP against a Parley gateway.
pub struct HttpConversationApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpConversationApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self::with_client(base_url, client)
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/conversations{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "Conversation API error");
        Err(ClientError::from_body(status.as_u16(), &body))
    }

    async fn json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, ClientError> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn list(&self) -> Result<Vec<Conversation>, ClientError> {
        Self::json(self.client.get(self.url(""))).await
    }

    async fn get(&self, id: &str) -> Result<ConversationDetail, ClientError> {
        Self::json(self.client.get(self.url(&format!("/{id}")))).await
    }

    async fn create(&self, conversation: &NewConversation) -> Result<Conversation, ClientError> {
        Self::json(self.client.post(self.url("")).json(conversation)).await
    }

    async fn update(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, ClientError> {
        Self::json(self.client.put(self.url(&format!("/{id}"))).json(patch)).await
    }

    async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let request = self.client.delete(self.url(&format!("/{id}")));
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = HttpConversationApi::new("http://localhost:3000/");
        assert_eq!(api.url(""), "http://localhost:3000/api/conversations");
        assert_eq!(api.url("/c1"), "http://localhost:3000/api/conversations/c1");
    }
}
