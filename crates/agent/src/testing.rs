//! Hand-written doubles shared by this crate's tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parley_core::catalog::ProviderConfig;
use parley_core::error::ProviderError;
use parley_core::memory::{Embedder, EmbeddingRequest, EmbeddingResponse};
use parley_core::message::Message;
use parley_core::provider::{
    ChunkReceiver, Provider, ProviderFactory, ProviderRequest, ProviderResponse, StreamChunk,
};

/// Three-wide vectors keyed on text length.
pub(crate) struct VecEmbedder;

#[async_trait]
impl Embedder for VecEmbedder {
    async fn embed(
        &self,
        _api_key: &str,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, ProviderError> {
        Ok(EmbeddingResponse {
            embeddings: request
                .inputs
                .iter()
                .map(|t| vec![1.0, t.len() as f32 / 10.0, 0.0])
                .collect(),
            model: request.model,
        })
    }
}

/// One scripted `stream()` call.
pub(crate) enum StreamScript {
    Open(Vec<Result<StreamChunk, ProviderError>>),
    Fail(ProviderError),
}

pub(crate) fn text(content: &str) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        content: Some(content.into()),
        ..Default::default()
    })
}

pub(crate) fn done() -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        done: true,
        ..Default::default()
    })
}

/// Replays scripted streams and completions in order and records every
/// request it receives.
pub(crate) struct ScriptedProvider {
    streams: Mutex<VecDeque<StreamScript>>,
    completions: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(streams: Vec<StreamScript>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
            completions: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_completions(self, completions: Vec<Result<String, ProviderError>>) -> Self {
        *self.completions.lock().unwrap() = completions.into();
        self
    }

    pub(crate) fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let next = self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("no scripted completion".into())));
        next.map(|content| ProviderResponse {
            message: Message::assistant(content),
            usage: None,
            model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Open(chunks)) => {
                let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
                for chunk in chunks {
                    let _ = tx.try_send(chunk);
                }
                Ok(rx)
            }
            Some(StreamScript::Fail(e)) => Err(e),
            None => Err(ProviderError::InvalidResponse("no scripted stream".into())),
        }
    }
}

/// Hands out one shared provider for every config.
pub(crate) struct SharedFactory(pub Arc<ScriptedProvider>);

impl ProviderFactory for SharedFactory {
    fn build(&self, _config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
        Ok(self.0.clone())
    }
}
