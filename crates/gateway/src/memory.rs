//! Memory management endpoints.

use axum::extract::{Path, State};
use axum::response::Json;
use parley_core::memory::{MemoryCandidate, MemoryRecord, MemorySettings, MemorySettingsUpdate};
use parley_memory::MemoryPatch;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::SharedState;
use crate::error::ApiError;
use crate::extract::ApiJson;

#[derive(Debug, Deserialize)]
pub struct NewMemory {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
}

pub async fn list_memories(
    State(state): State<SharedState>,
) -> Result<Json<Vec<MemoryRecord>>, ApiError> {
    Ok(Json(state.memory.list().await?))
}

/// Manual insert. Needs an embedding key even while memory is disabled.
pub async fn create_memory(
    State(state): State<SharedState>,
    ApiJson(body): ApiJson<NewMemory>,
) -> Result<Json<Value>, ApiError> {
    if body.title.trim().is_empty() {
        return Err(ApiError::bad_request("Title is required"));
    }
    if body.content.trim().is_empty() {
        return Err(ApiError::bad_request("Content is required"));
    }
    let settings = state.memory.get_settings().await?;
    if !settings.has_api_key() {
        return Err(ApiError::bad_request("OpenRouter API key is required"));
    }

    let candidate = MemoryCandidate {
        title: body.title,
        content: body.content,
        source: body.source,
    };
    let stored = state.memory.insert(vec![candidate], &settings).await?;
    info!(count = stored.len(), "Memory added manually");
    Ok(Json(json!({ "ok": true })))
}

pub async fn update_memory(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<MemoryPatch>,
) -> Result<Json<Value>, ApiError> {
    state.memory.update(&id, patch).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn delete_memory(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.memory.delete(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn get_settings(
    State(state): State<SharedState>,
) -> Result<Json<MemorySettings>, ApiError> {
    Ok(Json(state.memory.get_settings().await?))
}

pub async fn update_settings(
    State(state): State<SharedState>,
    ApiJson(update): ApiJson<MemorySettingsUpdate>,
) -> Result<Json<MemorySettings>, ApiError> {
    Ok(Json(state.memory.update_settings(update).await?))
}
