//! Conversation and message endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use parley_core::conversation::{Conversation, ConversationDetail, ConversationPatch, NewConversation};
use serde_json::{Value, json};
use tracing::info;

use crate::SharedState;
use crate::error::ApiError;
use crate::extract::ApiJson;

/// `GET /api/conversations`, most recently updated first.
pub async fn list_conversations(
    State(state): State<SharedState>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(state.db.list_conversations().await?))
}

pub async fn create_conversation(
    State(state): State<SharedState>,
    ApiJson(new): ApiJson<NewConversation>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = state.db.create_conversation(new).await?;
    info!(id = %conversation.id, "Conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// `GET /api/conversations/{id}` with its messages in creation order.
pub async fn get_conversation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetail>, ApiError> {
    state
        .db
        .get_conversation_detail(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Conversation not found"))
}

pub async fn update_conversation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<ConversationPatch>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(state.db.update_conversation(&id, &patch).await?))
}

pub async fn delete_conversation(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.db.delete_conversation(&id).await?;
    info!(id = %id, "Conversation deleted");
    Ok(Json(json!({ "ok": true })))
}

/// `DELETE /api/messages/{id}`: drop a user message and everything after it.
pub async fn delete_message(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conversation_id = state.db.truncate_from(&id).await?;
    Ok(Json(json!({ "ok": true, "conversationId": conversation_id })))
}
