//! `POST /api/chat`: one streamed chat turn.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use parley_agent::ChatRequest;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::SharedState;
use crate::error::ApiError;
use crate::extract::ApiJson;

pub const STREAM_PROTOCOL_HEADER: HeaderName =
    HeaderName::from_static("x-vercel-ai-ui-message-stream");
pub const DONE: &str = "[DONE]";

/// Each part is one `data:` event; the stream always ends with `[DONE]`.
/// Errors before the provider stream opens come back as plain JSON errors.
pub async fn chat_handler(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    info!(
        conversation_id = %request.conversation_id,
        messages = request.messages.len(),
        "Chat request"
    );
    let stream = state.chat.start(request).await?;

    let events = ReceiverStream::new(stream.parts)
        .map(|part| {
            let data = serde_json::to_string(&part).unwrap_or_default();
            Ok::<_, Infallible>(Event::default().data(data))
        })
        .chain(tokio_stream::once(Ok(Event::default().data(DONE))));

    Ok((
        [(STREAM_PROTOCOL_HEADER, HeaderValue::from_static("v1"))],
        Sse::new(events),
    ))
}
