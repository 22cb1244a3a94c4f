//! HTTP API for Parley.
//!
//! Routes:
//!
//! - `GET    /health`                 liveness plus vector index status
//! - `POST   /api/chat`               streamed chat turn (SSE)
//! - `GET    /api/conversations`      list conversations
//! - `POST   /api/conversations`      create a conversation
//! - `GET    /api/conversations/{id}` conversation with its messages
//! - `PUT    /api/conversations/{id}` partial update
//! - `DELETE /api/conversations/{id}` delete with its messages
//! - `DELETE /api/messages/{id}`      truncate from a user message
//! - `GET    /api/memory`             list memories
//! - `POST   /api/memory`             add a memory
//! - `PUT    /api/memory/{id}`        edit a memory
//! - `DELETE /api/memory/{id}`        delete a memory
//! - `GET    /api/memory/settings`    memory settings
//! - `PUT    /api/memory/settings`    update memory settings
//!
//! Built on Axum.

pub mod chat;
pub mod conversations;
pub mod error;
pub mod extract;
pub mod memory;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use parley_agent::{ChatService, ContextAssembler, Prompts};
use parley_config::AppConfig;
use parley_core::provider::ProviderFactory;
use parley_memory::MemoryStore;
use parley_providers::{HttpEmbedder, OpenAiCompatFactory};
use parley_store::{Database, DatabaseOptions};
use serde::Serialize;
use tracing::info;

pub use error::ApiError;

/// Shared application state.
pub struct AppState {
    pub db: Database,
    pub memory: Arc<MemoryStore>,
    pub chat: ChatService,
    pub max_body_bytes: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the chat pipeline around an open database and memory store.
    pub fn new(
        db: Database,
        memory: Arc<MemoryStore>,
        providers: Arc<dyn ProviderFactory>,
        config: &AppConfig,
    ) -> Self {
        let prompts = Arc::new(Prompts::new(config.prompts.dir.clone()));
        let assembler = Arc::new(ContextAssembler::new(
            db.clone(),
            memory.clone(),
            config.knowledge.vault_path.clone(),
            config.memory.search_limit,
        ));
        let chat = ChatService::new(
            db.clone(),
            memory.clone(),
            providers,
            prompts,
            assembler,
            config.chat.clone(),
        );
        Self {
            db,
            memory,
            chat,
            max_body_bytes: config.server.max_body_bytes,
        }
    }
}

/// Build the router with every route.
pub fn build_router(state: SharedState) -> Router {
    let max_body = state.max_body_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat::chat_handler))
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(conversations::get_conversation)
                .put(conversations::update_conversation)
                .delete(conversations::delete_conversation),
        )
        .route("/api/messages/{id}", delete(conversations::delete_message))
        .route(
            "/api/memory",
            get(memory::list_memories).post(memory::create_memory),
        )
        .route(
            "/api/memory/settings",
            get(memory::get_settings).put(memory::update_settings),
        )
        .route(
            "/api/memory/{id}",
            axum::routing::put(memory::update_memory).delete(memory::delete_memory),
        )
        .layer(DefaultBodyLimit::max(max_body))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the database and memory store, then serve until the process ends.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let db = Database::open(
        &config.database.path,
        &DatabaseOptions {
            cache_mb: config.database.cache_mb,
            max_connections: config.database.max_connections,
        },
    )
    .await?;
    let embedder = Arc::new(HttpEmbedder::new(config.memory.embeddings_url.clone()));
    let memory = Arc::new(MemoryStore::open(db.clone(), embedder, config.memory.vector_index).await?);
    let providers = Arc::new(OpenAiCompatFactory::new(config.chat.stream_buffer));

    let state = Arc::new(AppState::new(db, memory, providers, &config));
    let app = build_router(state);

    info!(
        addr = %addr,
        database = %config.database.path,
        vector_index = config.memory.vector_index,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    vector_index: bool,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        vector_index: state.memory.vector_index_enabled(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use parley_core::catalog::ProviderConfig;
    use parley_core::error::ProviderError;
    use parley_core::memory::{Embedder, EmbeddingRequest, EmbeddingResponse};
    use parley_core::message::Message;
    use parley_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    /// Replies with a fixed text.
    struct FixedProvider(&'static str);

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(self.0),
                usage: None,
                model: request.model,
            })
        }
    }

    struct FixedFactory(&'static str);

    impl ProviderFactory for FixedFactory {
        fn build(&self, _config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
            Ok(Arc::new(FixedProvider(self.0)))
        }
    }

    struct TinyEmbedder;

    #[async_trait]
    impl Embedder for TinyEmbedder {
        async fn embed(
            &self,
            _api_key: &str,
            request: EmbeddingRequest,
        ) -> Result<EmbeddingResponse, ProviderError> {
            Ok(EmbeddingResponse {
                embeddings: request.inputs.iter().map(|t| vec![1.0, t.len() as f32]).collect(),
                model: request.model,
            })
        }
    }

    async fn test_state() -> SharedState {
        let db = Database::in_memory().await.unwrap();
        db.upsert_provider(&ProviderConfig {
            id: "p1".into(),
            name: "OpenRouter".into(),
            api_key: "sk-test".into(),
            base_url: None,
        })
        .await
        .unwrap();
        let memory = Arc::new(MemoryStore::new(db.clone(), Arc::new(TinyEmbedder), true));
        let mut config = AppConfig::default();
        config.chat.smooth_delay_ms = 0;
        Arc::new(AppState::new(
            db,
            memory,
            Arc::new(FixedFactory("Hi there")),
            &config,
        ))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state().await);
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["vectorIndex"], true);
    }

    #[tokio::test]
    async fn conversation_crud() {
        let app = build_router(test_state().await);
        let (status, created) = send(
            &app,
            "POST",
            "/api/conversations",
            Some(json!({"id": "c1", "providerId": "p1", "title": "First"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["id"], "c1");

        let (status, updated) = send(
            &app,
            "PUT",
            "/api/conversations/c1",
            Some(json!({"title": "Renamed", "providerId": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "Renamed");
        assert!(updated.get("providerId").is_none_or(Value::is_null));

        let (_, list) = send(&app, "GET", "/api/conversations", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, detail) = send(&app, "GET", "/api/conversations/c1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(detail["messages"].as_array().unwrap().is_empty());

        let (status, body) = send(&app, "DELETE", "/api/conversations/c1", None).await;
        assert_eq!((status, body["ok"].clone()), (StatusCode::OK, json!(true)));

        let (status, body) = send(&app, "GET", "/api/conversations/c1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"statusCode": 404, "message": "Conversation not found"}));
    }

    #[tokio::test]
    async fn chat_validation_is_structured() {
        let app = build_router(test_state().await);
        let (status, body) = send(&app, "POST", "/api/chat", Some(json!({"messages": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "conversationId is required");

        let (status, body) = send(
            &app,
            "POST",
            "/api/chat",
            Some(json!({
                "conversationId": "missing",
                "messages": [{"id": "u1", "role": "user", "parts": [{"type": "text", "text": "hi"}]}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["statusCode"], 404);
    }

    #[tokio::test]
    async fn chat_streams_parts_and_done() {
        let state = test_state().await;
        let app = build_router(state.clone());
        send(
            &app,
            "POST",
            "/api/conversations",
            Some(json!({"id": "c1", "providerId": "p1"})),
        )
        .await;

        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "conversationId": "c1",
                    "messages": [{"id": "u1", "role": "user", "parts": [{"type": "text", "text": "hello"}]}]
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["x-vercel-ai-ui-message-stream"],
            "v1"
        );
        assert!(
            response.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let data: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .collect();
        assert_eq!(data.last(), Some(&"[DONE]"));
        let first: Value = serde_json::from_str(data[0]).unwrap();
        assert_eq!(first["type"], "start");
        assert_eq!(first["messageMetadata"]["xModel"], "gpt-4o");
        assert!(text.contains(r#""type":"finish""#));

        let (_, detail) = send(&app, "GET", "/api/conversations/c1", None).await;
        let messages = detail["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["content"], "Hi there");
        assert_eq!(detail["title"], "Hi there");
    }

    #[tokio::test]
    async fn bad_bodies_are_structured_errors() {
        let app = build_router(test_state().await);
        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["statusCode"], 400);
        assert!(body["message"].as_str().unwrap().contains("JSON"));

        send(&app, "POST", "/api/conversations", Some(json!({"id": "c1"}))).await;
        let (status, body) = send(
            &app,
            "PUT",
            "/api/conversations/c1",
            Some(json!({"title": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["statusCode"], 400);
    }

    #[tokio::test]
    async fn chat_accepts_null_tools() {
        let app = build_router(test_state().await);
        send(
            &app,
            "POST",
            "/api/conversations",
            Some(json!({"id": "c1", "providerId": "p1"})),
        )
        .await;

        let req = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "conversationId": "c1",
                    "messages": [{"id": "u1", "role": "user", "parts": [{"type": "text", "text": "hello"}]}],
                    "tools": null
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#""type":"finish""#));
    }

    #[tokio::test]
    async fn message_truncation() {
        let state = test_state().await;
        let app = build_router(state.clone());
        send(&app, "POST", "/api/conversations", Some(json!({"id": "c1"}))).await;
        let user = parley_core::message::StoredMessage::new("c1", parley_core::message::Role::User, "q");
        state.db.insert_message(&user).await.unwrap();

        let (status, body) = send(&app, "DELETE", &format!("/api/messages/{}", user.id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "conversationId": "c1"}));

        let (status, body) = send(&app, "DELETE", "/api/messages/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Message not found");
    }

    #[tokio::test]
    async fn memory_endpoints() {
        let app = build_router(test_state().await);

        let (status, body) = send(&app, "POST", "/api/memory", Some(json!({"title": " ", "content": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Title is required");

        let (status, body) = send(&app, "POST", "/api/memory", Some(json!({"title": "t", "content": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "OpenRouter API key is required");

        let (status, settings) = send(
            &app,
            "PUT",
            "/api/memory/settings",
            Some(json!({"apiKey": "k", "embeddingDimensions": 2, "enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settings["embeddingDimensions"], 2);

        let (status, _) = send(
            &app,
            "POST",
            "/api/memory",
            Some(json!({"title": "Pet", "content": "Has a dog", "source": "manual"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, list) = send(&app, "GET", "/api/memory", None).await;
        let id = list[0]["id"].as_str().unwrap().to_string();
        assert_eq!(list[0]["source"], "manual");

        let (status, _) = send(&app, "PUT", &format!("/api/memory/{id}"), Some(json!({"title": "Pets"}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, "PUT", "/api/memory/nope", Some(json!({"title": "x"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Memory not found");

        // Records exist, so the width is locked.
        let (status, _) = send(&app, "PUT", "/api/memory/settings", Some(json!({"embeddingDimensions": 3}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "DELETE", &format!("/api/memory/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, list) = send(&app, "GET", "/api/memory", None).await;
        assert!(list.as_array().unwrap().is_empty());
    }
}
