//! HTTP route handlers for the Atelier agent API.
//!
//! Agent failures are still replies: `/api/chat` answers 200 with an
//! explanatory `display_text`. Only malformed requests get an error status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::agent::ids::ConversationId;
use crate::chat::{ChatReply, HistoryEntry};

use super::state::AppState;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/conversations", post(create_conversation))
        .route("/api/chat", post(chat))
        .route("/api/conversations/{id}/messages", get(conversation_messages))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "atelier-agent",
        "version": env!("CARGO_PKG_VERSION"),
        "configured": state.coordinator.is_configured()
    }))
}

/// Conversation allocation request.
#[derive(Debug, Deserialize)]
pub struct ConversationRequest {
    /// Caller-chosen key identifying the end user.
    pub user_key: String,
}

/// Conversation allocation response.
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    /// Conversation id, possibly the "not usable" sentinel.
    pub conversation_id: ConversationId,
    /// Whether the id refers to a real conversation.
    pub usable: bool,
}

/// Return the conversation for a user, creating it on first use.
async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConversationRequest>,
) -> Result<Json<ConversationResponse>, (StatusCode, String)> {
    let user_key = request.user_key.trim();
    if user_key.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "user_key must not be empty".to_string()));
    }

    let conversation_id = state.coordinator.get_or_create_conversation(user_key).await;
    Ok(Json(ConversationResponse {
        usable: conversation_id.is_usable(),
        conversation_id,
    }))
}

/// Chat request.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Target conversation; resolved from `user_key` when absent.
    pub conversation_id: Option<ConversationId>,
    /// End-user key used when no conversation id is given.
    pub user_key: Option<String>,
    /// The user's message.
    pub message: String,
}

/// Send a message and return the agent's reply.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, String)> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message must not be empty".to_string()));
    }

    let conversation_id = match (request.conversation_id, request.user_key.as_deref()) {
        (Some(conversation_id), _) => conversation_id,
        (None, Some(user_key)) if !user_key.trim().is_empty() => {
            state.coordinator.get_or_create_conversation(user_key.trim()).await
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "either conversation_id or user_key is required".to_string(),
            ));
        }
    };

    Ok(Json(
        state
            .coordinator
            .send_for_display(&conversation_id, message)
            .await,
    ))
}

/// Return the ordered transcript of a conversation.
async fn conversation_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<Vec<HistoryEntry>> {
    let conversation_id = ConversationId::new(id);
    Json(state.coordinator.get_history_entries(&conversation_id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::fake::{ScriptedBackend, Step};
    use crate::agent::ids::WorkerId;
    use crate::agent::types::RunStatus;
    use crate::chat::ConversationCoordinator;
    use crate::config::AtelierConfig;
    use crate::worker::provisioning::WorkerStrategy;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn unconfigured_app() -> Router {
        let coordinator =
            ConversationCoordinator::from_config(&AtelierConfig::default()).unwrap();
        create_router(AppState::new(Arc::new(coordinator)))
    }

    fn scripted_app(backend: &Arc<ScriptedBackend>) -> Router {
        let mut config = AtelierConfig::default();
        config.worker.strategy = WorkerStrategy::Persistent {
            worker_id: Some(WorkerId::new("asst_main")),
        };
        let coordinator = ConversationCoordinator::new(backend.clone(), &config).unwrap();
        create_router(AppState::new(Arc::new(coordinator)))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |body| Body::from(body.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_reports_configuration() {
        let (status, body) = call(&unconfigured_app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["configured"], false);
    }

    #[tokio::test]
    async fn test_unconfigured_chat_still_replies() {
        let app = unconfigured_app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"user_key": "alice", "message": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            body["display_text"]
                .as_str()
                .is_some_and(|text| text.contains("not configured"))
        );

        let (status, body) = call(&app, "POST", "/api/conversations", Some(json!({"user_key": "alice"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["usable"], false);
    }

    #[tokio::test]
    async fn test_chat_requires_target() {
        let (status, _) = call(
            &unconfigured_app(),
            "POST",
            "/api/chat",
            Some(json!({"message": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_flow_over_http() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_run(
            vec![
                Step::Status(RunStatus::InProgress),
                Step::Status(RunStatus::Completed),
            ],
            Some("Added **red dress (M)** to your cart."),
        );
        let app = scripted_app(&backend);

        let (_, body) = call(&app, "POST", "/api/conversations", Some(json!({"user_key": "alice"}))).await;
        assert_eq!(body["usable"], true);
        let conversation_id = body["conversation_id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            "/api/chat",
            Some(json!({"conversation_id": conversation_id, "message": "red dress, M"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["display_text"],
            "Added <strong>red dress (M)</strong> to your cart."
        );

        let uri = format!("/api/conversations/{conversation_id}/messages");
        let (status, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["is_user"], true);
        assert_eq!(entries[1]["text"], "Added **red dress (M)** to your cart.");
    }
}
