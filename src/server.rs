//! HTTP API for the returns assistant.
//!
//! - `GET  /api/chat/welcome`: greeting shown when the chat opens
//! - `POST /api/chat`: `{"message": "..."}` → `{response, explanation?, debug}`
//! - `OPTIONS /api/chat`: answered by the CORS layer
//! - `GET  /health`: server status
//!
//! Each chat request runs the blocking pipeline on a `spawn_blocking` worker
//! under a deadline. Dropping the request future (client gone, deadline hit)
//! trips the request's [`CancelToken`], which stops the worker at its next
//! checkpoint and kills any running engine process.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::cancel::CancelToken;
use crate::config::ServerConfig;
use crate::pipeline::Assistant;

/// Shared, read-only state behind every handler.
#[derive(Debug)]
pub struct AppState {
    assistant: Arc<Assistant>,
    welcome: String,
    request_timeout: Duration,
}

// ── Response types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    predicates: usize,
    backend: String,
}

#[derive(Serialize)]
struct WelcomeResponse {
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// An error reply: status code plus `{"error": ...}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn internal(message: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        predicates: state.assistant.schema().len(),
        backend: state.assistant.kb_name().to_string(),
    })
}

async fn welcome(State(state): State<Arc<AppState>>) -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: state.welcome.clone(),
    })
}

async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let message = read_message(&body)?;
    tracing::info!(message = %message, "chat request");

    let cancel = CancelToken::new();
    let guard = cancel.drop_guard();
    let assistant = Arc::clone(&state.assistant);
    let worker_cancel = cancel.clone();
    let task = tokio::task::spawn_blocking(move || assistant.answer(&message, &worker_cancel));

    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(Ok(reply))) => {
            guard.disarm();
            Ok(Json(reply).into_response())
        }
        Ok(Ok(Err(e))) => {
            guard.disarm();
            tracing::error!(error = %e, "chat request failed");
            Err(ApiError::internal(e.public_message()))
        }
        Ok(Err(join_err)) => {
            tracing::error!(error = %join_err, "chat worker panicked");
            Err(ApiError::internal(
                "Failed to process message due to an unexpected internal error.",
            ))
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = state.request_timeout.as_secs(),
                "chat request timed out, cancelling"
            );
            cancel.cancel();
            Err(ApiError::internal("The request timed out. Please try again."))
        }
    }
}

/// Extract a non-empty `message` string from the request body.
fn read_message(body: &[u8]) -> Result<String, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "request body is not JSON");
        ApiError::bad_request("Request body must be JSON.")
    })?;
    let Some(object) = value.as_object() else {
        return Err(ApiError::bad_request("Invalid request format."));
    };
    match object.get("message") {
        None | Some(serde_json::Value::Null) => {
            tracing::warn!("request without message");
            Err(ApiError::bad_request("No message provided"))
        }
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => {
            tracing::warn!("request with empty message");
            Err(ApiError::bad_request("No message provided"))
        }
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ApiError::bad_request("Invalid request format.")),
    }
}

// ── Router ────────────────────────────────────────────────────────────────

/// CORS: mirror the caller's Origin and allow credentials. The layer answers
/// every `OPTIONS` request itself.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Build the application router.
pub fn router(assistant: Arc<Assistant>, settings: &ServerConfig) -> Router {
    let state = Arc::new(AppState {
        assistant,
        welcome: settings.welcome_message.clone(),
        request_timeout: Duration::from_secs(settings.request_timeout_secs),
    });

    Router::new()
        .route("/health", get(health))
        .route("/api/chat/welcome", get(welcome))
        .route("/api/chat", post(chat))
        .layer(cors())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(assistant: Arc<Assistant>, settings: &ServerConfig) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.bind, settings.port);
    let app = router(assistant, settings);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("policy-bridge server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_of(body: &str) -> Result<String, (StatusCode, String)> {
        read_message(body.as_bytes()).map_err(|e| (e.status, e.message))
    }

    #[test]
    fn reads_message() {
        assert_eq!(message_of(r#"{"message":"hi"}"#).unwrap(), "hi");
    }

    #[test]
    fn rejects_bad_bodies() {
        assert_eq!(
            message_of("not json").unwrap_err().1,
            "Request body must be JSON."
        );
        assert_eq!(message_of("{}").unwrap_err().1, "No message provided");
        assert_eq!(
            message_of(r#"{"message":"  "}"#).unwrap_err().1,
            "No message provided"
        );
        assert_eq!(message_of("[1]").unwrap_err().1, "Invalid request format.");
        assert_eq!(
            message_of(r#"{"message":3}"#).unwrap_err(),
            (StatusCode::BAD_REQUEST, "Invalid request format.".to_string())
        );
    }
}
