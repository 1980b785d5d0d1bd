//! Read-only HTTP endpoints
//!
//! The WebSocket carries all interactive traffic; these routes exist so
//! the CLI (and curl) can inspect the server without speaking the
//! protocol.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;
use crate::store::unix_now;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
    })
}

/// GET /lobby — tickets published after the 10 second quiet window,
/// minus anything stale.
pub async fn lobby_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.lock().await.store.clone();
    match store.list_lobby(unix_now()).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

/// GET /sessions — sessions still negotiating or live.
pub async fn sessions_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let store = state.lock().await.store.clone();
    match store.list_open_sessions().await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => store_error(e).into_response(),
    }
}

fn store_error(e: crate::store::StoreError) -> (StatusCode, Json<serde_json::Value>) {
    tracing::warn!(
        component = "http",
        event = "http.store_error",
        error = %e,
        "Store query failed"
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
}
