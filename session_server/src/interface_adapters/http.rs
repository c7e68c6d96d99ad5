// Shared HTTP response types and the plain HTTP routes.

use crate::interface_adapters::protocol::SnapshotDto;
use crate::interface_adapters::state::AppState;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use std::sync::Arc;

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    // Human-readable error string for consistent JSON error responses.
    pub error: String,
}

#[derive(Debug, serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    session_id: String,
}

// Latest published snapshot; the same state a newly joined peer would receive.
pub async fn state_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.session.is_closed() {
        let body = ErrorResponse {
            error: "session closed".to_string(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }

    let snapshot = SnapshotDto::from(state.session.snapshot());
    (StatusCode::OK, Json(snapshot)).into_response()
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if state.session.is_closed() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = HealthResponse {
        status: if status == StatusCode::OK { "ok" } else { "closed" },
        session_id: state.session.session_id.to_string(),
    };
    (status, Json(body))
}
