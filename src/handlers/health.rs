use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;

use crate::metrics;
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// GET /
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "running",
        "message": "LLM queue broker (with queue position feedback)",
        "version": VERSION,
    }))
}

// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "downstream_url": state.downstream.url,
        "downstream_healthy": state.downstream.is_healthy(),
        "queue_size": state.queue.len(),
        "stats": state.stats.snapshot(),
        "version": VERSION,
        "features": ["sse_queue_position_comments"],
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
