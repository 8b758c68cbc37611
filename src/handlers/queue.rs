use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use crate::admission::{admit, validate_queue_request};
use crate::error::{ApiError, not_found};
use crate::models::{QueueRequest, QueueResponse};
use crate::state::AppState;

// POST /queue/add - returns as soon as the request is queued
pub async fn add_to_queue(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueueRequest>, JsonRejection>,
) -> Result<Json<QueueResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let valid = validate_queue_request(payload)?;
    let admitted = admit(&state, valid);

    Ok(Json(QueueResponse {
        status: "queued".to_string(),
        request_id: admitted.request_id,
        queue_position: admitted.position,
    }))
}

// GET /queue/status
pub async fn queue_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "queue_size": state.queue.len(),
        "stats": state.stats.snapshot(),
        "tracked_requests": state.tracker.len(),
    }))
}

// GET /request/{id}
pub async fn request_status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Response {
    match state.tracker.get(&request_id) {
        Some(record) => Json(record).into_response(),
        None => not_found(),
    }
}
