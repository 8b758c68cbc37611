use axum::extract::{Path, State};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;

use crate::error::not_found;
use crate::progress::{Progress, watch};
use crate::sse::{event_stream, json_event};
use crate::state::AppState;

// Minimal framing: {position}, {chunk}, {done}, {error}
fn frame(progress: Progress) -> Option<Event> {
    match progress {
        Progress::Admitted(_) | Progress::Started => None,
        Progress::Position(n) => Some(json_event(&json!({ "position": n }))),
        Progress::Fragment(text) => Some(json_event(&json!({ "chunk": text }))),
        Progress::Done => Some(json_event(&json!({ "done": true }))),
        Progress::Failed(message) => Some(json_event(&json!({ "error": message }))),
    }
}

// GET /stream/{id}
pub async fn stream_response(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Response {
    if state.tracker.get(&request_id).is_none() {
        return not_found();
    }

    let events = watch(state, request_id).filter_map(|p| async move { frame(p) });
    event_stream(events).into_response()
}
