//! OpenAI-compatible surface.
//!
//! Streaming calls carry queue feedback as SSE comments ahead of the
//! usual `chat.completion.chunk` events:
//!
//! ```text
//! : queue_entered=5
//! : queue_position=3
//! : queue_position=0
//! data: {"id":"chatcmpl-...","choices":[{"delta":{"content":"Hi"}}]}
//! data: [DONE]
//! ```
//!
//! Blocking calls have no channel for that, they just wait.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use crate::admission::{admit, validate_openai_request};
use crate::client::CompletionError;
use crate::error::{ApiError, ErrorBody};
use crate::models::{
    AssistantMessage, ChatChoice, ChatResponse, ChatStreamChoice, ChatStreamChunk,
    ChatStreamDelta, Usage,
};
use crate::progress::{Progress, watch};
use crate::sse::{data_event, event_stream, json_event, sideband};
use crate::state::AppState;
use crate::tracker::{RequestState, StatusRecord};

const BLOCKING_POLL: Duration = Duration::from_millis(100);

struct ChunkContext {
    id: String,
    model: String,
    created: i64,
}

impl ChunkContext {
    fn chunk(&self, content: Option<String>, finish_reason: Option<&str>) -> ChatStreamChunk {
        ChatStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatStreamChoice {
                index: 0,
                delta: ChatStreamDelta {
                    role: None,
                    content,
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }
}

fn frame(progress: Progress, ctx: &ChunkContext) -> Vec<Event> {
    match progress {
        Progress::Admitted(n) => vec![sideband("queue_entered", n)],
        Progress::Position(n) => vec![sideband("queue_position", n)],
        Progress::Started => vec![sideband("queue_position", 0)],
        Progress::Fragment(text) => vec![json_event(&ctx.chunk(Some(text), None))],
        Progress::Done => vec![json_event(&ctx.chunk(None, Some("stop"))), data_event("[DONE]")],
        Progress::Failed(message) => vec![json_event(&ErrorBody::new(message, "server_error"))],
    }
}

// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<crate::models::OpenAiChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let valid = validate_openai_request(payload)?;
    let model = valid.call.model.clone();
    let stream = valid.stream;
    let admitted = admit(&state, valid);

    let ctx = ChunkContext {
        id: format!("chatcmpl-{}", admitted.request_id),
        model,
        created: chrono::Utc::now().timestamp(),
    };

    if stream {
        let events = watch(state, admitted.request_id)
            .flat_map(move |p| futures_util::stream::iter(frame(p, &ctx)));
        return Ok(event_stream(events).into_response());
    }

    let timeout = state.settings.completion_timeout;
    let record = tokio::time::timeout(timeout, wait_for_terminal(&state, &admitted.request_id))
        .await
        .map_err(|_| ApiError::Timeout("Request timed out".to_string()))??;

    if record.status == RequestState::Error {
        return Err(ApiError::Downstream(
            record.error.unwrap_or_else(|| "Unknown error".to_string()),
        ));
    }

    Ok(Json(ChatResponse {
        id: ctx.id,
        object: "chat.completion".to_string(),
        created: record.created_at.timestamp(),
        model: ctx.model,
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content: record.result.unwrap_or_default(),
            },
            finish_reason: "stop".to_string(),
        }],
        usage: Usage::default(),
    })
    .into_response())
}

async fn wait_for_terminal(state: &AppState, id: &str) -> Result<StatusRecord, ApiError> {
    loop {
        match state.tracker.get(id) {
            Some(record) if record.status.is_terminal() => return Ok(record),
            Some(_) => {}
            None => return Err(ApiError::Internal(format!("request {id} lost its status record"))),
        }
        if state.shutdown.is_cancelled() {
            return Err(ApiError::Internal("server is shutting down".to_string()));
        }
        tokio::time::sleep(BLOCKING_POLL).await;
    }
}

// GET /v1/models - passthrough of the downstream list
pub async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    match state.backend.list_models().await {
        Ok(models) => {
            state.downstream.set_healthy(true);
            let data = models.get("data").cloned().unwrap_or(serde_json::Value::Array(vec![]));
            Json(serde_json::json!({ "object": "list", "data": data })).into_response()
        }
        Err(CompletionError::Connection(details)) => {
            state.downstream.set_healthy(false);
            let body = ErrorBody::new(
                format!("Cannot reach downstream at {}. Is it running?", state.downstream.url),
                "connection_error",
            )
            .with_details(details);
            (StatusCode::BAD_GATEWAY, Json(body)).into_response()
        }
        Err(CompletionError::Protocol(details)) => {
            let body = ErrorBody::new("Failed to fetch models from downstream", "server_error")
                .with_details(details);
            (StatusCode::BAD_GATEWAY, Json(body)).into_response()
        }
    }
}
