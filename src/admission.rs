//! Validation and enqueueing of new requests.
//!
//! [`admit`] is synchronous: it records the request, enqueues it and
//! returns. It never waits on the worker.

use serde_json::Value;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics::{QUEUE_DEPTH, REQUESTS_ADMITTED};
use crate::models::{
    ChatCompletionCall, ChatMessage, GenerationParams, OPENAI_CLIENT_TAG, OpenAiChatRequest,
    QueueRequest, RequestEnvelope,
};
use crate::state::AppState;

const ROLES: &[&str] = &["system", "developer", "user", "assistant", "tool"];

#[derive(Debug)]
pub struct Admitted {
    pub request_id: String,
    pub position: usize,
}

/// A request that passed validation and is ready to be enqueued.
#[derive(Debug)]
pub struct ValidRequest {
    pub client_id: String,
    pub call: ChatCompletionCall,
    pub stream: bool,
}

pub fn validate_queue_request(req: QueueRequest) -> Result<ValidRequest, ApiError> {
    let client_id = required_text(req.client_id, "client_id")?;
    let model = required_text(req.model, "model")?;
    let messages = validate_messages(req.messages)?;
    validate_params(&req.params)?;

    Ok(ValidRequest {
        client_id,
        call: ChatCompletionCall {
            model,
            messages,
            params: req.params,
        },
        stream: req.stream,
    })
}

pub fn validate_openai_request(req: OpenAiChatRequest) -> Result<ValidRequest, ApiError> {
    let model = required_text(req.model, "model")?;
    let messages = validate_messages(req.messages)?;
    validate_params(&req.params)?;

    Ok(ValidRequest {
        client_id: OPENAI_CLIENT_TAG.to_string(),
        call: ChatCompletionCall {
            model,
            messages,
            params: req.params,
        },
        stream: req.stream.unwrap_or(false),
    })
}

fn required_text(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::Validation(format!("{field} is required"))),
    }
}

fn validate_messages(messages: Option<Vec<Value>>) -> Result<Vec<ChatMessage>, ApiError> {
    let messages = match messages {
        Some(m) if !m.is_empty() => m,
        _ => return Err(ApiError::Validation("messages must be a non-empty list".into())),
    };

    messages
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            if !raw.is_object() {
                return Err(ApiError::Validation(format!("messages[{i}] must be an object")));
            }
            let message: ChatMessage = serde_json::from_value(raw)
                .map_err(|e| ApiError::Validation(format!("messages[{i}] is malformed: {e}")))?;

            if !ROLES.contains(&message.role.as_str()) {
                return Err(ApiError::Validation(format!(
                    "messages[{i}] has unknown role '{}'",
                    message.role
                )));
            }
            match &message.content {
                Some(Value::String(_)) | Some(Value::Array(_)) => {}
                None | Some(Value::Null)
                    if message.role == "assistant" && message.tool_calls.is_some() => {}
                _ => {
                    return Err(ApiError::Validation(format!(
                        "messages[{i}].content must be a string or a list of parts"
                    )));
                }
            }
            Ok(message)
        })
        .collect()
}

fn validate_params(p: &GenerationParams) -> Result<(), ApiError> {
    let in_range = |name: &str, value: Option<f32>, lo: f32, hi: f32| match value {
        Some(v) if !(lo..=hi).contains(&v) => Err(ApiError::Validation(format!(
            "{name} must be between {lo} and {hi}"
        ))),
        _ => Ok(()),
    };

    // no upper bound, servers differ in how far they allow it
    if p.temperature.is_some_and(|t| t < 0.0) {
        return Err(ApiError::Validation("temperature must not be negative".into()));
    }
    in_range("top_p", p.top_p, 0.0, 1.0)?;
    in_range("frequency_penalty", p.frequency_penalty, -2.0, 2.0)?;
    in_range("presence_penalty", p.presence_penalty, -2.0, 2.0)?;

    if p.max_tokens == Some(0) {
        return Err(ApiError::Validation("max_tokens must not be 0".into()));
    }
    Ok(())
}

/// Record and enqueue a validated request.
pub fn admit(state: &AppState, req: ValidRequest) -> Admitted {
    let request_id = Uuid::new_v4().to_string();
    let ValidRequest {
        client_id,
        call,
        stream,
    } = req;

    let position = state.queue.push_with(|position| {
        // status record exists before the worker can see the envelope
        state
            .tracker
            .insert_queued(&request_id, &client_id, position);
        state.stats.record_received();
        RequestEnvelope {
            id: request_id.clone(),
            client_id: client_id.clone(),
            call,
            stream,
            admitted_at: Instant::now(),
        }
    });

    REQUESTS_ADMITTED.inc();
    QUEUE_DEPTH.set(state.queue.len() as f64);

    info!(%request_id, %client_id, position, stream, "request queued");

    Admitted {
        request_id,
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::ScriptedBackend;
    use crate::config::BrokerSettings;
    use crate::tracker::RequestState;
    use serde_json::json;
    use std::sync::Arc;

    fn queue_request(body: Value) -> QueueRequest {
        serde_json::from_value(body).unwrap()
    }

    fn valid_body() -> Value {
        json!({
            "client_id": "page-1",
            "model": "qwen3-8b",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "hi"}
            ]
        })
    }

    fn rejects(body: Value, needle: &str) {
        match validate_queue_request(queue_request(body)) {
            Err(ApiError::Validation(message)) => {
                assert!(message.contains(needle), "{message} should mention {needle}")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        let valid = validate_queue_request(queue_request(valid_body())).unwrap();
        assert_eq!(valid.client_id, "page-1");
        assert_eq!(valid.call.messages.len(), 2);
        assert!(valid.stream);
    }

    #[test]
    fn rejects_missing_client_tag() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("client_id");
        rejects(body, "client_id");
    }

    #[test]
    fn rejects_empty_messages() {
        let mut body = valid_body();
        body["messages"] = json!([]);
        rejects(body, "messages");
    }

    #[test]
    fn rejects_unknown_shaped_messages() {
        let mut body = valid_body();
        body["messages"] = json!(["just a string"]);
        rejects(body.clone(), "messages[0]");

        body["messages"] = json!([{"content": "no role"}]);
        rejects(body.clone(), "messages[0]");

        body["messages"] = json!([{"role": "narrator", "content": "x"}]);
        rejects(body.clone(), "unknown role");

        body["messages"] = json!([{"role": "user", "content": 5}]);
        rejects(body, "content");
    }

    #[test]
    fn assistant_tool_call_without_content_is_fine() {
        let mut body = valid_body();
        body["messages"] = json!([
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "content": null, "tool_calls": [{"id": "1"}]},
            {"role": "tool", "content": "sunny", "tool_call_id": "1"}
        ]);
        assert!(validate_queue_request(queue_request(body)).is_ok());
    }

    #[test]
    fn rejects_out_of_range_params() {
        let mut body = valid_body();
        body["temperature"] = json!(-0.5);
        rejects(body.clone(), "temperature");

        body["temperature"] = json!(0.2);
        body["top_p"] = json!(1.5);
        rejects(body.clone(), "top_p");
        body.as_object_mut().unwrap().remove("top_p");

        body["temperature"] = json!(0.2);
        body["max_tokens"] = json!(0);
        rejects(body, "max_tokens");
    }

    #[test]
    fn passes_through_what_the_downstream_decides() {
        let mut body = valid_body();
        body["messages"] = json!([
            {"role": "developer", "content": "Answer in French."},
            {"role": "user", "content": "hi"}
        ]);
        body["temperature"] = json!(3.5);
        body["max_tokens"] = json!(-1);
        body["top_k"] = json!(-1);

        let valid = validate_queue_request(queue_request(body)).unwrap();
        assert_eq!(valid.call.messages[0].role, "developer");
        assert_eq!(valid.call.params.temperature, Some(3.5));
        assert_eq!(valid.call.params.max_tokens, Some(-1));
    }

    #[test]
    fn openai_requests_use_fixed_tag_and_default_to_blocking() {
        let req: OpenAiChatRequest = serde_json::from_value(json!({
            "model": "qwen3-8b",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        let valid = validate_openai_request(req).unwrap();
        assert_eq!(valid.client_id, OPENAI_CLIENT_TAG);
        assert!(!valid.stream);
    }

    #[test]
    fn back_to_back_admissions_get_increasing_positions() {
        let state = AppState::new(Arc::new(ScriptedBackend::default()), BrokerSettings::default());

        let positions: Vec<usize> = (0..3)
            .map(|_| {
                let valid = validate_queue_request(queue_request(valid_body())).unwrap();
                admit(&state, valid).position
            })
            .collect();
        assert_eq!(positions, vec![1, 2, 3]);

        assert_eq!(state.queue.len(), 3);
        assert_eq!(state.stats.snapshot().total_received, 3);
        assert_eq!(state.tracker.count_in(RequestState::Queued), 3);
    }

    #[test]
    fn admitted_record_carries_entry_position() {
        let state = AppState::new(Arc::new(ScriptedBackend::default()), BrokerSettings::default());
        let valid = validate_queue_request(queue_request(valid_body())).unwrap();
        let admitted = admit(&state, valid);

        let record = state.tracker.get(&admitted.request_id).unwrap();
        assert_eq!(record.client_id, "page-1");
        assert_eq!(record.queue_entered_position, admitted.position);
    }
}
