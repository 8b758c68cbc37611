//! Shared fixtures for route tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use llm_queue_broker::client::FragmentStream;
use llm_queue_broker::models::ChatCompletionCall;
use llm_queue_broker::{AppState, BrokerSettings, CompletionBackend, CompletionError};

pub enum Reply {
    Text(Vec<&'static str>),
    // same, with a pause before each fragment
    Slow(Vec<&'static str>, Duration),
    Refused,
}

/// Downstream stand-in that answers calls from a script, in order.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    pub reachable: bool,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            reachable: true,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            reachable: false,
        }
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn stream_chat(&self, _call: &ChatCompletionCall) -> Result<FragmentStream, CompletionError> {
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(parts)) => {
                let items: Vec<_> = parts.into_iter().map(|p| Ok(p.to_string())).collect();
                Ok(futures_util::stream::iter(items).boxed())
            }
            Some(Reply::Slow(parts, pause)) => Ok(futures_util::stream::iter(parts)
                .then(move |p| async move {
                    tokio::time::sleep(pause).await;
                    Ok(p.to_string())
                })
                .boxed()),
            Some(Reply::Refused) => Err(refused()),
            None if !self.reachable => Err(refused()),
            None => Ok(futures_util::stream::iter(vec![Ok("ok".to_string())]).boxed()),
        }
    }

    async fn list_models(&self) -> Result<Value, CompletionError> {
        if self.reachable {
            Ok(serde_json::json!({"object": "list", "data": [{"id": "qwen3-8b", "object": "model"}]}))
        } else {
            Err(refused())
        }
    }

    fn base_url(&self) -> &str {
        "http://localhost:1234/v1"
    }
}

fn refused() -> CompletionError {
    CompletionError::Connection("Connection refused (os error 111)".into())
}

pub fn test_state(backend: ScriptedBackend) -> Arc<AppState> {
    let settings = BrokerSettings {
        poll_interval: Duration::from_millis(10),
        completion_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    test_state_with(backend, settings)
}

pub fn test_state_with(backend: ScriptedBackend, settings: BrokerSettings) -> Arc<AppState> {
    Arc::new(AppState::new(Arc::new(backend), settings))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = tokio::time::timeout(Duration::from_secs(10), response.into_body().collect())
        .await
        .expect("body should finish")
        .unwrap()
        .to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// JSON payloads of every `data:` line, skipping the `[DONE]` sentinel.
pub fn data_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .filter(|d| *d != "[DONE]")
        .map(|d| serde_json::from_str(d).unwrap())
        .collect()
}

pub fn comment_lines(body: &str) -> Vec<&str> {
    body.lines().filter_map(|l| l.strip_prefix(": ")).collect()
}

pub fn queue_body(client_id: &str, prompt: &str) -> Value {
    serde_json::json!({
        "client_id": client_id,
        "model": "qwen3-8b",
        "messages": [{"role": "user", "content": prompt}],
    })
}
