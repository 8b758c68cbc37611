use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

// Client tag used for requests that arrive on the OpenAI-compatible route
pub const OPENAI_CLIENT_TAG: &str = "openai_compat";

fn default_true() -> bool {
    true
}

// One role-tagged turn, forwarded to the downstream as-is
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(Value::String(content.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Sampling and output controls.
///
/// Everything is optional on the wire. The four core sampling values fall
/// back to fixed defaults when the call is built; the rest are forwarded
/// only when the caller set them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    // -1 means unlimited on some servers, forwarded unchanged
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub repeat_penalty: Option<f32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub logit_bias: Option<HashMap<String, f32>>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub user: Option<String>,
}

impl GenerationParams {
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;
    pub const DEFAULT_TOP_P: f32 = 1.0;

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(Self::DEFAULT_TEMPERATURE)
    }

    pub fn top_p(&self) -> f32 {
        self.top_p.unwrap_or(Self::DEFAULT_TOP_P)
    }

    pub fn frequency_penalty(&self) -> f32 {
        self.frequency_penalty.unwrap_or(0.0)
    }

    pub fn presence_penalty(&self) -> f32 {
        self.presence_penalty.unwrap_or(0.0)
    }
}

// POST /queue/add body. Required fields are optional here so that missing
// ones come back as validation errors instead of extractor rejections.
#[derive(Debug, Deserialize)]
pub struct QueueRequest {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(flatten)]
    pub params: GenerationParams,
    #[serde(default = "default_true")]
    pub stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueResponse {
    pub status: String,
    pub request_id: String,
    pub queue_position: usize,
}

// POST /v1/chat/completions body
#[derive(Debug, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
    #[serde(flatten)]
    pub params: GenerationParams,
    #[serde(default)]
    pub stream: Option<bool>,
}

/// What the worker hands to the completion client.
#[derive(Debug, Clone)]
pub struct ChatCompletionCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

/// An admitted request. Never mutated after it is enqueued.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub id: String,
    pub client_id: String,
    pub call: ChatCompletionCall,
    pub stream: bool,
    pub admitted_at: Instant,
}

// OpenAI chat.completion.chunk
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatStreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatStreamChoice>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatStreamChoice {
    pub index: usize,
    pub delta: ChatStreamDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChatStreamDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

// OpenAI chat.completion (non-streaming)
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
