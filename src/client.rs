//! Streaming chat-completion client for one OpenAI-compatible endpoint.
//!
//! The downstream answers `stream: true` calls with Server-Sent Events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: [DONE]
//! ```
//!
//! [`OpenAiClient::stream_chat`] turns that body into a lazy stream of
//! content fragments.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{ChatCompletionCall, ChatMessage};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompletionError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl CompletionError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            CompletionError::Connection(e.to_string())
        } else {
            CompletionError::Protocol(e.to_string())
        }
    }
}

pub type FragmentStream = BoxStream<'static, Result<String, CompletionError>>;

/// The one downstream model the worker talks to.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Start a streaming chat completion. The returned stream is finite and
    /// cannot be restarted.
    async fn stream_chat(&self, call: &ChatCompletionCall) -> Result<FragmentStream, CompletionError>;

    /// Raw model list as returned by the downstream.
    async fn list_models(&self) -> Result<Value, CompletionError>;

    fn base_url(&self) -> &str;
}

// Body sent downstream. Optional parameters are skipped when unset.
#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logit_bias: Option<&'a HashMap<String, f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

impl<'a> ChatCompletionBody<'a> {
    fn new(call: &'a ChatCompletionCall) -> Self {
        let p = &call.params;
        Self {
            model: &call.model,
            messages: &call.messages,
            stream: true,
            temperature: p.temperature(),
            top_p: p.top_p(),
            frequency_penalty: p.frequency_penalty(),
            presence_penalty: p.presence_penalty(),
            max_tokens: p.max_tokens,
            top_k: p.top_k,
            repeat_penalty: p.repeat_penalty,
            stop: p.stop.as_deref(),
            logit_bias: p.logit_bias.as_ref(),
            seed: p.seed,
            tools: p.tools.as_deref(),
            tool_choice: p.tool_choice.as_ref(),
            user: p.user.as_deref(),
        }
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// `read_timeout` bounds every wait on the downstream, both for the
    /// response head and between body chunks, so a stalled server fails the
    /// request instead of holding the worker.
    pub fn new(
        base_url: &str,
        api_key: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| CompletionError::Connection(e.to_string()))?;

        // add http:// if not present
        let base_url = if base_url.starts_with("http") {
            base_url.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", base_url.trim_end_matches('/'))
        };

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn stream_chat(&self, call: &ChatCompletionCall) -> Result<FragmentStream, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(%url, model = %call.model, "calling downstream");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatCompletionBody::new(call))
            .send()
            .await
            .map_err(CompletionError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Protocol(format!(
                "downstream returned {status}: {body}"
            )));
        }

        Ok(fragments(response.bytes_stream()).boxed())
    }

    async fn list_models(&self) -> Result<Value, CompletionError> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(CompletionError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Protocol(format!("downstream returned {status}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| CompletionError::Protocol(e.to_string()))
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Splits an SSE byte stream into lines.
#[derive(Default)]
pub struct SseLineDecoder {
    buf: BytesMut,
}

impl SseLineDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let line = self.buf.split_to(end + 1);
        Some(String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']).to_string())
    }

    // Whatever is left after the body ended without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

fn parse_line(line: &str) -> Result<SseLine, CompletionError> {
    let line = line.trim();
    // blank separators, comments and non-data fields
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| CompletionError::Protocol(format!("malformed stream chunk: {e}")))?;
    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(CompletionError::Protocol(message));
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(content) if !content.is_empty() => Ok(SseLine::Fragment(content)),
        _ => Ok(SseLine::Skip),
    }
}

struct FragmentState<S> {
    body: Pin<Box<S>>,
    decoder: SseLineDecoder,
    eof: bool,
    finished: bool,
}

/// Content fragments from a downstream SSE body.
///
/// Ends at `[DONE]` or at a clean end of body. Transport failures and
/// unparseable chunks end the stream with a protocol error.
pub fn fragments<S, E>(body: S) -> impl Stream<Item = Result<String, CompletionError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = FragmentState {
        body: Box::pin(body),
        decoder: SseLineDecoder::default(),
        eof: false,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }

        loop {
            let line = if st.eof {
                st.decoder.next_line().or_else(|| st.decoder.finish())
            } else {
                st.decoder.next_line()
            };

            if let Some(line) = line {
                match parse_line(&line) {
                    Ok(SseLine::Fragment(text)) => return Some((Ok(text), st)),
                    Ok(SseLine::Done) => return None,
                    Ok(SseLine::Skip) => continue,
                    Err(e) => {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
            }

            if st.eof {
                return None;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => st.decoder.push(&bytes),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((
                        Err(CompletionError::Protocol(format!("stream aborted: {e}"))),
                        st,
                    ));
                }
                None => st.eof = true,
            }
        }
    })
}
