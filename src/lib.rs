//! Single-queue, single-worker broker in front of one OpenAI-compatible
//! model server.
//!
//! Requests are admitted immediately, served strictly in order by one
//! worker, and streamed back to any number of callers with live queue
//! position feedback.
//!
//! ```text
//! /queue/add ─┐                                   ┌─ /stream/{id}
//!             ├─> AdmissionQueue ─> worker ─> relay ┤
//! /v1/chat ───┘        (StatusTracker)             └─ /v1/chat (SSE)
//! ```

pub mod admission;
pub mod client;
pub mod config;
pub mod downstream;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod queue;
pub mod relay;
pub mod routes;
pub mod sse;
pub mod state;
pub mod tracker;
pub mod worker;

pub use client::{CompletionBackend, CompletionError, OpenAiClient};
pub use config::{Args, BrokerSettings};
pub use routes::router;
pub use state::AppState;
