//! The single consumer of the admission queue.
//!
//! One request at a time goes `queued -> processing -> complete | error`.
//! Completion-call failures end that request only; bookkeeping faults are
//! logged and the loop backs off; a panic is caught by [`supervise`],
//! which fails the in-flight request and restarts the loop.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::CompletionError;
use crate::error::WorkerFault;
use crate::metrics::{GENERATION_LATENCY, QUEUE_DEPTH, QUEUE_WAIT, REQUESTS_COMPLETED, REQUESTS_FAILED};
use crate::models::RequestEnvelope;
use crate::relay::RelayPublisher;
use crate::state::AppState;

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const FAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Spawn the worker under its supervisor. Stops when `state.shutdown` is
/// cancelled.
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(supervise(state))
}

async fn supervise(state: Arc<AppState>) {
    info!("queue worker started - processing requests sequentially");

    loop {
        match tokio::spawn(run(state.clone())).await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                let abandoned = state.abandon_current("internal worker fault");
                error!(request_id = ?abandoned, "queue worker panicked, restarting");
                if let Some(id) = &abandoned {
                    state.relays.remove(id);
                }
                tokio::time::sleep(FAULT_BACKOFF).await;
            }
            Err(e) => {
                warn!(error = %e, "queue worker task cancelled");
                break;
            }
        }
    }

    info!("queue worker stopped");
}

async fn run(state: Arc<AppState>) {
    while !state.shutdown.is_cancelled() {
        let envelope = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            next = state.queue.pop_timeout(DEQUEUE_TIMEOUT) => match next {
                Some(envelope) => envelope,
                None => continue,
            },
        };

        if let Err(fault) = process(&state, envelope).await {
            error!(error = %fault, "worker bookkeeping fault");
            tokio::time::sleep(FAULT_BACKOFF).await;
        }
    }
}

async fn process(state: &AppState, envelope: RequestEnvelope) -> Result<(), WorkerFault> {
    let id = envelope.id.as_str();
    QUEUE_DEPTH.set(state.queue.len() as f64);
    QUEUE_WAIT.observe(envelope.admitted_at.elapsed().as_secs_f64());

    state.begin_processing(id)?;
    let publisher = state.relays.open(id, state.settings.relay_capacity);
    info!(request_id = %id, client_id = %envelope.client_id, model = %envelope.call.model, "processing request");

    let started = Instant::now();
    let outcome = generate(state, &envelope, &publisher).await;
    GENERATION_LATENCY.observe(started.elapsed().as_secs_f64());

    let finished = match outcome {
        Ok(text) => {
            state.downstream.set_healthy(true);
            info!(request_id = %id, chars = text.len(), "request completed");
            REQUESTS_COMPLETED.inc();
            // record first, so a reader that sees `done` finds the result stored
            let finished = state.finish_complete(id, text);
            publisher.finish();
            finished
        }
        Err(e) => {
            if matches!(e, CompletionError::Connection(_)) {
                state.downstream.set_healthy(false);
            }
            let message = e.to_string();
            error!(request_id = %id, error = %message, "request failed");
            REQUESTS_FAILED.inc();
            let finished = state.finish_error(id, message.clone());
            publisher.fail(message);
            finished
        }
    };

    // Attached readers keep their handle; late ones fall back to the record
    state.relays.remove(id);
    finished
}

async fn generate(
    state: &AppState,
    envelope: &RequestEnvelope,
    publisher: &RelayPublisher,
) -> Result<String, CompletionError> {
    let mut fragments = state.backend.stream_chat(&envelope.call).await?;
    let mut text = String::new();

    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        text.push_str(&fragment);
        publisher.publish(fragment);
    }
    Ok(text)
}
