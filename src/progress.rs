//! Lifecycle of one request as seen by a streaming caller.
//!
//! [`watch`] polls the queue while the request waits, then drains the
//! fragment relay once the worker picks it up. Both wire formats frame
//! this same sequence, so the polling rules live here only.

use async_stream::stream;
use futures_util::Stream;
use std::sync::Arc;
use std::time::Duration;

use crate::relay::{Relay, RelayEvent};
use crate::state::AppState;
use crate::tracker::RequestState;

// How often to re-check while processing but before the relay shows up
const RELAY_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Position reported at admission time. Always first.
    Admitted(usize),
    /// Live queue position, emitted only when it changes.
    Position(usize),
    /// The worker has picked the request up.
    Started,
    Fragment(String),
    Done,
    Failed(String),
}

impl Progress {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Progress::Done | Progress::Failed(_))
    }
}

/// Progress events for `id`, ending with exactly one `Done` or `Failed`.
///
/// Callers must check the id exists first; an unknown id yields a single
/// `Failed`. Dropping the stream abandons it without affecting the worker.
pub fn watch(state: Arc<AppState>, id: String) -> impl Stream<Item = Progress> + Send + 'static {
    stream! {
        let Some(record) = state.tracker.get(&id) else {
            yield Progress::Failed("Request ID not found".to_string());
            return;
        };
        yield Progress::Admitted(record.queue_entered_position);

        let mut last_position = None;
        loop {
            if state.shutdown.is_cancelled() {
                yield Progress::Failed("server is shutting down".to_string());
                return;
            }
            match state.tracker.state(&id) {
                Some(RequestState::Queued) => {
                    if let Some(position) = state.queue.position_of(&id) {
                        if last_position != Some(position) {
                            last_position = Some(position);
                            yield Progress::Position(position);
                        }
                    }
                    tokio::time::sleep(state.settings.poll_interval).await;
                }
                _ => break,
            }
        }

        yield Progress::Started;

        loop {
            if let Some(relay) = state.relays.get(&id) {
                for await event in drain(relay) {
                    yield event;
                }
                return;
            }

            // No relay: either the worker has not opened it yet, or the
            // request already finished and the relay is gone.
            let Some(record) = state.tracker.get(&id) else {
                yield Progress::Failed("Request ID not found".to_string());
                return;
            };
            match record.status {
                RequestState::Complete => {
                    let text = record.result.unwrap_or_default();
                    if !text.is_empty() {
                        yield Progress::Fragment(text);
                    }
                    yield Progress::Done;
                    return;
                }
                RequestState::Error => {
                    yield Progress::Failed(record.error.unwrap_or_else(|| "Unknown error".to_string()));
                    return;
                }
                _ => {
                    if state.shutdown.is_cancelled() {
                        yield Progress::Failed("server is shutting down".to_string());
                        return;
                    }
                    tokio::time::sleep(RELAY_WAIT).await;
                }
            }
        }
    }
}

fn drain(relay: Arc<Relay>) -> impl Stream<Item = Progress> + Send + 'static {
    stream! {
        loop {
            match relay.recv().await {
                Some(RelayEvent::Fragment(text)) => yield Progress::Fragment(text),
                Some(RelayEvent::Done) => {
                    yield Progress::Done;
                    return;
                }
                Some(RelayEvent::Error(message)) => {
                    yield Progress::Failed(message);
                    return;
                }
                // Drained; another reader took the marker
                None => {
                    yield match relay.terminal() {
                        Some(RelayEvent::Error(message)) => Progress::Failed(message),
                        Some(_) => Progress::Done,
                        None => Progress::Failed("stream closed before completion".to_string()),
                    };
                    return;
                }
            }
        }
    }
}
