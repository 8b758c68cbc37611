//! Per-request fragment channels between the worker and stream handlers.
//!
//! The worker owns the only sender ([`RelayPublisher`]) and never waits on
//! it: the buffer is bounded and a full buffer flips the relay into an
//! overflowed state instead of blocking generation. Readers share one
//! receiver, so each fragment goes to exactly one of them, while the
//! terminal marker is also kept on the relay so every attached reader
//! can see it once the channel is drained.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::metrics::FRAGMENTS_RELAYED;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Fragment(String),
    Done,
    Error(String),
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Fragment(_))
    }
}

pub struct Relay {
    receiver: Mutex<mpsc::Receiver<RelayEvent>>,
    terminal: OnceLock<RelayEvent>,
    overflowed: AtomicBool,
}

impl Relay {
    /// Next event for this reader, `None` once the channel is drained and
    /// the terminal marker was taken by another reader.
    pub async fn recv(&self) -> Option<RelayEvent> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }

    // Terminal marker, available after the publisher finished
    pub fn terminal(&self) -> Option<RelayEvent> {
        self.terminal.get().cloned()
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }
}

pub struct RelayPublisher {
    request_id: String,
    sender: mpsc::Sender<RelayEvent>,
    relay: Arc<Relay>,
}

pub const OVERFLOW_MESSAGE: &str =
    "stream buffer overflowed before it was read; fetch the result from /request/{id}";

impl RelayPublisher {
    pub fn publish(&self, fragment: String) {
        if self.relay.overflowed() {
            return;
        }
        match self.sender.try_send(RelayEvent::Fragment(fragment)) {
            Ok(()) => FRAGMENTS_RELAYED.inc(),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(request_id = %self.request_id, "fragment relay full, dropping stream");
                self.relay.overflowed.store(true, Ordering::Relaxed);
            }
            // receiver is owned by the relay itself, so this only happens during teardown
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn finish(self) {
        self.close(RelayEvent::Done);
    }

    pub fn fail(self, message: String) {
        self.close(RelayEvent::Error(message));
    }

    fn close(self, marker: RelayEvent) {
        let marker = if self.relay.overflowed() {
            RelayEvent::Error(OVERFLOW_MESSAGE.replace("{id}", &self.request_id))
        } else {
            marker
        };
        let _ = self.relay.terminal.set(marker.clone());
        // A full buffer just means readers pick the marker up from `terminal`
        let _ = self.sender.try_send(marker);
    }
}

#[derive(Default)]
pub struct RelayRegistry {
    relays: DashMap<String, Arc<Relay>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, request_id: &str, capacity: usize) -> RelayPublisher {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let relay = Arc::new(Relay {
            receiver: Mutex::new(receiver),
            terminal: OnceLock::new(),
            overflowed: AtomicBool::new(false),
        });
        self.relays.insert(request_id.to_string(), relay.clone());
        RelayPublisher {
            request_id: request_id.to_string(),
            sender,
            relay,
        }
    }

    pub fn get(&self, request_id: &str) -> Option<Arc<Relay>> {
        self.relays.get(request_id).map(|r| r.clone())
    }

    // Readers already holding the Arc keep draining after this
    pub fn remove(&self, request_id: &str) {
        self.relays.remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}
