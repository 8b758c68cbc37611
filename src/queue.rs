use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

use crate::models::RequestEnvelope;

// FIFO of admitted requests. Unbounded; pushing never waits.
#[derive(Default)]
pub struct AdmissionQueue {
    items: Mutex<VecDeque<RequestEnvelope>>,
    ready: Notify,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<RequestEnvelope>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue the envelope built by `make`.
    ///
    /// `make` receives the position the request is about to take (depth
    /// just before insertion, plus one) and runs under the queue lock, so
    /// anything it records is in place before a consumer can pop the item.
    pub fn push_with<F>(&self, make: F) -> usize
    where
        F: FnOnce(usize) -> RequestEnvelope,
    {
        let position = {
            let mut items = self.items();
            let position = items.len() + 1;
            items.push_back(make(position));
            position
        };
        self.ready.notify_one();
        position
    }

    pub fn push(&self, envelope: RequestEnvelope) -> usize {
        self.push_with(|_| envelope)
    }

    pub fn try_pop(&self) -> Option<RequestEnvelope> {
        self.items().pop_front()
    }

    /// Wait up to `timeout` for the next request.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<RequestEnvelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed
            let notified = self.ready.notified();
            if let Some(envelope) = self.try_pop() {
                return Some(envelope);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    // 1-based, None once the worker has taken it
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.items().iter().position(|e| e.id == id).map(|i| i + 1)
    }
}
