//! Where every admitted request is, and process-wide counters.
//!
//! Records are never removed while the process runs.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Queued,
    Processing,
    Complete,
    Error,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Complete | RequestState::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: RequestState,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub queue_entered_position: usize,
}

impl StatusRecord {
    fn queued(client_id: &str, position: usize) -> Self {
        Self {
            status: RequestState::Queued,
            client_id: client_id.to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            queue_entered_position: position,
        }
    }
}

#[derive(Default)]
pub struct StatusTracker {
    records: DashMap<String, StatusRecord>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_queued(&self, id: &str, client_id: &str, position: usize) {
        self.records
            .insert(id.to_string(), StatusRecord::queued(client_id, position));
    }

    pub fn get(&self, id: &str) -> Option<StatusRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn state(&self, id: &str) -> Option<RequestState> {
        self.records.get(id).map(|r| r.status)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_in(&self, state: RequestState) -> usize {
        self.records.iter().filter(|r| r.status == state).count()
    }

    // The three transitions below return false when the id is unknown

    pub(crate) fn mark_processing(&self, id: &str) -> bool {
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.status = RequestState::Processing;
                record.started_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_complete(&self, id: &str, result: String) -> bool {
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.status = RequestState::Complete;
                record.completed_at = Some(Utc::now());
                record.result = Some(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_error(&self, id: &str, message: String) -> bool {
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.status = RequestState::Error;
                record.completed_at = Some(Utc::now());
                record.error = Some(message);
                true
            }
            None => false,
        }
    }
}

/// Aggregate counters plus the request currently held by the worker.
#[derive(Default)]
pub struct QueueStats {
    total_received: AtomicU64,
    total_processed: AtomicU64,
    total_errors: AtomicU64,
    // Also serialises the processing transitions, see AppState
    current: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_received: u64,
    pub total_processed: u64,
    pub total_errors: u64,
    pub current_request_id: Option<String>,
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.total_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lock_current(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Option<String> {
        self.lock_current().clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_received: self.total_received.load(Ordering::Relaxed),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            current_request_id: self.current(),
        }
    }
}
