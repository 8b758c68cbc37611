use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::CompletionBackend;
use crate::config::BrokerSettings;
use crate::downstream::Downstream;
use crate::error::WorkerFault;
use crate::queue::AdmissionQueue;
use crate::relay::RelayRegistry;
use crate::tracker::{QueueStats, StatusTracker};

// app's shared state, created empty at startup and never persisted
pub struct AppState {
    pub backend: Arc<dyn CompletionBackend>,
    pub downstream: Arc<Downstream>,
    pub tracker: StatusTracker,
    pub queue: AdmissionQueue,
    pub relays: RelayRegistry,
    pub stats: QueueStats,
    pub settings: BrokerSettings,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: BrokerSettings) -> Self {
        crate::metrics::init();
        Self {
            downstream: Arc::new(Downstream::new(backend.base_url())),
            backend,
            tracker: StatusTracker::new(),
            queue: AdmissionQueue::new(),
            relays: RelayRegistry::new(),
            stats: QueueStats::new(),
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    // The transitions below hold the stats' current-id lock while touching
    // the record, so a snapshot never sees "processing" and `current`
    // disagree.

    pub(crate) fn begin_processing(&self, id: &str) -> Result<(), WorkerFault> {
        let mut current = self.stats.lock_current();
        if let Some(busy) = current.as_deref() {
            return Err(WorkerFault::AlreadyProcessing(busy.to_string()));
        }
        if !self.tracker.mark_processing(id) {
            return Err(WorkerFault::UnknownRequest(id.to_string()));
        }
        *current = Some(id.to_string());
        Ok(())
    }

    pub(crate) fn finish_complete(&self, id: &str, result: String) -> Result<(), WorkerFault> {
        let mut current = self.stats.lock_current();
        let known = self.tracker.mark_complete(id, result);
        Self::release(&mut current, id);
        if !known {
            return Err(WorkerFault::UnknownRequest(id.to_string()));
        }
        self.stats.record_processed();
        Ok(())
    }

    pub(crate) fn finish_error(&self, id: &str, message: String) -> Result<(), WorkerFault> {
        let mut current = self.stats.lock_current();
        let known = self.tracker.mark_error(id, message);
        Self::release(&mut current, id);
        if !known {
            return Err(WorkerFault::UnknownRequest(id.to_string()));
        }
        self.stats.record_error();
        Ok(())
    }

    // Fail whatever the worker was holding when it died
    pub(crate) fn abandon_current(&self, message: &str) -> Option<String> {
        let id = self.stats.current()?;
        self.finish_error(&id, message.to_string()).ok()?;
        Some(id)
    }

    fn release(current: &mut Option<String>, id: &str) {
        if current.as_deref() == Some(id) {
            *current = None;
        }
    }
}
