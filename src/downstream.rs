use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::CompletionBackend;

// The single model server behind the queue
pub struct Downstream {
    pub url: String,
    healthy: AtomicBool,
}

impl Downstream {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    // Returns the previous value
    pub fn set_healthy(&self, healthy: bool) -> bool {
        let was = self.healthy.swap(healthy, Ordering::Relaxed);
        if was != healthy {
            if healthy {
                info!(url = %self.url, "downstream is now healthy");
            } else {
                warn!(url = %self.url, "downstream is now unhealthy");
            }
        }
        was
    }
}

// Probe the model list on an interval until shutdown
pub async fn health_checker(
    downstream: Arc<Downstream>,
    backend: Arc<dyn CompletionBackend>,
    check_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval = ?check_interval, "downstream health checker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let healthy = backend.list_models().await.is_ok();
        downstream.set_healthy(healthy);
    }
}
