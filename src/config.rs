use clap::Parser;
use std::time::Duration;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "llm-queue-broker")]
#[command(about = "Single-worker request queue in front of one OpenAI-compatible model server")]
pub struct Args {
    // Address to bind
    #[arg(long, env = "BROKER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    // Port to run the server on
    #[arg(short, long, env = "BROKER_PORT", default_value_t = 8001)]
    pub port: u16,

    // Downstream API root, requests go to {url}/chat/completions
    #[arg(short, long, env = "LM_STUDIO_URL", default_value = "http://localhost:1234/v1")]
    pub downstream_url: String,

    // Placeholder credential, sent as a bearer token
    #[arg(long, env = "LM_STUDIO_API_KEY", default_value = "lm_studio")]
    pub api_key: String,

    // Downstream connect timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub connect_timeout: u64,

    // Longest silence tolerated from the downstream, in seconds
    #[arg(long, default_value_t = 600)]
    pub request_timeout: u64,

    // How often a queued stream re-checks its position (ms)
    #[arg(long, default_value_t = 300)]
    pub poll_interval_ms: u64,

    // Non-streaming /v1/chat/completions wait limit in seconds
    #[arg(long, default_value_t = 300)]
    pub completion_timeout: u64,

    // Max unread fragments buffered per request
    #[arg(long, default_value_t = 8192)]
    pub relay_capacity: usize,

    // Downstream health check interval in seconds
    #[arg(long, default_value_t = 30)]
    pub health_interval: u64,
}

impl Args {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn settings(&self) -> BrokerSettings {
        BrokerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            completion_timeout: Duration::from_secs(self.completion_timeout),
            relay_capacity: self.relay_capacity.max(1),
            health_interval: Duration::from_secs(self.health_interval),
        }
    }
}

/// Runtime knobs shared by the worker and the HTTP handlers.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub poll_interval: Duration,
    pub completion_timeout: Duration,
    pub relay_capacity: usize,
    pub health_interval: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            completion_timeout: Duration::from_secs(300),
            relay_capacity: 8192,
            health_interval: Duration::from_secs(30),
        }
    }
}
