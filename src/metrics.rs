use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, TextEncoder, register_counter, register_gauge,
    register_histogram,
};

lazy_static! {
    pub static ref REQUESTS_ADMITTED: Counter =
        register_counter!("broker_requests_admitted_total", "Total requests admitted to the queue").unwrap();
    pub static ref REQUESTS_COMPLETED: Counter =
        register_counter!("broker_requests_completed_total", "Total requests completed").unwrap();
    pub static ref REQUESTS_FAILED: Counter =
        register_counter!("broker_requests_failed_total", "Total requests that ended in error").unwrap();
    pub static ref FRAGMENTS_RELAYED: Counter =
        register_counter!("broker_relay_fragments_total", "Text fragments handed to stream relays").unwrap();
    pub static ref QUEUE_DEPTH: Gauge =
        register_gauge!("broker_queue_depth", "Requests waiting for the worker").unwrap();
    pub static ref QUEUE_WAIT: Histogram = register_histogram!(
        "broker_queue_wait_seconds",
        "Time between admission and the worker picking a request up"
    )
    .unwrap();
    pub static ref GENERATION_LATENCY: Histogram = register_histogram!(
        "broker_generation_seconds",
        "Time from dequeue to terminal state"
    )
    .unwrap();
}

// Register everything up front so /metrics lists all series from the start
pub fn init() {
    lazy_static::initialize(&REQUESTS_ADMITTED);
    lazy_static::initialize(&REQUESTS_COMPLETED);
    lazy_static::initialize(&REQUESTS_FAILED);
    lazy_static::initialize(&FRAGMENTS_RELAYED);
    lazy_static::initialize(&QUEUE_DEPTH);
    lazy_static::initialize(&QUEUE_WAIT);
    lazy_static::initialize(&GENERATION_LATENCY);
}

// Text exposition of everything registered in the default registry
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
