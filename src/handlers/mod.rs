mod health;
mod openai;
mod queue;
mod stream;

pub use health::{health_handler, metrics_handler, root};
pub use openai::{chat_completions, list_models};
pub use queue::{add_to_queue, queue_status, request_status};
pub use stream::stream_response;
