use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    add_to_queue, chat_completions, health_handler, list_models, metrics_handler, queue_status,
    request_status, root, stream_response,
};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // queue protocol
        .route("/queue/add", post(add_to_queue))
        .route("/queue/status", get(queue_status))
        .route("/request/{id}", get(request_status))
        .route("/stream/{id}", get(stream_response))
        // OpenAI-compatible
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
