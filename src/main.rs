use anyhow::Result;
use clap::Parser; // for cli
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_queue_broker::client::CompletionBackend;
use llm_queue_broker::{AppState, Args, OpenAiClient, downstream, router, worker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_queue_broker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let args = Args::parse();
    let settings = args.settings();

    let backend: Arc<dyn CompletionBackend> = Arc::new(OpenAiClient::new(
        &args.downstream_url,
        &args.api_key,
        Duration::from_secs(args.connect_timeout),
        Duration::from_secs(args.request_timeout),
    )?);
    let state = Arc::new(AppState::new(backend.clone(), settings));

    // spawn the background worker and the downstream probe
    let worker = worker::spawn(state.clone());
    tokio::spawn(downstream::health_checker(
        state.downstream.clone(),
        backend,
        state.settings.health_interval,
        state.shutdown.clone(),
    ));

    let app = router(state.clone());
    let addr = args.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Broker running on http://{}", addr);
    info!("Forwarding to downstream at {}", state.downstream.url);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await?;

    // queued and in-flight requests are abandoned, nothing is persisted
    let _ = tokio::time::timeout(Duration::from_secs(2), worker).await;
    info!("Shutdown complete");
    Ok(())
}

// Cancel on ctrl-c so the worker and any open streams wind down before
// axum waits on connections
async fn shutdown_signal(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available, run until killed
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
    shutdown.cancel();
}
