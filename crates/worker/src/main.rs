use std::time::Duration;

use tabletop_core::keys::KeySpace;
use tabletop_store::{StoreBackend, StoreConfig};
use tabletop_worker::{JobRunner, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabletop_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    let store_config = StoreConfig::from_env();
    tracing::info!(queues = ?config.queues, backend = ?store_config.backend, "Loaded worker configuration");

    if store_config.backend == StoreBackend::Memory {
        tracing::warn!(
            "Standalone worker on the in-memory store sees no jobs from other processes; \
             the API server runs an embedded runner in this mode"
        );
    }

    let store = tabletop_store::connect(&store_config)
        .await
        .expect("Failed to connect to coordination store");
    tabletop_store::health_check(&store)
        .await
        .expect("Store health check failed");
    tracing::info!("Store health check passed");

    let cancel = CancellationToken::new();
    let runner = JobRunner::with_default_handlers(
        &store,
        KeySpace::new(store_config.key_prefix.clone()),
        config,
    );
    let runner_cancel = cancel.clone();
    let runner_handle = tokio::spawn(async move {
        runner.run(runner_cancel).await;
    });

    shutdown_signal().await;
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(30), runner_handle).await;
    tracing::info!("Worker stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
