use std::net::SocketAddr;
use std::time::Duration;

use tabletop_core::keys::KeySpace;
use tabletop_store::StoreConfig;
use tabletop_worker::{JobRunner, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabletop_api::config::ServerConfig;
use tabletop_api::router::build_app_router;
use tabletop_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabletop_api=debug,tabletop_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let store_config = StoreConfig::from_env();
    tracing::info!(
        backend = ?store_config.backend,
        key_prefix = %store_config.key_prefix,
        "Loaded store configuration"
    );

    // --- Store ---
    let store = tabletop_store::connect(&store_config)
        .await
        .expect("Failed to connect to coordination store");
    tabletop_store::health_check(&store)
        .await
        .expect("Store health check failed");
    tracing::info!("Store health check passed");

    let keys = KeySpace::new(store_config.key_prefix.clone());
    let cancel = CancellationToken::new();

    // --- Memory backend housekeeping ---
    // A process-local store is invisible to a separate worker process, so
    // the job runner is hosted here instead.
    let mut background = Vec::new();
    if let Some(memory) = store.memory.clone() {
        background.push(memory.spawn_sweeper(
            Duration::from_secs(store_config.sweep_interval_secs),
            cancel.clone(),
        ));

        let worker_config = WorkerConfig::from_env();
        let runner = JobRunner::with_default_handlers(&store, keys.clone(), worker_config);
        let runner_cancel = cancel.clone();
        background.push(tokio::spawn(async move {
            runner.run(runner_cancel).await;
        }));
        tracing::info!("Memory store sweeper and embedded job runner started");
    }

    // --- App state ---
    let state = AppState::new(config.clone(), store, keys);

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    for handle in background {
        let _ = tokio::time::timeout(grace, handle).await;
    }
    tracing::info!("Background tasks stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
