use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manager::api;
use manager::config::ManagerConfig;
use manager::docker::DockerCli;
use manager::pool::{BrowserPool, PoolMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manager=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting browser pool manager");

    let config = ManagerConfig::load()?;
    config.validate()?;

    let mode = PoolMode::from_env();
    info!(
        "Loaded configuration: bind_address={}, mode={:?}, pool_size={}, image={}",
        config.bind_address, mode, config.pool.num_browsers, config.pool.browser_image_name
    );

    let runtime = Arc::new(DockerCli::new());
    let pool = BrowserPool::new(config.pool.clone(), mode, runtime);

    info!("Initializing pool ({} slots)", config.pool.num_browsers);
    pool.init(config.pull_on_start)
        .await
        .context("pool initialization failed")?;
    info!("✓ Pool initialized");

    let app = api::router(pool.clone(), &config);
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);
    info!("Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    pool.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
/// Listens for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
