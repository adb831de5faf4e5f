/// RideLink sync engine - main entry point
use ridelink_core::transport::HttpRelayTransport;
use ridelink_core::{Config, SyncEngine};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let transport = HttpRelayTransport::new(config.relay_url.clone(), config.request_timeout)
        .map_err(|e| anyhow::anyhow!("Transport error: {}", e))?;
    let engine = SyncEngine::new(config, Arc::new(transport))
        .map_err(|e| anyhow::anyhow!("Engine error: {}", e))?;

    info!("Starting RideLink sync engine");
    info!("   Device ID: {}", engine.device_id);

    // Log every notification so the engine is observable from the terminal
    let (_observer, mut notifications) = engine.subscribe().await;
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            info!("notification: {:?}", notification);
        }
    });

    engine.start().await;
    wait_for_shutdown().await;
    engine.stop().await;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Ctrl+C received");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("SIGTERM received");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
