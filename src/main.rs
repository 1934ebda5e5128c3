use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use wakegate::config::Settings;
use wakegate::executor::CommandExecutor;
use wakegate::probe::ReadinessProbe;
use wakegate::proxy::WakerServer;
use wakegate::wake::WakeOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wakegate=debug".parse().expect("valid log directive")),
        )
        .init();

    let settings = Settings::from_env().map_err(|e| {
        error!(error = %e, "Invalid environment configuration");
        e
    })?;

    info!(
        bind = %settings.bind,
        port = settings.port,
        config_dir = %settings.config_dir.display(),
        home_dir = %settings.home_dir.display(),
        resume_cmd = ?settings.resume_cmd,
        max_body_bytes = settings.max_body_bytes,
        wake_timeout_secs = settings.wake_timeout.as_secs(),
        grace_window_secs = settings.grace_window.as_secs(),
        "Starting wakegate"
    );

    let addr: SocketAddr = format!("{}:{}", settings.bind, settings.port)
        .parse()
        .map_err(|e| {
            error!(bind = %settings.bind, port = settings.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let max_body_bytes = settings.max_body_bytes;
    let orchestrator = WakeOrchestrator::new(settings, Arc::new(CommandExecutor));

    let server = WakerServer::bind(
        addr,
        orchestrator,
        ReadinessProbe::default(),
        max_body_bytes,
        shutdown_rx,
    )
    .await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Waker server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown: stop accepting, close the listener, then exit.
    // In-flight wakes are left to finish or time out on their own.
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}
