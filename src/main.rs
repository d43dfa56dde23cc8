//! floodgate: a TCP echo-probe server with a hard connection cap
//!
//! Features:
//! - Hard global cap on concurrently admitted connections
//! - Excess connections reset immediately at the accept boundary
//! - Draining shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

use floodgate::{Config, Server, ShutdownHandle};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        connection_limit = config.connection_limit.get(),
        drain_timeout_secs = config.drain_timeout.as_secs(),
        "Starting floodgate server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::start(&config).await?;

    let handle = server.shutdown_handle();
    tokio::spawn(shutdown_on_signal(handle));

    server.wait().await?;
    Ok(())
}

/// Trigger draining on SIGINT or SIGTERM.
async fn shutdown_on_signal(handle: ShutdownHandle) {
    if let Err(e) = wait_for_signal().await {
        error!(error = %e, "Failed to register signal handlers");
        return;
    }
    handle.shutdown();
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }
    Ok(())
}
