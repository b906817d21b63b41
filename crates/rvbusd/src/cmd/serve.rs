//! Serve command - run the message bus daemon

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal;
use tracing::{error, info, warn};

use rvbus_config::Config;
use rvbus_routing::BusFabric;
use rvbus_server::RvListener;

/// Serve command arguments
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to configuration file (defaults to rvbusd.toml if present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = load_config(args.config)?;
    config.validate().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.daemon.bind_addr(),
        service = config.daemon.service.as_deref().unwrap_or("(none)"),
        "rvbusd starting"
    );

    let fabric = Arc::new(BusFabric::new());
    let listener = RvListener::new(config.daemon.clone(), Arc::clone(&fabric));
    let metrics = listener.metrics();
    let shutdown = listener.shutdown_token();

    let server = tokio::spawn(listener.run());

    wait_for_shutdown().await;
    info!("shutdown signal received, stopping daemon");
    shutdown.cancel();

    match tokio::time::timeout(Duration::from_secs(5), server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            error!(error = %e, "daemon error");
            return Err(e.into());
        }
        Ok(Err(e)) => warn!(error = %e, "daemon task panicked"),
        Err(_) => warn!("daemon did not stop within timeout"),
    }

    let stats = metrics.snapshot();
    info!(
        sessions = stats.sessions_total,
        msgs_in = stats.msgs_in,
        msgs_out = stats.msgs_out,
        frame_errors = stats.frame_errors,
        "rvbusd shutdown complete"
    );
    Ok(())
}

/// Load configuration: explicit path must exist, otherwise try default
/// locations and fall back to built-in defaults.
fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(anyhow::anyhow!(
                    "config file not found: {}",
                    path.display()
                ));
            }
            Config::from_file(&path).context("failed to load configuration")
        }
        None => {
            let default_paths = [PathBuf::from("rvbusd.toml"), PathBuf::from("config.toml")];
            for path in &default_paths {
                if path.exists() {
                    info!(config = %path.display(), "using config file");
                    return Config::from_file(path).context("failed to load configuration");
                }
            }
            info!("no config file found, using defaults (TCP on port 7500)");
            Ok(Config::default())
        }
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
