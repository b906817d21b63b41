//! rvbusd - RV-compatible publish/subscribe message bus daemon
//!
//! # Usage
//!
//! ```bash
//! # Run the daemon (default)
//! rvbusd
//! rvbusd --config rvbusd.toml
//!
//! # Publish one message to a running daemon
//! rvbusd send FOO.BAR "hello"
//!
//! # Subscribe and print deliveries
//! rvbusd listen "FOO.>"
//! ```

mod cmd;

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rvbus_config::{Config, LogConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// rvbusd - RV-compatible publish/subscribe message bus daemon
#[derive(Parser, Debug)]
#[command(name = "rvbusd")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // Global args that apply to serve when no subcommand given
    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon
    Serve(cmd::serve::ServeArgs),

    /// Publish one message to a running daemon
    Send(cmd::send::SendArgs),

    /// Subscribe and print deliveries until interrupted
    Listen(cmd::listen::ListenArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Serve(mut args)) => {
            // CLI global --config overrides subcommand config if both specified
            if args.config.is_none() && cli.config.is_some() {
                args.config = cli.config;
            }
            let filter = resolve_log_filter(cli.log_level.as_deref(), args.config.as_deref());
            init_logging(&filter)?;
            cmd::serve::run(args).await
        }
        Some(Command::Send(args)) => {
            // Tool output goes to stdout, keep logging quiet unless asked
            let filter = cli
                .log_level
                .map(|l| format!("rvbus={l}"))
                .unwrap_or_else(|| "rvbus=warn".to_string());
            init_logging(&filter)?;
            cmd::send::run(args).await
        }
        Some(Command::Listen(args)) => {
            let filter = cli
                .log_level
                .map(|l| format!("rvbus={l}"))
                .unwrap_or_else(|| "rvbus=warn".to_string());
            init_logging(&filter)?;
            cmd::listen::run(args).await
        }
        // No subcommand = run the daemon (default behavior)
        None => {
            let filter = resolve_log_filter(cli.log_level.as_deref(), cli.config.as_deref());
            init_logging(&filter)?;
            let args = cmd::serve::ServeArgs { config: cli.config };
            cmd::serve::run(args).await
        }
    }
}

/// Resolve log filter: CLI flag > config file > default "rvbus=info"
fn resolve_log_filter(cli_level: Option<&str>, config_path: Option<&Path>) -> String {
    if let Some(level) = cli_level {
        return format!("rvbus={level}");
    }
    if let Some(path) = config_path {
        if path.exists() {
            if let Ok(config) = Config::from_file(path) {
                return config.log.filter_directive();
            }
        }
    }
    LogConfig::default().filter_directive()
}

/// Initialize the tracing subscriber for logging
fn init_logging(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
