//! Listen command - subscribe and print deliveries

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal;

use rvbus_client::{ClientEvent, DaemonAddr, RvConnection, SessionParams};
use rvbus_protocol::Mtype;

/// Listen command arguments
#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Daemon to connect to (tcp:host:port)
    #[arg(short, long, default_value = "tcp")]
    pub daemon: String,

    /// Subjects or wildcard patterns to subscribe to
    #[arg(required = true)]
    pub subjects: Vec<String>,
}

/// Run the listen command
pub async fn run(args: ListenArgs) -> Result<()> {
    let addr: DaemonAddr = args.daemon.parse()?;
    let mut conn = RvConnection::connect(&addr, SessionParams::default())
        .await
        .context("failed to connect to daemon")?;

    for subject in &args.subjects {
        conn.subscribe(subject)
            .await
            .with_context(|| format!("failed to subscribe to {subject}"))?;
        eprintln!("listening on {subject}");
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            event = conn.next_event() => {
                if let ClientEvent::Message { mtype, subject, reply, payload, .. } = event? {
                    let marker = if mtype == Mtype::Advisory { "!" } else { " " };
                    match reply {
                        Some(reply) => println!(
                            "{marker}{subject} (reply {reply}): {}",
                            String::from_utf8_lossy(&payload)
                        ),
                        None => println!("{marker}{subject}: {}", String::from_utf8_lossy(&payload)),
                    }
                }
            }
        }
    }

    conn.close().await?;
    Ok(())
}
