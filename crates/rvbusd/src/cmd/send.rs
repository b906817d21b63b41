//! Send command - publish one message to a running daemon

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use rvbus_client::{ClientEvent, DaemonAddr, RvConnection, SessionParams};
use rvbus_protocol::FieldType;

/// Send command arguments
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Daemon to connect to (tcp:host:port)
    #[arg(short, long, default_value = "tcp")]
    pub daemon: String,

    /// Subject to publish on
    pub subject: String,

    /// Message payload
    pub message: String,

    /// Wait for a reply on a fresh inbox
    #[arg(short, long)]
    pub reply: bool,

    /// Seconds to wait for the reply
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

/// Run the send command
pub async fn run(args: SendArgs) -> Result<()> {
    let addr: DaemonAddr = args.daemon.parse()?;
    let mut conn = RvConnection::connect(&addr, SessionParams::default())
        .await
        .context("failed to connect to daemon")?;

    if args.reply {
        let inbox = conn.make_inbox();
        conn.publish(
            &args.subject,
            Some(&inbox),
            FieldType::String,
            args.message.as_bytes(),
        )
        .await?;

        let reply = tokio::time::timeout(
            Duration::from_secs(args.timeout),
            wait_for_message(&mut conn),
        )
        .await
        .context("timed out waiting for reply")??;
        println!("{reply}");
    } else {
        conn.publish(&args.subject, None, FieldType::String, args.message.as_bytes())
            .await?;
    }

    conn.close().await?;
    Ok(())
}

async fn wait_for_message(conn: &mut RvConnection) -> Result<String> {
    loop {
        if let ClientEvent::Message { payload, .. } = conn.next_event().await? {
            return Ok(String::from_utf8_lossy(&payload).into_owned());
        }
    }
}
