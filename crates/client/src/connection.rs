//! Async daemon connection
//!
//! Drives an [`RvClient`] state machine over a TCP socket. The wrapper owns
//! the socket; every call flushes whatever the state machine queued.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use rvbus_protocol::FieldType;

use crate::client::{ClientEvent, RvClient, SessionParams};
use crate::connector::DaemonAddr;
use crate::error::{ClientError, Result};

/// Seconds of send silence before a keepalive frame goes out
const KEEPALIVE_SECS: u64 = 30;

enum Transport {
    Tcp(TcpStream),
    Null,
}

/// A live session with an rvbus daemon
pub struct RvConnection {
    client: RvClient,
    transport: Transport,
    pending: VecDeque<ClientEvent>,
    read_buf: BytesMut,
    keepalive: Interval,
}

impl RvConnection {
    /// Connect and complete the session handshake
    ///
    /// For a [`DaemonAddr::Null`] address no socket is opened and the
    /// session is ready immediately.
    pub async fn connect(addr: &DaemonAddr, params: SessionParams) -> Result<Self> {
        let mut keepalive = interval(Duration::from_secs(KEEPALIVE_SECS));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut conn = match addr {
            DaemonAddr::Null => {
                let client = RvClient::null(params);
                info!(session = client.session(), "null session ready");
                Self {
                    client,
                    transport: Transport::Null,
                    pending: VecDeque::new(),
                    read_buf: BytesMut::with_capacity(8192),
                    keepalive,
                }
            }
            DaemonAddr::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                debug!(%host, port, "daemon socket connected");
                Self {
                    client: RvClient::new(params),
                    transport: Transport::Tcp(stream),
                    pending: VecDeque::new(),
                    read_buf: BytesMut::with_capacity(8192),
                    keepalive,
                }
            }
        };

        conn.handshake().await?;
        Ok(conn)
    }

    async fn handshake(&mut self) -> Result<()> {
        if self.client.is_connected() {
            return Ok(());
        }
        while !self.client.is_connected() {
            self.flush().await?;
            let events = self.read_once().await?;
            self.pending.extend(events);
        }
        self.flush().await?;
        info!(session = self.client.session(), "session established");
        Ok(())
    }

    /// Session identifier assigned during the handshake
    pub fn session(&self) -> &str {
        self.client.session()
    }

    /// Mint a fresh inbox subject under this session
    pub fn make_inbox(&mut self) -> String {
        self.client.make_inbox()
    }

    /// Publish a message and flush it to the daemon
    pub async fn publish(
        &mut self,
        subject: &str,
        reply: Option<&str>,
        ftype: FieldType,
        payload: &[u8],
    ) -> Result<()> {
        self.client.publish(subject, reply, ftype, payload)?;
        self.flush().await
    }

    /// Register interest in a subject or wildcard pattern
    pub async fn subscribe(&mut self, subject: &str) -> Result<()> {
        self.client.subscribe(subject)?;
        self.flush().await
    }

    /// Drop one reference to a subscription
    pub async fn unsubscribe(&mut self, subject: &str) -> Result<()> {
        self.client.unsubscribe(subject)?;
        self.flush().await
    }

    /// Wait for the next delivery from the daemon
    ///
    /// Sends keepalives while idle. On a null session this waits forever
    /// once nothing is pending.
    pub async fn next_event(&mut self) -> Result<ClientEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            match &mut self.transport {
                Transport::Null => {
                    // Nothing will ever arrive
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Transport::Tcp(stream) => {
                    tokio::select! {
                        _ = self.keepalive.tick() => {
                            self.client.send_keepalive();
                            write_pending(&mut self.client, stream).await?;
                        }
                        read = stream.read_buf(&mut self.read_buf) => {
                            let n = read?;
                            if n == 0 {
                                return Err(ClientError::Closed);
                            }
                            let chunk = self.read_buf.split();
                            let events = self.client.on_bytes(&chunk)?;
                            self.pending.extend(events);
                            write_pending(&mut self.client, stream).await?;
                            self.keepalive.reset();
                        }
                    }
                }
            }
        }
    }

    async fn read_once(&mut self) -> Result<Vec<ClientEvent>> {
        match &mut self.transport {
            Transport::Null => Ok(Vec::new()),
            Transport::Tcp(stream) => {
                let n = stream.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(ClientError::Closed);
                }
                let chunk = self.read_buf.split();
                self.client.on_bytes(&chunk)
            }
        }
    }

    /// Write out everything the state machine has queued
    pub async fn flush(&mut self) -> Result<()> {
        if !self.client.has_output() {
            return Ok(());
        }
        let bytes = self.client.take_output();
        if let Transport::Tcp(stream) = &mut self.transport {
            stream.write_all(&bytes).await?;
            self.keepalive.reset();
        }
        Ok(())
    }

    /// Shut the session down
    pub async fn close(mut self) -> Result<()> {
        self.flush().await?;
        if let Transport::Tcp(stream) = &mut self.transport {
            stream.shutdown().await?;
        }
        debug!(session = self.client.session(), "session closed");
        Ok(())
    }
}

async fn write_pending(client: &mut RvClient, stream: &mut TcpStream) -> Result<()> {
    if client.has_output() {
        let bytes = client.take_output();
        stream.write_all(&bytes).await?;
    }
    Ok(())
}
