//! TCP listener and connection tasks
//!
//! One listener accepts sessions and spawns a task per connection. Each task
//! owns its [`RvService`] state machine and shuttles bytes between the
//! socket and the fabric:
//!
//! - socket bytes in -> `on_bytes` -> fabric forwards out
//! - fabric deliveries in -> `on_publish` -> socket bytes out
//! - a status interval ticks the heartbeat
//!
//! Backpressure pauses only the offending session's reads: while waiting
//! for relief the task keeps draining its own delivery queue and ticking
//! the heartbeat, so mutually backpressured sessions still make progress.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bytes::BytesMut;

use rvbus_config::DaemonConfig;
use rvbus_routing::{BusFabric, Fabric};

use crate::error::Result;
use crate::metrics::ServerMetrics;
use crate::service::{RvService, ServiceConfig};

/// The daemon's TCP listener
pub struct RvListener {
    config: DaemonConfig,
    fabric: Arc<BusFabric>,
    metrics: Arc<ServerMetrics>,
    shutdown: CancellationToken,
    next_gob: Arc<AtomicU64>,
}

impl RvListener {
    /// Create a listener over a shared fabric
    pub fn new(config: DaemonConfig, fabric: Arc<BusFabric>) -> Self {
        Self {
            config,
            fabric,
            metrics: Arc::new(ServerMetrics::new()),
            shutdown: CancellationToken::new(),
            next_gob: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Shared metrics handle
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Token that stops the accept loop and every session task
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, "daemon listening");
        self.serve(listener).await
    }

    /// Serve connections off an already-bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            // Transient accept failures (fd pressure) back off
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };
                    debug!(peer = %peer, "connection accepted");
                    self.metrics.session_opened();

                    let config = self.config.clone();
                    let fabric = Arc::clone(&self.fabric);
                    let metrics = Arc::clone(&self.metrics);
                    let shutdown = self.shutdown.clone();
                    let gob = self.next_gob.fetch_add(1, Ordering::Relaxed);

                    tokio::spawn(async move {
                        let svc_config = ServiceConfig {
                            ipaddr: match peer.ip() {
                                IpAddr::V4(v4) => u32::from(v4),
                                IpAddr::V6(_) => u32::from(std::net::Ipv4Addr::LOCALHOST),
                            },
                            ipport: peer.port(),
                            gob,
                            service: config.service.clone(),
                            trace_frames: config.trace_frames,
                        };
                        if let Err(e) =
                            handle_connection(stream, config, svc_config, fabric, &metrics, shutdown)
                                .await
                        {
                            error!(peer = %peer, error = %e, "session error");
                        }
                        metrics.session_closed();
                        debug!(peer = %peer, "connection closed");
                    });
                }
            }
        }
    }
}

fn configure_socket(stream: &TcpStream, config: &DaemonConfig) {
    if let Err(e) = stream.set_nodelay(config.tcp_nodelay) {
        warn!(error = %e, "failed to set TCP_NODELAY");
    }
    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_keepalive(config.tcp_keepalive) {
        warn!(error = %e, "failed to set SO_KEEPALIVE");
    }
    if let Err(e) = sock.set_recv_buffer_size(config.recv_buffer_size) {
        warn!(error = %e, "failed to set SO_RCVBUF");
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    config: DaemonConfig,
    svc_config: ServiceConfig,
    fabric: Arc<BusFabric>,
    metrics: &ServerMetrics,
    shutdown: CancellationToken,
) -> Result<()> {
    configure_socket(&stream, &config);

    let (tx, mut rx) = mpsc::channel(config.delivery_queue);
    let conn = fabric.attach(tx);
    let fabric: Arc<dyn Fabric> = fabric;
    let mut svc = RvService::new(Arc::clone(&fabric), conn, svc_config);

    let relief = fabric.relief();
    let mut buf = BytesMut::with_capacity(config.recv_buffer_size);
    let mut status = tokio::time::interval(Duration::from_secs(config.status_interval_secs));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of an interval fires immediately
    status.tick().await;

    let result: Result<()> = async {
        loop {
            if svc.has_output() {
                let out = svc.take_output();
                stream.write_all(&out).await?;
                metrics.wrote(out.len() as u64);
            }

            if svc.is_backpressured() {
                // Only the socket read is withheld; deliveries and the
                // heartbeat keep flowing while this session waits for
                // relief, otherwise two full queues could park each other.
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = relief.notified() => svc.clear_backpressure(),
                    _ = status.tick() => {
                        let id = svc.timer_id();
                        if id != 0 {
                            svc.on_timer(id)?;
                        }
                    }
                    delivery = rx.recv() => {
                        match delivery {
                            Some(msg) => {
                                svc.on_publish(&msg)?;
                                fabric.signal_relief();
                            }
                            None => break,
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = status.tick() => {
                    let id = svc.timer_id();
                    if id != 0 {
                        svc.on_timer(id)?;
                    }
                }

                delivery = rx.recv() => {
                    match delivery {
                        Some(msg) => {
                            svc.on_publish(&msg)?;
                            // Room freed in our queue may unblock a publisher
                            fabric.signal_relief();
                        }
                        None => break,
                    }
                }

                read = stream.read_buf(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    metrics.read(n as u64);
                    let bytes = buf.split();
                    svc.on_bytes(&bytes)?;
                }
            }
        }
        Ok(())
    }
    .await;

    // Flush whatever the state machine queued before the exit
    if svc.has_output() {
        let out = svc.take_output();
        let _ = stream.write_all(&out).await;
        metrics.wrote(out.len() as u64);
    }

    let stats = svc.stats();
    metrics.msgs_in.fetch_add(stats.msgs_recv, Ordering::Relaxed);
    metrics.msgs_out.fetch_add(stats.msgs_sent, Ordering::Relaxed);
    metrics
        .frame_errors
        .fetch_add(stats.frame_errors, Ordering::Relaxed);

    svc.close();
    result
}
