//! TCP accept loop and per-connection transport tasks
//!
//! Each accepted socket gets a reader task (frame reassembly + dispatch)
//! and a writer task (drains the handle's outbound queue). The reader owns
//! the connection lifecycle: when it ends, for any reason, the hub is told
//! to clean up exactly once and the writer is asked to drain and shut the
//! socket down.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::protocol::messages::encode_string_payload;
use crate::protocol::{Frame, FrameCodec, Opcode};
use crate::server::connection::{ClientHandle, Outbound};
use crate::server::hub::Hub;
use crate::{generate_connection_id, RelayConfig};

/// How long a finished connection waits for its writer to drain
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RelayServer {
    config: RelayConfig,
    hub: Arc<Hub>,
    listener: TcpListener,
}

impl RelayServer {
    /// Bind the listen socket. Port 0 binds an ephemeral port; the actual
    /// address is available from [`local_addr`](Self::local_addr).
    pub async fn bind(config: RelayConfig, hub: Arc<Hub>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "relay server listening");
        Ok(Self {
            config,
            hub,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<()> {
        loop {
            let (socket, remote_addr) = self.listener.accept().await?;

            if self.hub.connection_count().await >= self.config.max_connections {
                warn!(%remote_addr, "connection limit reached, refusing connection");
                drop(socket);
                continue;
            }

            let hub = Arc::clone(&self.hub);
            let config = self.config.clone();
            tokio::spawn(async move {
                debug!(%remote_addr, "connection accepted");
                if let Err(err) = handle_socket(hub, config, socket).await {
                    debug!(%remote_addr, %err, "connection ended with error");
                }
            });
        }
    }
}

/// Drive one connection from accept to cleanup
async fn handle_socket(hub: Arc<Hub>, config: RelayConfig, socket: TcpStream) -> Result<()> {
    socket.set_nodelay(true).ok();
    let remote_addr = socket.peer_addr()?;
    let (read_half, write_half) = socket.into_split();

    let (outbound_tx, outbound_rx) = mpsc::channel(config.send_queue_depth);
    let handle = Arc::new(ClientHandle::new(
        generate_connection_id(),
        remote_addr,
        outbound_tx,
    ));

    hub.register(Arc::clone(&handle)).await?;

    let writer_handle = Arc::clone(&handle);
    let mut writer_task = tokio::spawn(write_loop(write_half, outbound_rx, writer_handle));

    let result = tokio::select! {
        // Forced termination: heartbeat timeout, CLOSE opcode, supersede.
        _ = handle.wait_closed() => Ok(()),
        res = read_loop(&hub, &config, read_half, &handle) => res,
    };

    hub.disconnect(&handle).await;

    // Let queued frames drain before the socket goes away.
    handle.finish_writer();
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
        warn!(connection = %handle.id(), "writer did not drain in time, aborting");
        writer_task.abort();
    }

    debug!(
        connection = %handle.id(),
        uptime_secs = handle.uptime().as_secs(),
        "connection closed"
    );
    result
}

/// Read transport bytes, reassemble frames and dispatch them.
///
/// A malformed frame (bad magic, impossible length) poisons the byte
/// stream and tears the connection down; a bad payload inside a valid
/// frame only earns an ERROR report.
async fn read_loop(
    hub: &Arc<Hub>,
    config: &RelayConfig,
    mut read_half: OwnedReadHalf,
    handle: &Arc<ClientHandle>,
) -> Result<()> {
    let mut codec = FrameCodec::with_max_payload(config.max_payload_size);
    let mut chunk = [0u8; 4096];

    loop {
        let n = read_half.read(&mut chunk).await?;
        if n == 0 {
            debug!(connection = %handle.id(), "peer closed the stream");
            return Ok(());
        }
        codec.feed(&chunk[..n]);

        loop {
            match codec.decode_next() {
                Ok(Some(frame)) => {
                    if let Err(err) = hub.dispatch(handle, frame).await {
                        if err.is_fatal() {
                            report_error(handle, &err);
                            return Err(err);
                        }
                        warn!(connection = %handle.id(), %err, "frame rejected");
                        report_error(handle, &err);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(connection = %handle.id(), %err, "unrecoverable framing error");
                    report_error(handle, &err);
                    return Err(err);
                }
            }
        }
    }
}

/// Tell the peer what went wrong on the ERROR opcode, best effort
fn report_error(handle: &Arc<ClientHandle>, err: &RelayError) {
    if let Ok(payload) = encode_string_payload(&err.to_string()) {
        handle.send(&Frame::new(Opcode::Error, payload));
    }
}

/// Drain the outbound queue onto the socket
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    handle: Arc<ClientHandle>,
) {
    while let Some(item) = outbound_rx.recv().await {
        match item {
            Outbound::Frame(bytes) => {
                if let Err(err) = write_half.write_all(&bytes).await {
                    debug!(connection = %handle.id(), %err, "socket write failed");
                    handle.close();
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = write_half.shutdown().await;
}
