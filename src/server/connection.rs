//! Per-connection handle shared between the transport tasks and the hub
//!
//! The transport layer owns the socket and its reader/writer tasks; the
//! registry and room tracker only hold `Arc` references to the handle and
//! look connections up by id or username. Dropping the last reference
//! closes the outbound queue and lets the writer task drain out.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, warn};

use crate::protocol::Frame;

/// Identity bound to a connection by USER_JOIN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub avatar: String,
}

/// Items travelling down the per-connection outbound queue
#[derive(Debug)]
pub enum Outbound {
    /// An encoded frame to write to the socket
    Frame(Bytes),
    /// Drain what is queued, then shut the socket down
    Close,
}

/// A live transport connection as seen by the hub
pub struct ClientHandle {
    /// Generated at accept, echoed back in HANDSHAKE_ACK
    id: String,
    remote_addr: SocketAddr,
    /// Bounded send queue drained by the writer task
    outbound: mpsc::Sender<Outbound>,
    /// Wakes the connection task for forced termination
    shutdown: Notify,
    closed: AtomicBool,
    /// Heartbeat liveness flag: cleared at each sweep, set again by PONG
    alive: AtomicBool,
    identity: RwLock<Option<Identity>>,
    /// Room tags of the form `chat:<id>` / `voice:<id>`
    rooms: RwLock<HashSet<String>>,
    connected_at: Instant,
}

impl ClientHandle {
    pub fn new(id: String, remote_addr: SocketAddr, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            remote_addr,
            outbound,
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            identity: RwLock::new(None),
            rooms: RwLock::new(HashSet::new()),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Queue a frame for delivery. Returns false if it could not be queued.
    ///
    /// A full queue means this consumer is too slow to keep up with its
    /// broadcasts; the frame is dropped for this recipient only, never
    /// stalling the sender or the rest of the fan-out.
    pub fn send(&self, frame: &Frame) -> bool {
        self.send_raw(frame.encode_to_bytes())
    }

    /// Queue pre-encoded frame bytes (used by broadcasts to encode once)
    pub fn send_raw(&self, bytes: Bytes) -> bool {
        match self.outbound.try_send(Outbound::Frame(bytes)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    connection = %self.id,
                    "outbound queue full, dropping frame for slow consumer"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = %self.id, "send on closed connection dropped");
                false
            }
        }
    }

    /// Force-terminate the connection task (heartbeat timeout, CLOSE opcode).
    ///
    /// Safe to call repeatedly; the single waiter in the connection task
    /// observes the stored notify permit even if it has not reached its
    /// `select!` yet.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Whether [`close`](Self::close) has been requested
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once close has been requested. Single waiter only.
    pub async fn wait_closed(&self) {
        if self.is_closed() {
            return;
        }
        self.shutdown.notified().await;
    }

    /// Ask the writer task to drain the queue and shut the socket down
    pub fn finish_writer(&self) {
        let _ = self.outbound.try_send(Outbound::Close);
    }

    pub fn mark_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn set_identity(&self, identity: Identity) {
        *self.identity.write().await = Some(identity);
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    pub async fn username(&self) -> Option<String> {
        self.identity.read().await.as_ref().map(|i| i.username.clone())
    }

    pub async fn join_room(&self, tag: String) {
        self.rooms.write().await.insert(tag);
    }

    pub async fn leave_room(&self, tag: &str) {
        self.rooms.write().await.remove(tag);
    }

    pub async fn in_room(&self, tag: &str) -> bool {
        self.rooms.read().await.contains(tag)
    }

    pub async fn room_tags(&self) -> Vec<String> {
        self.rooms.read().await.iter().cloned().collect()
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .field("alive", &self.is_alive())
            .finish()
    }
}
