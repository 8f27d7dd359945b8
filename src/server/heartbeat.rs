//! Liveness sweep
//!
//! Two-tick protocol: each sweep closes every connection whose liveness
//! flag is still clear from the previous sweep, then clears the flag and
//! sends a PING. Any PONG (or nothing but a PONG) in between keeps the
//! connection alive, so a peer has one full interval to respond.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::protocol::{Frame, Opcode};
use crate::server::hub::Hub;

impl Hub {
    /// One heartbeat pass over every live connection
    pub async fn sweep(&self) {
        let connections = self.registry.all().await;
        debug!(connections = connections.len(), "heartbeat sweep");

        for handle in connections {
            if !handle.is_alive() {
                warn!(
                    connection = %handle.id(),
                    uptime_secs = handle.uptime().as_secs(),
                    "no pong since last sweep, terminating connection"
                );
                handle.close();
                continue;
            }
            handle.mark_alive(false);
            handle.send(&Frame::empty(Opcode::Ping));
        }
    }

    /// Spawn the periodic heartbeat task
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let interval = hub.config().heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // The first tick fires immediately; skip it so connections get
            // a full interval before the first sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                hub.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::connection::{ClientHandle, Outbound};
    use crate::storage::{MemoryProfiles, MemoryStore};
    use crate::RelayConfig;
    use tokio::sync::mpsc;

    fn hub() -> Hub {
        Hub::new(
            RelayConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryProfiles::new()),
        )
    }

    async fn connect(hub: &Hub, id: &str) -> (Arc<ClientHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = Arc::new(ClientHandle::new(
            id.to_string(),
            "127.0.0.1:7777".parse().unwrap(),
            tx,
        ));
        hub.register(Arc::clone(&handle)).await.unwrap();
        (handle, rx)
    }

    #[tokio::test]
    async fn test_silent_connection_closed_on_second_sweep() {
        let hub = hub();
        let (conn, _rx) = connect(&hub, "c1").await;

        // First sweep: still alive from accept, gets pinged.
        hub.sweep().await;
        assert!(!conn.is_closed());

        // No pong arrives; the second sweep terminates it.
        hub.sweep().await;
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_pong_between_sweeps_keeps_connection_alive() {
        let hub = hub();
        let (conn, _rx) = connect(&hub, "c1").await;

        hub.sweep().await;
        hub.dispatch(&conn, Frame::empty(Opcode::Pong)).await.unwrap();
        hub.sweep().await;

        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_sweep_sends_ping_to_live_connections() {
        let hub = hub();
        let (_conn, mut rx) = connect(&hub, "c1").await;

        // Drain the HANDSHAKE greeting.
        let _ = rx.recv().await.unwrap();

        hub.sweep().await;
        match rx.recv().await.unwrap() {
            Outbound::Frame(bytes) => {
                // Opcode byte sits after the 2-byte magic and 1-byte version.
                assert_eq!(bytes[3], Opcode::Ping as u8);
            }
            other => panic!("unexpected outbound item: {:?}", other),
        }
    }
}
