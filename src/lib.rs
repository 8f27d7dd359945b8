//! Realtime communication core for the BitPost community platform
//!
//! This library multiplexes presence tracking, chat-room messaging, voice-room
//! membership, direct-message relay and WebRTC call signaling over a single
//! persistent, binary-framed TCP connection per client.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;

pub use client::RelayClient;
pub use error::{RelayError, Result};
pub use server::{Hub, RelayServer, StatsSnapshot};

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique connection id, assigned to every accepted transport connection
pub fn generate_connection_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Relay server configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Server listen address
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Interval between heartbeat sweeps
    pub heartbeat_interval: Duration,
    /// Depth of the per-connection outbound frame queue
    pub send_queue_depth: usize,
    /// Chat messages retained per room before the oldest is evicted
    pub chat_history_limit: usize,
    /// Maximum accepted frame payload size in bytes
    pub max_payload_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3009".parse().unwrap(),
            max_connections: 10000,
            heartbeat_interval: Duration::from_secs(30),
            send_queue_depth: 256,
            chat_history_limit: 100,
            max_payload_size: 1024 * 1024, // 1MB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = generate_connection_id();
        let b = generate_connection_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.chat_history_limit, 100);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.max_connections > 0);
    }
}
