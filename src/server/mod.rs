//! Server side of the realtime core
//!
//! The [`Hub`] owns all shared state; the transport layer in
//! [`listener`] feeds it decoded frames and the dispatcher routes them.

pub mod connection;
pub mod dispatcher;
pub mod heartbeat;
pub mod hub;
pub mod listener;
pub mod registry;
pub mod rooms;

pub use connection::{ClientHandle, Identity, Outbound};
pub use hub::{Hub, StatsSnapshot};
pub use listener::RelayServer;
pub use registry::ConnectionRegistry;
pub use rooms::{chat_tag, voice_tag, ChatHistoryEntry, RoomTracker};
