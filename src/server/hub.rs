//! The hub: shared mutable state behind the dispatcher
//!
//! Owns the connection registry, the room tracker and the collaborator
//! handles. Every mutation of shared state goes through a hub method, so
//! the locking discipline lives in one place. Broadcast reads take
//! consistent snapshots; a connection removed by `disconnect` can never
//! receive a broadcast computed afterwards.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol::messages;
use crate::protocol::{Frame, Opcode};
use crate::server::connection::ClientHandle;
use crate::server::registry::ConnectionRegistry;
use crate::server::rooms::{voice_tag, RoomTracker};
use crate::storage::{MessageStore, ProfileDirectory};
use crate::RelayConfig;

/// Point-in-time counters exposed to the external health-check surface
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub connections: usize,
    pub online_users: usize,
    pub chat_rooms: usize,
    pub voice_rooms: usize,
    pub uptime_secs: u64,
}

pub struct Hub {
    config: RelayConfig,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) rooms: RoomTracker,
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) profiles: Arc<dyn ProfileDirectory>,
    started_at: Instant,
}

impl Hub {
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn MessageStore>,
        profiles: Arc<dyn ProfileDirectory>,
    ) -> Self {
        let rooms = RoomTracker::new(config.chat_history_limit);
        Self {
            config,
            registry: ConnectionRegistry::new(),
            rooms,
            store,
            profiles,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Track a freshly accepted connection and open the session with a
    /// HANDSHAKE frame carrying its generated connection id.
    pub async fn register(&self, handle: Arc<ClientHandle>) -> Result<()> {
        self.registry.insert(Arc::clone(&handle)).await;

        let payload = messages::encode_string_payload(handle.id())?;
        handle.send(&Frame::new(Opcode::Handshake, payload));

        debug!(connection = %handle.id(), remote = %handle.remote_addr(), "connection registered");
        Ok(())
    }

    /// Full disconnect cleanup: registry, username index, room membership,
    /// then the presence and voice roster re-broadcasts the departure
    /// implies. Runs exactly once per connection, before any later
    /// broadcast can be computed.
    pub async fn disconnect(&self, handle: &Arc<ClientHandle>) {
        if self.registry.remove(handle.id()).await.is_none() {
            // Already cleaned up by a racing path.
            return;
        }

        let identity = handle.identity().await;
        let Some(identity) = identity else {
            debug!(connection = %handle.id(), "anonymous connection closed");
            return;
        };

        let released = self
            .registry
            .release_user(&identity.username, handle.id())
            .await;

        if released {
            self.broadcast_presence().await;

            // Voice rooms key members by username, so only the connection
            // that still owns the name may scrub it.
            let affected = self.rooms.remove_user_from_voice(&identity.username).await;
            for (community_id, members) in affected {
                self.broadcast_voice_roster(&community_id, members).await;
            }
        }

        let online = self.registry.online_user_count().await;
        info!(
            username = %identity.username,
            connection = %handle.id(),
            online,
            "user disconnected"
        );
    }

    /// Push the full online-user list to every identified connection
    pub async fn broadcast_presence(&self) {
        let users = self.registry.online_usernames().await;
        let payload = match messages::encode_user_list(&users) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(%err, "presence payload encoding failed");
                return;
            }
        };

        let frame = Frame::new(Opcode::UsersOnline, payload).encode_to_bytes();
        for handle in self.registry.identified().await {
            handle.send_raw(frame.clone());
        }
    }

    /// Push a voice room's full roster to every connection tagged with it
    pub async fn broadcast_voice_roster(&self, community_id: &str, members: Vec<String>) {
        let payload = messages::RosterPayload {
            community_id: community_id.to_string(),
            members,
        };
        let encoded = match payload.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                debug!(%err, "voice roster payload encoding failed");
                return;
            }
        };

        self.broadcast_to_room(
            &voice_tag(community_id),
            Frame::new(Opcode::VoiceUsers, encoded),
            None,
        )
        .await;
    }

    /// Fan a frame out to every identified connection tagged with a room,
    /// optionally excluding one connection id. A failed or shed delivery to
    /// one recipient never aborts the rest of the fan-out.
    pub async fn broadcast_to_room(&self, tag: &str, frame: Frame, exclude: Option<&str>) {
        let bytes: Bytes = frame.encode_to_bytes();
        for handle in self.registry.identified().await {
            if exclude == Some(handle.id()) {
                continue;
            }
            if handle.in_room(tag).await {
                handle.send_raw(bytes.clone());
            }
        }
    }

    /// Current presence set, exposed to the HTTP collaborators
    pub async fn online_usernames(&self) -> Vec<String> {
        self.registry.online_usernames().await
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.connection_count().await
    }

    /// Counters for the external health-check surface
    pub async fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.registry.connection_count().await,
            online_users: self.registry.online_user_count().await,
            chat_rooms: self.rooms.chat_room_count().await,
            voice_rooms: self.rooms.voice_room_count().await,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}
