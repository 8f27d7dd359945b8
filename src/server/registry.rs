//! Connection registry: live connections and the username index
//!
//! At most one connection is registered per username at any instant; a
//! second USER_JOIN for the same name silently supersedes the first (the
//! superseded connection stays open and receives no eviction notice).
//! Presence is derived from the username index key set, never stored
//! separately.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::server::connection::ClientHandle;

#[derive(Default)]
pub struct ConnectionRegistry {
    /// All live connections by connection id
    connections: RwLock<HashMap<String, Arc<ClientHandle>>>,
    /// Identified connections: username -> connection id (last join wins)
    users: RwLock<HashMap<String, String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection
    pub async fn insert(&self, handle: Arc<ClientHandle>) {
        self.connections
            .write()
            .await
            .insert(handle.id().to_string(), handle);
    }

    /// Drop a connection by id, returning the handle if it was tracked
    pub async fn remove(&self, conn_id: &str) -> Option<Arc<ClientHandle>> {
        self.connections.write().await.remove(conn_id)
    }

    pub async fn get(&self, conn_id: &str) -> Option<Arc<ClientHandle>> {
        self.connections.read().await.get(conn_id).cloned()
    }

    /// Bind a username to a connection id, superseding any prior binding.
    /// Returns the superseded connection id, if any.
    pub async fn bind_user(&self, username: &str, conn_id: &str) -> Option<String> {
        let previous = self
            .users
            .write()
            .await
            .insert(username.to_string(), conn_id.to_string());
        if let Some(ref prev) = previous {
            if prev != conn_id {
                debug!(
                    %username,
                    superseded = %prev,
                    by = %conn_id,
                    "username binding superseded by a newer join"
                );
            }
        }
        previous.filter(|prev| prev != conn_id)
    }

    /// Release a username binding, but only if it still points at this
    /// connection. A superseded connection must not evict its successor.
    pub async fn release_user(&self, username: &str, conn_id: &str) -> bool {
        let mut users = self.users.write().await;
        if users.get(username).map(String::as_str) == Some(conn_id) {
            users.remove(username);
            true
        } else {
            false
        }
    }

    /// Look up the live connection currently bound to a username
    pub async fn by_username(&self, username: &str) -> Option<Arc<ClientHandle>> {
        let conn_id = self.users.read().await.get(username).cloned()?;
        self.connections.read().await.get(&conn_id).cloned()
    }

    /// Current online usernames (the presence set)
    pub async fn online_usernames(&self) -> Vec<String> {
        self.users.read().await.keys().cloned().collect()
    }

    /// Snapshot of every identified connection, for presence broadcasts
    pub async fn identified(&self) -> Vec<Arc<ClientHandle>> {
        let users = self.users.read().await;
        let connections = self.connections.read().await;
        users
            .values()
            .filter_map(|conn_id| connections.get(conn_id).cloned())
            .collect()
    }

    /// Snapshot of every live connection, identified or not (heartbeat sweep)
    pub async fn all(&self) -> Vec<Arc<ClientHandle>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn online_user_count(&self) -> usize {
        self.users.read().await.len()
    }
}
