//! Room membership tracking and chat history
//!
//! Two independent namespaces keyed by an opaque community id: chat rooms
//! carry a bounded message history and no roster; voice rooms carry a
//! roster of usernames and no history. Rooms are created lazily on first
//! join and never destroyed for the life of the process (voice member sets
//! may sit empty).

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::messages::ChatMessagePayload;

/// Tag a connection carries while subscribed to a chat room
pub fn chat_tag(community_id: &str) -> String {
    format!("chat:{}", community_id)
}

/// Tag a connection carries while subscribed to a voice room
pub fn voice_tag(community_id: &str) -> String {
    format!("voice:{}", community_id)
}

/// One retained chat message
#[derive(Debug, Clone)]
pub struct ChatHistoryEntry {
    pub id: String,
    pub message: ChatMessagePayload,
}

pub struct RoomTracker {
    /// Bounded per-room chat history, oldest evicted first
    chat_history: RwLock<HashMap<String, VecDeque<ChatHistoryEntry>>>,
    /// Voice room member sets (usernames, not connections)
    voice_rooms: RwLock<HashMap<String, HashSet<String>>>,
    history_limit: usize,
}

impl RoomTracker {
    pub fn new(history_limit: usize) -> Self {
        Self {
            chat_history: RwLock::new(HashMap::new()),
            voice_rooms: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    /// Lazily create a chat room's history buffer
    pub async fn ensure_chat_room(&self, community_id: &str) {
        self.chat_history
            .write()
            .await
            .entry(community_id.to_string())
            .or_default();
    }

    /// Append a message to a room's history, evicting past the limit
    pub async fn append_chat(&self, community_id: &str, message: ChatMessagePayload) {
        let mut history = self.chat_history.write().await;
        let entries = history.entry(community_id.to_string()).or_default();
        entries.push_back(ChatHistoryEntry {
            id: Uuid::new_v4().to_string(),
            message,
        });
        while entries.len() > self.history_limit {
            entries.pop_front();
        }
    }

    /// Retained history for a room, oldest first
    pub async fn chat_history(&self, community_id: &str) -> Vec<ChatHistoryEntry> {
        self.chat_history
            .read()
            .await
            .get(community_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add a username to a voice room, returning the updated roster
    pub async fn voice_join(&self, community_id: &str, username: &str) -> Vec<String> {
        let mut rooms = self.voice_rooms.write().await;
        let members = rooms.entry(community_id.to_string()).or_default();
        members.insert(username.to_string());
        members.iter().cloned().collect()
    }

    /// Remove a username from a voice room, returning the updated roster.
    /// Returns None if the room was never created.
    pub async fn voice_leave(&self, community_id: &str, username: &str) -> Option<Vec<String>> {
        let mut rooms = self.voice_rooms.write().await;
        let members = rooms.get_mut(community_id)?;
        members.remove(username);
        Some(members.iter().cloned().collect())
    }

    /// Current voice roster for a room
    pub async fn voice_members(&self, community_id: &str) -> Vec<String> {
        self.voice_rooms
            .read()
            .await
            .get(community_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a username from every voice room it is a member of, returning
    /// each affected room with its updated roster (disconnect cleanup).
    pub async fn remove_user_from_voice(&self, username: &str) -> Vec<(String, Vec<String>)> {
        let mut rooms = self.voice_rooms.write().await;
        let mut affected = Vec::new();
        for (community_id, members) in rooms.iter_mut() {
            if members.remove(username) {
                affected.push((community_id.clone(), members.iter().cloned().collect()));
            }
        }
        affected
    }

    pub async fn chat_room_count(&self) -> usize {
        self.chat_history.read().await.len()
    }

    pub async fn voice_room_count(&self) -> usize {
        self.voice_rooms.read().await.len()
    }
}
