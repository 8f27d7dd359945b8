//! Persistence collaborators consumed by the realtime core
//!
//! Only direct messages are durable; chat, voice and call events are
//! fan-out-only. The core calls [`MessageStore::append`] synchronously
//! before forwarding a DM, and [`ProfileDirectory`] to fill in a missing
//! avatar at identity bind. Real implementations live outside this crate;
//! the in-memory versions here back the binary and the tests.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::current_timestamp;
use crate::error::Result;

/// A persisted direct message record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDirectMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    /// Milliseconds since UNIX epoch
    pub timestamp: u64,
    pub read: bool,
}

/// Durability sink for direct messages
pub trait MessageStore: Send + Sync {
    /// Append a direct message, returning the stored record
    fn append(&self, from: &str, to: &str, body: &str) -> Result<StoredDirectMessage>;

    /// Fetch the conversation between two users, oldest first
    fn conversation(&self, user_a: &str, user_b: &str) -> Vec<StoredDirectMessage>;
}

/// Username -> profile lookup consumed for UI-level enrichment
pub trait ProfileDirectory: Send + Sync {
    /// Avatar reference for a username, if one is known
    fn avatar_for(&self, username: &str) -> Option<String>;
}

/// Conversations are keyed by the sorted username pair, so both directions
/// of a DM land in the same thread.
fn conversation_key(user_a: &str, user_b: &str) -> String {
    let mut pair = [user_a, user_b];
    pair.sort_unstable();
    pair.join("_")
}

/// In-memory direct message store
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Vec<StoredDirectMessage>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryStore {
    fn append(&self, from: &str, to: &str, body: &str) -> Result<StoredDirectMessage> {
        let record = StoredDirectMessage {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
            timestamp: current_timestamp(),
            read: false,
        };

        let mut conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conversations
            .entry(conversation_key(from, to))
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    fn conversation(&self, user_a: &str, user_b: &str) -> Vec<StoredDirectMessage> {
        let conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conversations
            .get(&conversation_key(user_a, user_b))
            .cloned()
            .unwrap_or_default()
    }
}

/// In-memory profile directory
#[derive(Debug, Default)]
pub struct MemoryProfiles {
    avatars: Mutex<HashMap<String, String>>,
}

impl MemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an avatar for a username
    pub fn insert(&self, username: &str, avatar: &str) {
        self.avatars
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(username.to_string(), avatar.to_string());
    }
}

impl ProfileDirectory for MemoryProfiles {
    fn avatar_for(&self, username: &str) -> Option<String> {
        self.avatars
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(username)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_fetch_conversation() {
        let store = MemoryStore::new();
        store.append("alice", "bob", "hi bob").unwrap();
        store.append("bob", "alice", "hi alice").unwrap();

        let thread = store.conversation("alice", "bob");
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].body, "hi bob");
        assert_eq!(thread[1].body, "hi alice");
        assert!(!thread[0].read);
    }

    #[test]
    fn test_conversation_key_is_direction_independent() {
        let store = MemoryStore::new();
        store.append("zoe", "adam", "one").unwrap();

        assert_eq!(store.conversation("adam", "zoe").len(), 1);
        assert_eq!(store.conversation("zoe", "adam").len(), 1);
        assert!(store.conversation("zoe", "carol").is_empty());
    }

    #[test]
    fn test_stored_record_serializes() {
        let store = MemoryStore::new();
        let record = store.append("alice", "bob", "hello").unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let back: StoredDirectMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_profile_lookup() {
        let profiles = MemoryProfiles::new();
        profiles.insert("alice", "/uploads/alice.png");

        assert_eq!(
            profiles.avatar_for("alice").as_deref(),
            Some("/uploads/alice.png")
        );
        assert!(profiles.avatar_for("nobody").is_none());
    }
}
