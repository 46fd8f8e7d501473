//! Storage collaborator seam for Beacon.
//!
//! The engine consumes persistence through this narrow trait: key lookups
//! for users and groups, and monotonic delivery/read flag updates for
//! messages. Message and membership durability is owned by the surrounding
//! application; the engine is injected with an implementation at
//! construction and never touches concrete storage types while handling
//! events.

use crate::channel::UserId;
use async_trait::async_trait;
use beacon_protocol::UserSummary;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Storage collaborator errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The collaborator could not be reached or failed the call.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A chat group with its current membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current member user identities.
    pub members: Vec<UserId>,
}

impl Group {
    /// Create a new group.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, members: Vec<UserId>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            members,
        }
    }
}

/// Delivery/read flags for a persisted message.
///
/// Both flags are monotonic: once set they never revert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryState {
    /// Whether the message reached the recipient's channel.
    pub is_delivered: bool,
    /// When delivery happened, milliseconds since the epoch.
    pub delivered_at: Option<u64>,
    /// Whether the recipient read the message.
    pub is_read: bool,
}

/// Narrow persistence interface consumed by the engine.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Look up a user's identity snapshot.
    async fn find_user_by_id(&self, user_id: &str) -> Result<UserSummary, StorageError>;

    /// Look up a group and its current membership.
    async fn find_group_by_id(&self, group_id: &str) -> Result<Group, StorageError>;

    /// Check whether a user belongs to a group.
    async fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let group = self.find_group_by_id(group_id).await?;
        Ok(group.members.iter().any(|member| member == user_id))
    }

    /// Mark a message delivered. Idempotent; never unsets.
    async fn mark_message_delivered(&self, message_id: &str) -> Result<(), StorageError>;

    /// Mark a message read. Idempotent; never unsets.
    async fn mark_message_read(&self, message_id: &str) -> Result<(), StorageError>;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// In-memory storage, used by the server's default wiring and by tests.
///
/// Messages are created by the surrounding application; this store records
/// delivery flags keyed by message id without requiring the message row to
/// be seeded first.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, UserSummary>,
    groups: DashMap<String, Group>,
    messages: DashMap<String, DeliveryState>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn insert_user(&self, user: UserSummary) {
        self.users.insert(user.id.clone(), user);
    }

    /// Add or replace a group.
    pub fn insert_group(&self, group: Group) {
        self.groups.insert(group.id.clone(), group);
    }

    /// Get a message's delivery flags, if any receipt has been recorded.
    #[must_use]
    pub fn delivery_state(&self, message_id: &str) -> Option<DeliveryState> {
        self.messages.get(message_id).map(|state| *state)
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<UserSummary, StorageError> {
        self.users
            .get(user_id)
            .map(|user| user.clone())
            .ok_or_else(|| StorageError::NotFound(format!("user {user_id}")))
    }

    async fn find_group_by_id(&self, group_id: &str) -> Result<Group, StorageError> {
        self.groups
            .get(group_id)
            .map(|group| group.clone())
            .ok_or_else(|| StorageError::NotFound(format!("group {group_id}")))
    }

    async fn mark_message_delivered(&self, message_id: &str) -> Result<(), StorageError> {
        let mut state = self.messages.entry(message_id.to_string()).or_default();
        if !state.is_delivered {
            state.is_delivered = true;
            state.delivered_at = Some(now_millis());
        }
        Ok(())
    }

    async fn mark_message_read(&self, message_id: &str) -> Result<(), StorageError> {
        let mut state = self.messages.entry(message_id.to_string()).or_default();
        state.is_read = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_and_group_lookup() {
        let store = MemoryStore::new();
        store.insert_user(UserSummary::new("u1", "Alice"));
        store.insert_group(Group::new("g1", "Team", vec!["u1".into(), "u2".into()]));

        assert_eq!(store.find_user_by_id("u1").await.unwrap().display_name, "Alice");
        assert!(matches!(
            store.find_user_by_id("missing").await,
            Err(StorageError::NotFound(_))
        ));

        let group = store.find_group_by_id("g1").await.unwrap();
        assert_eq!(group.members.len(), 2);
        assert!(store.is_member("g1", "u2").await.unwrap());
        assert!(!store.is_member("g1", "u3").await.unwrap());
        assert!(matches!(
            store.is_member("missing", "u1").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delivery_flags_are_monotonic() {
        let store = MemoryStore::new();

        store.mark_message_delivered("m1").await.unwrap();
        let first = store.delivery_state("m1").unwrap();
        assert!(first.is_delivered);
        let delivered_at = first.delivered_at.unwrap();

        // A repeat ack keeps the original delivery timestamp
        store.mark_message_delivered("m1").await.unwrap();
        let second = store.delivery_state("m1").unwrap();
        assert_eq!(second.delivered_at, Some(delivered_at));

        store.mark_message_read("m1").await.unwrap();
        let third = store.delivery_state("m1").unwrap();
        assert!(third.is_read);
        assert!(third.is_delivered);
    }
}
