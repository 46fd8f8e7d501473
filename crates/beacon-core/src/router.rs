//! Message fanout for Beacon.
//!
//! The router resolves chat events to reachable channels. The private path
//! is a presence lookup; the group path expands the group's current
//! membership into per-user pushes. There is no multicast machinery
//! independent of per-user routing, so membership changes observed at
//! fanout time are exactly what delivery reflects.

use crate::channel::{ChannelId, UserId};
use crate::presence::PresenceRegistry;
use crate::storage::{Storage, StorageError};
use beacon_protocol::ServerFrame;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Fanout errors.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// The target group does not exist.
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// The sender is not a member of the target group.
    #[error("User {user} is not a member of group {group}")]
    NotAMember {
        /// The target group.
        group: String,
        /// The offending sender.
        user: String,
    },

    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Routes chat events to reachable channels.
pub struct FanoutRouter {
    presence: Arc<PresenceRegistry>,
    storage: Arc<dyn Storage>,
}

impl FanoutRouter {
    /// Create a router over the given presence registry and storage seam.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>, storage: Arc<dyn Storage>) -> Self {
        Self { presence, storage }
    }

    /// Deliver an event to a single user's channel.
    ///
    /// Returns whether the recipient was reachable. An unreachable
    /// recipient is a normal outcome, never an error: the event is simply
    /// not delivered in real time, and durability for offline recipients
    /// belongs to the storage and notification collaborators.
    pub fn route_private(&self, recipient_id: &str, frame: ServerFrame) -> bool {
        match self.presence.get(recipient_id) {
            Some(channel) => {
                let pushed = channel.push(frame);
                trace!(recipient = %recipient_id, pushed, "Private route");
                pushed
            }
            None => {
                trace!(recipient = %recipient_id, "Private route: recipient unreachable");
                false
            }
        }
    }

    /// Fan an event out to every member of a group except the sender.
    ///
    /// The membership snapshot is re-fetched from storage on every call so
    /// delivery reflects current membership. Returns the members that were
    /// online at fanout time, for the sender's batched delivery
    /// confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::GroupNotFound`] if the group does not exist,
    /// [`FanoutError::NotAMember`] if the sender is not in the snapshot,
    /// or a storage error if the lookup failed.
    pub async fn route_group(
        &self,
        sender_id: &str,
        group_id: &str,
        frame: ServerFrame,
    ) -> Result<Vec<UserId>, FanoutError> {
        let group = match self.storage.find_group_by_id(group_id).await {
            Ok(group) => group,
            Err(StorageError::NotFound(_)) => {
                return Err(FanoutError::GroupNotFound(group_id.to_string()))
            }
            Err(err) => return Err(FanoutError::Storage(err)),
        };

        if !group.members.iter().any(|member| member == sender_id) {
            return Err(FanoutError::NotAMember {
                group: group_id.to_string(),
                user: sender_id.to_string(),
            });
        }

        let mut delivered = Vec::new();
        for member in &group.members {
            if member == sender_id {
                continue;
            }
            if let Some(channel) = self.presence.get(member) {
                if channel.push(frame.clone()) {
                    delivered.push(member.clone());
                }
            }
        }

        debug!(
            group = %group_id,
            sender = %sender_id,
            members = group.members.len(),
            delivered = delivered.len(),
            "Group fanout"
        );
        Ok(delivered)
    }

    /// Push an event to every online channel except the given one.
    ///
    /// Used for online/offline and availability transitions. Returns the
    /// number of channels pushed to.
    pub fn broadcast(&self, except: ChannelId, frame: &ServerFrame) -> usize {
        self.presence.broadcast_except(except, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::storage::{Group, MemoryStore};
    use async_trait::async_trait;
    use beacon_protocol::UserSummary;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct UnavailableStore;

    #[async_trait]
    impl Storage for UnavailableStore {
        async fn find_user_by_id(&self, _: &str) -> Result<UserSummary, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn find_group_by_id(&self, _: &str) -> Result<Group, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn mark_message_delivered(&self, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
        async fn mark_message_read(&self, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
    }

    fn online(
        presence: &PresenceRegistry,
        user_id: &str,
    ) -> UnboundedReceiver<ServerFrame> {
        let (channel, rx) = Channel::open(UserSummary::new(user_id, user_id.to_uppercase()));
        presence.register(channel);
        rx
    }

    fn new_message(sender: &str) -> ServerFrame {
        ServerFrame::NewMessage {
            message_id: "m1".to_string(),
            sender: UserSummary::new(sender, sender.to_uppercase()),
        }
    }

    #[tokio::test]
    async fn test_route_private() {
        let presence = Arc::new(PresenceRegistry::new());
        let mut rx = online(&presence, "b");
        let router = FanoutRouter::new(Arc::clone(&presence), Arc::new(MemoryStore::new()));

        assert!(router.route_private("b", new_message("a")));
        assert_eq!(rx.recv().await.unwrap(), new_message("a"));

        // Unreachable recipient: no error, no queueing
        assert!(!router.route_private("offline", new_message("a")));
    }

    #[tokio::test]
    async fn test_route_group_excludes_sender() {
        let presence = Arc::new(PresenceRegistry::new());
        let mut rx_a = online(&presence, "a");
        let mut rx_b = online(&presence, "b");

        let store = MemoryStore::new();
        store.insert_group(Group::new(
            "g1",
            "Team",
            vec!["a".into(), "b".into(), "c".into()],
        ));
        let router = FanoutRouter::new(Arc::clone(&presence), Arc::new(store));

        // c is offline: delivered set is exactly the online members minus the sender
        let mut delivered = router
            .route_group("a", "g1", new_message("a"))
            .await
            .unwrap();
        delivered.sort();
        assert_eq!(delivered, vec!["b".to_string()]);

        assert_eq!(rx_b.recv().await.unwrap(), new_message("a"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_group_target_errors() {
        let presence = Arc::new(PresenceRegistry::new());
        let store = MemoryStore::new();
        store.insert_group(Group::new("g1", "Team", vec!["a".into(), "b".into()]));
        let router = FanoutRouter::new(Arc::clone(&presence), Arc::new(store));

        assert!(matches!(
            router.route_group("a", "missing", new_message("a")).await,
            Err(FanoutError::GroupNotFound(_))
        ));
        assert!(matches!(
            router.route_group("outsider", "g1", new_message("outsider")).await,
            Err(FanoutError::NotAMember { .. })
        ));
    }

    #[tokio::test]
    async fn test_route_group_storage_unavailable() {
        let presence = Arc::new(PresenceRegistry::new());
        let router = FanoutRouter::new(presence, Arc::new(UnavailableStore));

        assert!(matches!(
            router.route_group("a", "g1", new_message("a")).await,
            Err(FanoutError::Storage(StorageError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_membership_refetched_each_call() {
        let presence = Arc::new(PresenceRegistry::new());
        let mut rx_b = online(&presence, "b");

        let store = Arc::new(MemoryStore::new());
        store.insert_group(Group::new("g1", "Team", vec!["a".into(), "b".into()]));
        let router = FanoutRouter::new(Arc::clone(&presence), Arc::clone(&store) as Arc<dyn Storage>);

        assert_eq!(
            router.route_group("a", "g1", new_message("a")).await.unwrap(),
            vec!["b".to_string()]
        );
        assert!(rx_b.recv().await.is_some());

        // b removed from the group between sends: next fanout skips them
        store.insert_group(Group::new("g1", "Team", vec!["a".into()]));
        assert!(router
            .route_group("a", "g1", new_message("a"))
            .await
            .unwrap()
            .is_empty());
        assert!(rx_b.try_recv().is_err());
    }
}
