//! Presence tracking for Beacon.
//!
//! The presence registry is the single source of truth for "is this user
//! reachable right now": a map from user identity to their currently open
//! channel. A user has at most one authoritative channel at any instant.

use crate::channel::{Channel, ChannelId, UserId};
use beacon_protocol::ServerFrame;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Process-wide map from user identity to their open channel.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<UserId, Arc<Channel>>,
}

impl PresenceRegistry {
    /// Create a new presence registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel as its user's authoritative channel.
    ///
    /// A reconnect replaces the prior entry atomically; the superseded
    /// channel, if any, is returned so the caller can discard it. Its own
    /// disconnect handler will later find the registry pointing elsewhere
    /// and leave the new entry alone (see [`deregister`](Self::deregister)).
    pub fn register(&self, channel: Arc<Channel>) -> Option<Arc<Channel>> {
        let user_id = channel.user_id().to_string();
        let replaced = self.entries.insert(user_id.clone(), channel);
        if replaced.is_some() {
            debug!(user = %user_id, "Presence: reconnect replaced prior channel");
        } else {
            debug!(user = %user_id, "Presence: user online");
        }
        replaced
    }

    /// Remove a user's entry, but only if it still belongs to the
    /// disconnecting channel.
    ///
    /// Keyed by channel identity so a superseded channel's late disconnect
    /// cannot evict a newer registration for the same user. Returns whether
    /// the entry was actually removed.
    pub fn deregister(&self, user_id: &str, channel_id: ChannelId) -> bool {
        let removed = self
            .entries
            .remove_if(user_id, |_, current| current.id() == channel_id)
            .is_some();
        if removed {
            debug!(user = %user_id, channel = channel_id, "Presence: user offline");
        } else {
            debug!(user = %user_id, channel = channel_id, "Presence: stale disconnect ignored");
        }
        removed
    }

    /// Check whether a user has a live channel.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    /// Get a user's current channel, if they are online.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<Arc<Channel>> {
        self.entries.get(user_id).map(|entry| Arc::clone(&entry))
    }

    /// Get all online user identities.
    #[must_use]
    pub fn list_online(&self) -> Vec<UserId> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get the number of online users.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.entries.len()
    }

    /// Push a frame to every online channel except the given one.
    ///
    /// Used for online/offline and availability transitions. Returns the
    /// number of channels pushed to.
    pub fn broadcast_except(&self, except: ChannelId, frame: &ServerFrame) -> usize {
        let mut pushed = 0;
        for entry in self.entries.iter() {
            if entry.id() != except && entry.push(frame.clone()) {
                pushed += 1;
            }
        }
        pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::{ServerFrame, UserSummary};

    fn open(user_id: &str) -> (Arc<Channel>, tokio::sync::mpsc::UnboundedReceiver<ServerFrame>) {
        Channel::open(UserSummary::new(user_id, user_id.to_uppercase()))
    }

    #[test]
    fn test_register_deregister() {
        let presence = PresenceRegistry::new();
        let (channel, _rx) = open("u1");

        assert!(presence.register(Arc::clone(&channel)).is_none());
        assert!(presence.is_online("u1"));
        assert_eq!(presence.online_count(), 1);

        assert!(presence.deregister("u1", channel.id()));
        assert!(!presence.is_online("u1"));

        // Deregistering an absent user is a no-op
        assert!(!presence.deregister("u1", channel.id()));
    }

    #[test]
    fn test_reconnect_replaces_entry() {
        let presence = PresenceRegistry::new();
        let (old, _rx_old) = open("u1");
        let (new, _rx_new) = open("u1");

        assert!(presence.register(Arc::clone(&old)).is_none());
        let replaced = presence.register(Arc::clone(&new)).unwrap();
        assert_eq!(replaced.id(), old.id());

        // Still exactly one entry, and it is the new channel
        assert_eq!(presence.online_count(), 1);
        assert_eq!(presence.get("u1").unwrap().id(), new.id());
    }

    #[test]
    fn test_stale_disconnect_does_not_evict_new_channel() {
        let presence = PresenceRegistry::new();
        let (old, _rx_old) = open("u1");
        let (new, _rx_new) = open("u1");

        presence.register(Arc::clone(&old));
        presence.register(Arc::clone(&new));

        // The superseded channel's disconnect fires late and loses
        assert!(!presence.deregister("u1", old.id()));
        assert!(presence.is_online("u1"));

        // The current channel's disconnect wins
        assert!(presence.deregister("u1", new.id()));
        assert!(!presence.is_online("u1"));
    }

    #[test]
    fn test_list_online() {
        let presence = PresenceRegistry::new();
        let (a, _rx_a) = open("u1");
        let (b, _rx_b) = open("u2");

        presence.register(a);
        presence.register(b);

        let mut online = presence.list_online();
        online.sort();
        assert_eq!(online, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_except() {
        let presence = PresenceRegistry::new();
        let (a, mut rx_a) = open("u1");
        let (b, mut rx_b) = open("u2");

        presence.register(Arc::clone(&a));
        presence.register(b);

        let pushed = presence.broadcast_except(a.id(), &ServerFrame::user_online("u1", true));
        assert_eq!(pushed, 1);

        assert_eq!(
            rx_b.recv().await.unwrap(),
            ServerFrame::user_online("u1", true)
        );
        assert!(rx_a.try_recv().is_err());
    }
}
