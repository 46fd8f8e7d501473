//! Delivery and read receipts for Beacon.
//!
//! On deliverable events the tracker flips the message's persisted flags
//! through the storage seam and pushes the acknowledgement back to the
//! sender. The chat UX prioritizes liveness over strict consistency with
//! the persisted flag: a storage failure is logged and surfaced as a
//! degraded result, but the transient receipt still goes out.

use crate::channel::Channel;
use crate::presence::PresenceRegistry;
use crate::storage::{Storage, StorageError};
use crate::typing::TypingTracker;
use beacon_protocol::ServerFrame;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tracks delivery/read acknowledgements for persisted messages.
pub struct DeliveryTracker {
    presence: Arc<PresenceRegistry>,
    typing: Arc<TypingTracker>,
    storage: Arc<dyn Storage>,
}

impl DeliveryTracker {
    /// Create a tracker over the given registries and storage seam.
    #[must_use]
    pub fn new(
        presence: Arc<PresenceRegistry>,
        typing: Arc<TypingTracker>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            presence,
            typing,
            storage,
        }
    }

    /// Handle a private message at send time.
    ///
    /// Sending a message implicitly stops the sender's typing indicator
    /// toward the recipient. If the recipient is online at send time, the
    /// message is marked delivered in storage and a `message_delivered`
    /// receipt is pushed to the sender right away; if they are offline,
    /// delivery stays pending until the recipient's client acks on
    /// reconnect (no retry loop runs here).
    ///
    /// Returns whether the message was auto-delivered.
    ///
    /// # Errors
    ///
    /// A storage failure is returned after the receipt has already been
    /// pushed; the operation is degraded, not rolled back.
    pub async fn on_message_sent(
        &self,
        sender: &Channel,
        message_id: &str,
        recipient_id: &str,
    ) -> Result<bool, StorageError> {
        self.typing.stop_typing(sender.user_id(), recipient_id);

        if !self.presence.is_online(recipient_id) {
            debug!(message = %message_id, recipient = %recipient_id, "Delivery pending: recipient offline");
            return Ok(false);
        }

        let stored = self.storage.mark_message_delivered(message_id).await;
        if let Err(err) = &stored {
            warn!(message = %message_id, error = %err, "Failed to persist delivery flag");
        }

        sender.push(ServerFrame::MessageDelivered {
            message_id: message_id.to_string(),
            recipient_id: recipient_id.to_string(),
        });
        debug!(message = %message_id, recipient = %recipient_id, "Auto-delivered to online recipient");

        stored.map(|()| true)
    }

    /// Handle a client-reported delivery acknowledgement.
    ///
    /// Fired by a recipient's client on reconnect/catch-up for messages
    /// that were pending while they were offline. Marks the message
    /// delivered and pushes the receipt to the original sender if they are
    /// reachable.
    ///
    /// # Errors
    ///
    /// A storage failure is returned after the receipt has already been
    /// pushed.
    pub async fn on_delivery_ack(
        &self,
        message_id: &str,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<(), StorageError> {
        let stored = self.storage.mark_message_delivered(message_id).await;
        if let Err(err) = &stored {
            warn!(message = %message_id, error = %err, "Failed to persist delivery flag");
        }

        if let Some(channel) = self.presence.get(sender_id) {
            channel.push(ServerFrame::MessageDelivered {
                message_id: message_id.to_string(),
                recipient_id: recipient_id.to_string(),
            });
        }
        debug!(message = %message_id, sender = %sender_id, "Delivery ack processed");

        stored
    }

    /// Handle a read acknowledgement.
    ///
    /// Pushes a `message_read` receipt to the original sender if they are
    /// reachable. The persisted read flag is owned by the REST layer; this
    /// path only fans the receipt. Returns whether the sender was
    /// reachable.
    pub fn on_message_read(&self, message_id: &str, sender_id: &str, reader_id: &str) -> bool {
        match self.presence.get(sender_id) {
            Some(channel) => {
                channel.push(ServerFrame::MessageRead {
                    message_id: message_id.to_string(),
                    reader_id: reader_id.to_string(),
                });
                debug!(message = %message_id, sender = %sender_id, "Read receipt pushed");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    struct Fixture {
        presence: Arc<PresenceRegistry>,
        typing: Arc<TypingTracker>,
        store: Arc<MemoryStore>,
        tracker: DeliveryTracker,
    }

    fn fixture() -> Fixture {
        let presence = Arc::new(PresenceRegistry::new());
        let typing = Arc::new(TypingTracker::new(Arc::clone(&presence)));
        let store = Arc::new(MemoryStore::new());
        let tracker = DeliveryTracker::new(
            Arc::clone(&presence),
            Arc::clone(&typing),
            Arc::clone(&store) as Arc<dyn Storage>,
        );
        Fixture {
            presence,
            typing,
            store,
            tracker,
        }
    }

    fn online(
        presence: &PresenceRegistry,
        user_id: &str,
    ) -> (Arc<Channel>, UnboundedReceiver<ServerFrame>) {
        let (channel, rx) = Channel::open(UserSummary::new(user_id, user_id.to_uppercase()));
        presence.register(Arc::clone(&channel));
        (channel, rx)
    }

    #[tokio::test]
    async fn test_online_recipient_auto_delivery() {
        let f = fixture();
        let (a, mut rx_a) = online(&f.presence, "a");
        let (_b, mut rx_b) = online(&f.presence, "b");

        f.typing.start_typing("a", "b");
        let _ = rx_b.recv().await;

        let delivered = f.tracker.on_message_sent(&a, "m1", "b").await.unwrap();
        assert!(delivered);

        // Receipt to the sender, delivered flag persisted, typing stopped
        assert_eq!(
            rx_a.recv().await.unwrap(),
            ServerFrame::MessageDelivered {
                message_id: "m1".to_string(),
                recipient_id: "b".to_string(),
            }
        );
        assert!(f.store.delivery_state("m1").unwrap().is_delivered);
        assert!(!f.typing.is_typing("a", "b"));
        assert_eq!(
            rx_b.recv().await.unwrap(),
            ServerFrame::typing_status("a", false)
        );
    }

    #[tokio::test]
    async fn test_offline_recipient_stays_pending_until_ack() {
        let f = fixture();
        let (a, mut rx_a) = online(&f.presence, "a");

        // B offline: nothing delivered, nothing pushed
        let delivered = f.tracker.on_message_sent(&a, "m1", "b").await.unwrap();
        assert!(!delivered);
        assert!(rx_a.try_recv().is_err());
        assert!(f.store.delivery_state("m1").is_none());

        // B reconnects and their client acks the pending message
        let (_b, _rx_b) = online(&f.presence, "b");
        f.tracker.on_delivery_ack("m1", "a", "b").await.unwrap();

        assert_eq!(
            rx_a.recv().await.unwrap(),
            ServerFrame::MessageDelivered {
                message_id: "m1".to_string(),
                recipient_id: "b".to_string(),
            }
        );
        assert!(f.store.delivery_state("m1").unwrap().is_delivered);
    }

    #[tokio::test]
    async fn test_storage_failure_degrades_but_receipt_still_sent() {
        let presence = Arc::new(PresenceRegistry::new());
        let typing = Arc::new(TypingTracker::new(Arc::clone(&presence)));
        let tracker = DeliveryTracker::new(
            Arc::clone(&presence),
            typing,
            Arc::new(UnavailableStore),
        );

        let (a, mut rx_a) = online(&presence, "a");
        let (_b, _rx_b) = online(&presence, "b");

        let result = tracker.on_message_sent(&a, "m1", "b").await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));

        // Liveness beats consistency: the receipt went out anyway
        assert!(matches!(
            rx_a.recv().await.unwrap(),
            ServerFrame::MessageDelivered { .. }
        ));
    }

    #[tokio::test]
    async fn test_read_receipt() {
        let f = fixture();
        let (_a, mut rx_a) = online(&f.presence, "a");

        assert!(f.tracker.on_message_read("m1", "a", "b"));
        assert_eq!(
            rx_a.recv().await.unwrap(),
            ServerFrame::MessageRead {
                message_id: "m1".to_string(),
                reader_id: "b".to_string(),
            }
        );

        // Sender offline: receipt silently dropped
        assert!(!f.tracker.on_message_read("m2", "offline", "b"));
    }
}
