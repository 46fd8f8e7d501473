//! Typing indicators for Beacon.
//!
//! One entry per (sender, recipient) pair, each owning a cancellable expiry
//! timer. A fresh "is typing" signal restarts the timer instead of stacking
//! a second one, so a stuck indicator is bounded by the expiry window
//! without the client having to stream keep-alives.

use crate::channel::UserId;
use crate::presence::PresenceRegistry;
use beacon_protocol::ServerFrame;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default typing-indicator expiry.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Key for one typing indicator: (sender, recipient).
type TypingKey = (UserId, UserId);

#[derive(Debug)]
struct TypingEntry {
    /// Identifies which arm of the timer owns this entry; an expired timer
    /// whose generation no longer matches must not clear a newer entry.
    generation: u64,
    timer: JoinHandle<()>,
}

/// Tracks who is typing to whom, with automatic expiry.
#[derive(Debug)]
pub struct TypingTracker {
    entries: DashMap<TypingKey, TypingEntry>,
    presence: Arc<PresenceRegistry>,
    expiry: Duration,
    generation: AtomicU64,
}

impl TypingTracker {
    /// Create a tracker with the default expiry.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self::with_expiry(presence, DEFAULT_TYPING_EXPIRY)
    }

    /// Create a tracker with a specific expiry window.
    #[must_use]
    pub fn with_expiry(presence: Arc<PresenceRegistry>, expiry: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            presence,
            expiry,
            generation: AtomicU64::new(0),
        }
    }

    /// Record that `sender_id` started (or kept) typing to `recipient_id`.
    ///
    /// Pushes `typing_status { true }` to the recipient if they are
    /// reachable (never queued otherwise), cancels any prior timer for the
    /// pair, and arms a fresh expiry timer. The cancellation happens before
    /// the replacement timer is armed, so at most one timer is ever live
    /// per pair.
    pub fn start_typing(self: &Arc<Self>, sender_id: &str, recipient_id: &str) {
        if let Some(channel) = self.presence.get(recipient_id) {
            channel.push(ServerFrame::typing_status(sender_id, true));
        }

        let key: TypingKey = (sender_id.to_string(), recipient_id.to_string());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get().timer.abort();
                let timer = self.arm_expiry(key, generation);
                *occupied.get_mut() = TypingEntry { generation, timer };
            }
            Entry::Vacant(vacant) => {
                let timer = self.arm_expiry(key, generation);
                vacant.insert(TypingEntry { generation, timer });
            }
        }

        debug!(sender = %sender_id, recipient = %recipient_id, "Typing started");
    }

    /// Record that `sender_id` stopped typing to `recipient_id`.
    ///
    /// Cancels the timer, deletes the entry, and pushes
    /// `typing_status { false }` to the recipient if an entry existed.
    pub fn stop_typing(&self, sender_id: &str, recipient_id: &str) {
        let key: TypingKey = (sender_id.to_string(), recipient_id.to_string());
        if let Some((_, entry)) = self.entries.remove(&key) {
            entry.timer.abort();
            if let Some(channel) = self.presence.get(recipient_id) {
                channel.push(ServerFrame::typing_status(sender_id, false));
            }
            debug!(sender = %sender_id, recipient = %recipient_id, "Typing stopped");
        }
    }

    /// Clear every typing indicator owned by a disconnecting sender.
    ///
    /// Each affected recipient gets a `typing_status { false }` push.
    pub fn clear_for_sender(&self, sender_id: &str) {
        let keys: Vec<TypingKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == sender_id)
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.timer.abort();
                if let Some(channel) = self.presence.get(&key.1) {
                    channel.push(ServerFrame::typing_status(sender_id, false));
                }
            }
        }

        debug!(sender = %sender_id, "Typing cleared for disconnecting sender");
    }

    /// Check whether a sender is currently typing to a recipient.
    #[must_use]
    pub fn is_typing(&self, sender_id: &str, recipient_id: &str) -> bool {
        self.entries
            .contains_key(&(sender_id.to_string(), recipient_id.to_string()))
    }

    /// Get the number of live typing indicators.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries.len()
    }

    /// Arm the expiry timer for one entry.
    ///
    /// On fire, the timer removes the entry only if its generation is still
    /// current, then pushes the stop to the recipient. A timer superseded by
    /// a later `start_typing` either gets aborted or finds its generation
    /// stale and does nothing.
    fn arm_expiry(self: &Arc<Self>, key: TypingKey, generation: u64) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(tracker.expiry).await;
            let expired = tracker
                .entries
                .remove_if(&key, |_, entry| entry.generation == generation)
                .is_some();
            if expired {
                if let Some(channel) = tracker.presence.get(&key.1) {
                    channel.push(ServerFrame::typing_status(&key.0, false));
                }
                debug!(sender = %key.0, recipient = %key.1, "Typing expired");
            }
        })
    }
}
