//! Channel handle for Beacon.
//!
//! A channel is one open bidirectional push connection. The connection task
//! owns the receiving half; the registries hold `Arc` references to the
//! handle and push outbound frames through it.

use beacon_protocol::{ServerFrame, UserSummary};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::trace;

/// A user identifier.
pub type UserId = String;

/// A unique channel identifier.
pub type ChannelId = u64;

/// Atomic counter so every channel in the process gets a distinct identity.
static CHANNEL_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Handle for one open push connection.
///
/// The identity snapshot is captured once at open time; profile edits made
/// while the channel is open are not reflected until the next connect.
#[derive(Debug)]
pub struct Channel {
    /// Process-unique channel identity.
    id: ChannelId,
    /// Owning user, with display name and avatar captured at open.
    user: UserSummary,
    /// When the channel was opened, milliseconds since the epoch.
    opened_at: u64,
    /// Outbound push queue drained by the connection task.
    outbound: mpsc::UnboundedSender<ServerFrame>,
}

impl Channel {
    /// Open a new channel for a user.
    ///
    /// Returns the shared handle and the receiving half the connection task
    /// drains into the transport.
    #[must_use]
    pub fn open(user: UserSummary) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerFrame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            id: CHANNEL_COUNTER.fetch_add(1, Ordering::Relaxed),
            user,
            opened_at: now_millis(),
            outbound,
        });
        (channel, rx)
    }

    /// Get the channel identity.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Get the owning user's identifier.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Get the owning user's identity snapshot.
    #[must_use]
    pub fn user(&self) -> &UserSummary {
        &self.user
    }

    /// Get the open timestamp, milliseconds since the epoch.
    #[must_use]
    pub fn opened_at(&self) -> u64 {
        self.opened_at
    }

    /// Push a frame to this channel.
    ///
    /// Non-blocking. Returns `false` if the connection task has gone away;
    /// that is a disconnect in flight, not an error the caller handles.
    pub fn push(&self, frame: ServerFrame) -> bool {
        let sent = self.outbound.send(frame).is_ok();
        if !sent {
            trace!(channel = self.id, user = %self.user.id, "Push to closing channel dropped");
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::ServerFrame;

    #[test]
    fn test_channel_identity() {
        let (a, _rx_a) = Channel::open(UserSummary::new("u1", "Alice"));
        let (b, _rx_b) = Channel::open(UserSummary::new("u1", "Alice"));

        // Same user, distinct channel identities
        assert_ne!(a.id(), b.id());
        assert_eq!(a.user_id(), "u1");
        assert_eq!(a.user().display_name, "Alice");
    }

    #[tokio::test]
    async fn test_channel_push() {
        let (channel, mut rx) = Channel::open(UserSummary::new("u1", "Alice"));

        assert!(channel.push(ServerFrame::user_online("u2", true)));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, ServerFrame::user_online("u2", true));
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (channel, rx) = Channel::open(UserSummary::new("u1", "Alice"));
        drop(rx);

        assert!(!channel.push(ServerFrame::user_online("u2", true)));
    }
}
