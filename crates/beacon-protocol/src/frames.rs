//! Frame types for the Beacon protocol.
//!
//! Frames are the fundamental unit of communication between a chat client
//! and the server. Each frame is serialized using MessagePack and tagged
//! with its event name, so unknown events fail to decode at the boundary.

use serde::{Deserialize, Serialize};

/// Whether a message targets a single user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Private,
    Group,
}

/// Identity snapshot attached to outbound messages so recipients can render
/// the sender without a profile lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// User identifier.
    pub id: String,
    /// Display name at the time the channel was opened.
    pub display_name: String,
    /// Avatar reference, if the user has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserSummary {
    /// Create a new user summary.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar: None,
        }
    }

    /// Attach an avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// A frame sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Session handshake. Must be the first frame on a channel.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Opaque session ticket. A missing ticket fails authentication.
        #[serde(skip_serializing_if = "Option::is_none")]
        ticket: Option<String>,
    },

    /// Notify the server that a persisted message was sent.
    #[serde(rename = "send_message")]
    SendMessage {
        /// Identifier of the already-persisted message.
        message_id: String,
        /// Private or group chat.
        chat_type: ChatType,
        /// Target user for private chat.
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient_id: Option<String>,
        /// Target group for group chat.
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },

    /// Client-reported delivery acknowledgement (reconnect catch-up).
    #[serde(rename = "message_delivered")]
    MessageDelivered {
        /// The delivered message.
        message_id: String,
        /// Original sender to receive the receipt.
        sender_id: String,
    },

    /// Client-reported read acknowledgement.
    #[serde(rename = "message_read")]
    MessageRead {
        /// The read message.
        message_id: String,
        /// Original sender to receive the receipt.
        sender_id: String,
    },

    /// Typing indicator signal.
    #[serde(rename = "typing")]
    Typing {
        /// The peer being typed to.
        recipient_id: String,
        /// `true` to start (or refresh) typing, `false` to stop.
        is_typing: bool,
    },

    /// Join a named room.
    #[serde(rename = "join_room")]
    JoinRoom {
        /// Room identifier.
        room_id: String,
    },

    /// Leave a named room.
    #[serde(rename = "leave_room")]
    LeaveRoom {
        /// Room identifier.
        room_id: String,
    },

    /// Availability change, broadcast to all other users.
    #[serde(rename = "update_availability")]
    UpdateAvailability {
        /// Whether the user is available.
        is_available: bool,
        /// Free-form reason ("lunch", "meeting", ...).
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Duration in minutes, if bounded.
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<u32>,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

/// A frame pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Handshake accepted; channel is registered.
    #[serde(rename = "connected")]
    Connected {
        /// Unique channel identifier.
        channel_id: u64,
        /// Authenticated user.
        user_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A private message arrived.
    #[serde(rename = "new_message")]
    NewMessage {
        /// Identifier of the persisted message.
        message_id: String,
        /// Who sent it.
        sender: UserSummary,
    },

    /// A group message arrived.
    #[serde(rename = "new_group_message")]
    NewGroupMessage {
        /// Identifier of the persisted message.
        message_id: String,
        /// The group it was sent to.
        group_id: String,
        /// Who sent it.
        sender: UserSummary,
    },

    /// Delivery receipt for a private message.
    #[serde(rename = "message_delivered")]
    MessageDelivered {
        /// The delivered message.
        message_id: String,
        /// Who received it.
        recipient_id: String,
    },

    /// Batched delivery confirmation for a group message.
    #[serde(rename = "group_message_delivered")]
    GroupMessageDelivered {
        /// The delivered message.
        message_id: String,
        /// The group it was fanned out to.
        group_id: String,
        /// Members that were online at fanout time.
        delivered_to: Vec<String>,
    },

    /// Read receipt.
    #[serde(rename = "message_read")]
    MessageRead {
        /// The read message.
        message_id: String,
        /// Who read it.
        reader_id: String,
    },

    /// Typing indicator state for a peer.
    #[serde(rename = "typing_status")]
    TypingStatus {
        /// The user who is (or stopped) typing.
        user_id: String,
        /// Current typing state.
        is_typing: bool,
    },

    /// Online/offline transition for a user.
    #[serde(rename = "user_online")]
    UserOnline {
        /// The user whose presence changed.
        user_id: String,
        /// `true` on connect, `false` on disconnect.
        is_online: bool,
    },

    /// Availability broadcast.
    #[serde(rename = "user_availability_update")]
    UserAvailabilityUpdate {
        /// The user whose availability changed.
        user_id: String,
        /// Whether the user is available.
        is_available: bool,
        /// Free-form reason.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Duration in minutes, if bounded.
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<u32>,
    },

    /// Something went wrong handling the client's last event.
    #[serde(rename = "error")]
    Error {
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientFrame {
    /// Get the frame's event name, as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientFrame::Connect { .. } => "connect",
            ClientFrame::SendMessage { .. } => "send_message",
            ClientFrame::MessageDelivered { .. } => "message_delivered",
            ClientFrame::MessageRead { .. } => "message_read",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::JoinRoom { .. } => "join_room",
            ClientFrame::LeaveRoom { .. } => "leave_room",
            ClientFrame::UpdateAvailability { .. } => "update_availability",
            ClientFrame::Ping { .. } => "ping",
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, ticket: Option<String>) -> Self {
        ClientFrame::Connect { version, ticket }
    }

    /// Create a private SendMessage frame.
    #[must_use]
    pub fn send_private(message_id: impl Into<String>, recipient_id: impl Into<String>) -> Self {
        ClientFrame::SendMessage {
            message_id: message_id.into(),
            chat_type: ChatType::Private,
            recipient_id: Some(recipient_id.into()),
            group_id: None,
        }
    }

    /// Create a group SendMessage frame.
    #[must_use]
    pub fn send_group(message_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        ClientFrame::SendMessage {
            message_id: message_id.into(),
            chat_type: ChatType::Group,
            recipient_id: None,
            group_id: Some(group_id.into()),
        }
    }

    /// Create a Typing frame.
    #[must_use]
    pub fn typing(recipient_id: impl Into<String>, is_typing: bool) -> Self {
        ClientFrame::Typing {
            recipient_id: recipient_id.into(),
            is_typing,
        }
    }

    /// Create a Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        ClientFrame::Ping { timestamp: None }
    }
}

impl ServerFrame {
    /// Get the frame's event name, as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerFrame::Connected { .. } => "connected",
            ServerFrame::NewMessage { .. } => "new_message",
            ServerFrame::NewGroupMessage { .. } => "new_group_message",
            ServerFrame::MessageDelivered { .. } => "message_delivered",
            ServerFrame::GroupMessageDelivered { .. } => "group_message_delivered",
            ServerFrame::MessageRead { .. } => "message_read",
            ServerFrame::TypingStatus { .. } => "typing_status",
            ServerFrame::UserOnline { .. } => "user_online",
            ServerFrame::UserAvailabilityUpdate { .. } => "user_availability_update",
            ServerFrame::Error { .. } => "error",
            ServerFrame::Pong { .. } => "pong",
        }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(channel_id: u64, user_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        ServerFrame::Connected {
            channel_id,
            user_id: user_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a TypingStatus frame.
    #[must_use]
    pub fn typing_status(user_id: impl Into<String>, is_typing: bool) -> Self {
        ServerFrame::TypingStatus {
            user_id: user_id.into(),
            is_typing,
        }
    }

    /// Create a UserOnline frame.
    #[must_use]
    pub fn user_online(user_id: impl Into<String>, is_online: bool) -> Self {
        ServerFrame::UserOnline {
            user_id: user_id.into(),
            is_online,
        }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_names() {
        assert_eq!(ClientFrame::typing("u2", true).name(), "typing");
        assert_eq!(
            ClientFrame::send_private("m1", "u2").name(),
            "send_message"
        );
        assert_eq!(
            ServerFrame::typing_status("u1", false).name(),
            "typing_status"
        );
        assert_eq!(ServerFrame::error("boom").name(), "error");
    }

    #[test]
    fn test_send_message_targets() {
        let private = ClientFrame::send_private("m1", "u2");
        match private {
            ClientFrame::SendMessage {
                chat_type,
                recipient_id,
                group_id,
                ..
            } => {
                assert_eq!(chat_type, ChatType::Private);
                assert_eq!(recipient_id.as_deref(), Some("u2"));
                assert!(group_id.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let group = ClientFrame::send_group("m2", "g1");
        match group {
            ClientFrame::SendMessage {
                chat_type, group_id, ..
            } => {
                assert_eq!(chat_type, ChatType::Group);
                assert_eq!(group_id.as_deref(), Some("g1"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_user_summary() {
        let summary = UserSummary::new("u1", "Alice").with_avatar("https://cdn/a.png");
        assert_eq!(summary.id, "u1");
        assert_eq!(summary.avatar.as_deref(), Some("https://cdn/a.png"));
    }
}
