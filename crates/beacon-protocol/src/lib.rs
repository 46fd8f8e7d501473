//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon realtime chat engine.
//!
//! This crate defines the frames exchanged between chat clients and the
//! server, the MessagePack codec with length-prefixed framing, and the
//! protocol version.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - Session handshake
//! - `SendMessage` - Private and group chat messages
//! - `MessageDelivered` / `MessageRead` - Receipt acknowledgements
//! - `Typing` / `TypingStatus` - Typing indicators
//! - `UserOnline` / `UserAvailabilityUpdate` - Presence transitions
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, ClientFrame};
//!
//! let frame = ClientFrame::typing("user-42", true);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded: ClientFrame = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ChatType, ClientFrame, ServerFrame, UserSummary};
pub use version::{Version, PROTOCOL_VERSION};
