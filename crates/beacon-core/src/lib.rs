//! # beacon-core
//!
//! Presence tracking and message fanout for the Beacon realtime chat engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Channel** - Handle for one open push connection
//! - **PresenceRegistry** - Which users are reachable right now
//! - **RoomRegistry** - Named room membership
//! - **TypingTracker** - Auto-expiring typing indicators
//! - **FanoutRouter** - Private and group event routing
//! - **DeliveryTracker** - Delivery/read receipts against the storage seam
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   Channel   │────▶│ FanoutRouter │────▶│  Presence   │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                            │                    ▲
//!                            ▼                    │
//!                     ┌──────────────┐     ┌─────────────┐
//!                     │   Storage    │     │   Typing    │
//!                     └──────────────┘     └─────────────┘
//! ```
//!
//! Storage and session authentication are collaborator traits injected at
//! construction; the engine never reaches into concrete persistence types
//! while handling events.

pub mod auth;
pub mod channel;
pub mod delivery;
pub mod presence;
pub mod rooms;
pub mod router;
pub mod storage;
pub mod typing;

pub use auth::{AuthError, SessionAuth, TicketRegistry};
pub use channel::{Channel, ChannelId, UserId};
pub use delivery::DeliveryTracker;
pub use presence::PresenceRegistry;
pub use rooms::{RoomId, RoomRegistry};
pub use router::{FanoutRouter, FanoutError};
pub use storage::{Group, MemoryStore, Storage, StorageError};
pub use typing::TypingTracker;
