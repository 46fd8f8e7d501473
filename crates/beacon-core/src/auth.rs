//! Session authentication for Beacon.
//!
//! A channel-open handshake carries an opaque session ticket. The
//! authenticator resolves it to a user identity exactly once, before any
//! registry mutation; a bad ticket refuses the channel outright.

use async_trait::async_trait;
use beacon_protocol::UserSummary;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

/// Authentication errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The ticket is missing, malformed, expired, or unknown.
    #[error("Authentication error")]
    Unauthenticated,
}

/// Resolves a session ticket to a user identity.
#[async_trait]
pub trait SessionAuth: Send + Sync {
    /// Validate a ticket and resolve the owning user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] when the ticket does not
    /// resolve to a live session.
    async fn authenticate(&self, ticket: &str) -> Result<UserSummary, AuthError>;
}

static TICKET_COUNTER: AtomicU64 = AtomicU64::new(0);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[derive(Debug, Clone)]
struct Ticket {
    user: UserSummary,
    expires_at: u64,
}

/// In-memory ticket table, used by the server's default wiring and tests.
///
/// The surrounding login flow issues a ticket per session; the ticket is a
/// bearer credential presented once at channel open.
#[derive(Debug, Default)]
pub struct TicketRegistry {
    tickets: DashMap<String, Ticket>,
}

impl TicketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket for a user, valid for `ttl`.
    pub fn issue(&self, user: UserSummary, ttl: Duration) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let counter = TICKET_COUNTER.fetch_add(1, Ordering::Relaxed);
        let ticket = format!("tkt_{nanos:x}_{counter:x}");

        self.tickets.insert(
            ticket.clone(),
            Ticket {
                user,
                expires_at: now_millis() + ttl.as_millis() as u64,
            },
        );
        ticket
    }

    /// Invalidate a ticket (logout).
    pub fn revoke(&self, ticket: &str) {
        self.tickets.remove(ticket);
    }
}

#[async_trait]
impl SessionAuth for TicketRegistry {
    async fn authenticate(&self, ticket: &str) -> Result<UserSummary, AuthError> {
        if ticket.is_empty() {
            return Err(AuthError::Unauthenticated);
        }

        // Expired tickets are dropped on the spot
        let expired = self
            .tickets
            .remove_if(ticket, |_, entry| entry.expires_at <= now_millis())
            .is_some();
        if expired {
            debug!("Rejected expired session ticket");
            return Err(AuthError::Unauthenticated);
        }

        self.tickets
            .get(ticket)
            .map(|entry| entry.user.clone())
            .ok_or(AuthError::Unauthenticated)
    }
}
