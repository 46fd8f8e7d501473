//! Room membership for Beacon.
//!
//! Rooms are named groupings of users. Every registered user is joined to
//! their private room (`user:{id}`); clients may join further rooms with
//! `join_room`/`leave_room`. Rooms carry membership only; delivery always
//! resolves each member through the presence registry at push time, so
//! membership changes and delivery stay consistent.

use crate::channel::UserId;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// A room identifier.
pub type RoomId = String;

/// Room registry errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// Maximum rooms per user reached.
    #[error("Maximum rooms per user reached")]
    MaxRoomsReached,
}

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.starts_with('$') {
        return Err("Room names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// The private inbound room every user joins at registration.
#[must_use]
pub fn private_room(user_id: &str) -> RoomId {
    format!("user:{user_id}")
}

/// Named room membership, with a reverse index for disconnect cleanup.
#[derive(Debug)]
pub struct RoomRegistry {
    /// Members indexed by room.
    rooms: DashMap<RoomId, HashSet<UserId>>,
    /// Rooms indexed by user.
    memberships: DashMap<UserId, DashSet<RoomId>>,
    /// Maximum rooms a single user may join.
    max_rooms_per_user: usize,
}

impl RoomRegistry {
    /// Create a room registry with the default per-user limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(100)
    }

    /// Create a room registry with a specific per-user room limit.
    #[must_use]
    pub fn with_limit(max_rooms_per_user: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            max_rooms_per_user,
        }
    }

    /// Join a user to a room, creating it if needed.
    ///
    /// Returns `true` if the user was newly joined.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid or the user is at
    /// their room limit.
    pub fn join(&self, user_id: &str, room_id: &str) -> Result<bool, RoomError> {
        validate_room_name(room_id).map_err(RoomError::InvalidRoom)?;

        let user_rooms = self.memberships.entry(user_id.to_string()).or_default();
        if user_rooms.contains(room_id) {
            return Ok(false);
        }
        if user_rooms.len() >= self.max_rooms_per_user {
            return Err(RoomError::MaxRoomsReached);
        }

        let mut members = self.rooms.entry(room_id.to_string()).or_default();
        members.insert(user_id.to_string());
        user_rooms.insert(room_id.to_string());

        debug!(room = %room_id, user = %user_id, members = members.len(), "Joined room");
        Ok(true)
    }

    /// Remove a user from a room.
    ///
    /// Empty rooms are deleted. Returns `true` if the user was a member.
    pub fn leave(&self, user_id: &str, room_id: &str) -> bool {
        let was_member = match self.memberships.get(user_id) {
            Some(user_rooms) => user_rooms.remove(room_id).is_some(),
            None => false,
        };
        if !was_member {
            return false;
        }

        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(user_id);
            debug!(room = %room_id, user = %user_id, members = members.len(), "Left room");
            if members.is_empty() {
                drop(members); // Release the lock
                self.rooms.remove_if(room_id, |_, m| m.is_empty());
            }
        }

        true
    }

    /// Remove a user from every room they joined.
    ///
    /// Returns the rooms they were removed from.
    pub fn leave_all(&self, user_id: &str) -> Vec<RoomId> {
        let Some((_, user_rooms)) = self.memberships.remove(user_id) else {
            return Vec::new();
        };

        let mut left = Vec::new();
        for room_id in user_rooms.iter() {
            if let Some(mut members) = self.rooms.get_mut(room_id.as_str()) {
                members.remove(user_id);
                if members.is_empty() {
                    let name = room_id.clone();
                    drop(members);
                    self.rooms.remove_if(&name, |_, m| m.is_empty());
                }
            }
            left.push(room_id.clone());
        }

        debug!(user = %user_id, rooms = left.len(), "Left all rooms");
        left
    }

    /// Get the members of a room.
    #[must_use]
    pub fn members(&self, room_id: &str) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Get the number of active rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Get the rooms a user has joined.
    #[must_use]
    pub fn rooms_of(&self, user_id: &str) -> Vec<RoomId> {
        self.memberships
            .get(user_id)
            .map(|rooms| rooms.iter().map(|r| r.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_leave() {
        let rooms = RoomRegistry::new();

        assert!(rooms.join("u1", "lobby").unwrap());
        assert!(!rooms.join("u1", "lobby").unwrap()); // Already a member
        assert!(rooms.room_exists("lobby"));
        assert_eq!(rooms.members("lobby"), vec!["u1".to_string()]);

        assert!(rooms.leave("u1", "lobby"));
        // Empty rooms are deleted
        assert!(!rooms.room_exists("lobby"));

        assert!(!rooms.leave("u1", "lobby"));
    }

    #[test]
    fn test_room_name_validation() {
        let rooms = RoomRegistry::new();

        assert!(matches!(
            rooms.join("u1", ""),
            Err(RoomError::InvalidRoom(_))
        ));
        assert!(matches!(
            rooms.join("u1", "$system"),
            Err(RoomError::InvalidRoom(_))
        ));

        let long_name = "a".repeat(MAX_ROOM_NAME_LENGTH + 1);
        assert!(validate_room_name(&long_name).is_err());
        assert!(validate_room_name("user:u1").is_ok());
    }

    #[test]
    fn test_room_limit() {
        let rooms = RoomRegistry::with_limit(2);

        rooms.join("u1", "a").unwrap();
        rooms.join("u1", "b").unwrap();
        assert!(matches!(
            rooms.join("u1", "c"),
            Err(RoomError::MaxRoomsReached)
        ));

        // Rejoining an existing room is not limited
        assert!(!rooms.join("u1", "a").unwrap());
    }

    #[test]
    fn test_leave_all() {
        let rooms = RoomRegistry::new();

        rooms.join("u1", private_room("u1").as_str()).unwrap();
        rooms.join("u1", "lobby").unwrap();
        rooms.join("u2", "lobby").unwrap();

        let mut left = rooms.leave_all("u1");
        left.sort();
        assert_eq!(left, vec!["lobby".to_string(), "user:u1".to_string()]);

        // The shared room survives with its other member
        assert_eq!(rooms.members("lobby"), vec!["u2".to_string()]);
        assert!(!rooms.room_exists("user:u1"));
        assert!(rooms.rooms_of("u1").is_empty());
    }
}
