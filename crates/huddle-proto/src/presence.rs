//! Presence state.
//!
//! Presence is soft state shared through a broadcast channel: each peer
//! announces its own [`PresenceState`] on a [`PresenceScope`] and receives the
//! merged snapshot of every peer on that scope.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{RoomId, UserId};

/// Presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceScope {
    /// Global online set.
    Online,
    /// Typing indicators of one room.
    Typing(RoomId),
}

impl PresenceScope {
    /// Room this scope is bound to. `None` for the global scope.
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            Self::Online => None,
            Self::Typing(room_id) => Some(room_id),
        }
    }
}

impl fmt::Display for PresenceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Typing(room_id) => write!(f, "typing:{room_id}"),
        }
    }
}

/// Deduplication key: one live entry per user and room (or global).
pub type PresenceKey = (UserId, Option<RoomId>);

/// State one peer announces on a presence scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    /// Announcing user.
    pub user_id: UserId,
    /// Room for typing state, `None` for global online state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    /// Whether the user is typing in `room_id`.
    #[serde(default)]
    pub is_typing: bool,
    /// Announcement time in Unix milliseconds.
    pub last_seen_at: u64,
}

impl PresenceState {
    /// Global online announcement.
    pub fn online(user_id: UserId, now_ms: u64) -> Self {
        Self { user_id, room_id: None, is_typing: false, last_seen_at: now_ms }
    }

    /// Room-scoped typing announcement.
    pub fn typing(user_id: UserId, room_id: RoomId, is_typing: bool, now_ms: u64) -> Self {
        Self { user_id, room_id: Some(room_id), is_typing, last_seen_at: now_ms }
    }

    /// Deduplication key of this entry.
    pub fn key(&self) -> PresenceKey {
        (self.user_id.clone(), self.room_id.clone())
    }
}
