//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of the system at a point in time.
//! Invariants operate on snapshots rather than live state to ensure
//! consistent, atomic checks.

use std::collections::BTreeMap;

use huddle_core::{StoredMessage, SubscriptionPhase};
use huddle_proto::{RoomId, UserId};

/// Snapshot of the entire system state.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-session state snapshots.
    pub sessions: Vec<SessionSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no sessions).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single session.
    pub fn single(session: SessionSnapshot) -> Self {
        Self { sessions: vec![session] }
    }

    /// Create a snapshot from multiple sessions.
    pub fn from_sessions(sessions: Vec<SessionSnapshot>) -> Self {
        Self { sessions }
    }
}

/// Snapshot of one session's observable state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Signed-in user.
    pub user_id: UserId,
    /// Room shown.
    pub active_room: Option<RoomId>,
    /// Room the stream is bound to.
    pub subscribed_room: Option<RoomId>,
    /// Stream state.
    pub phase: SubscriptionPhase,
    /// Loaded messages per room, in display order.
    pub rooms: BTreeMap<RoomId, Vec<StoredMessage>>,
    /// Every activation epoch observed, in order.
    pub epoch_history: Vec<u64>,
    /// Streams opened and not yet closed.
    pub open_streams: usize,
    /// Whether no completions were waiting for delivery.
    pub quiescent: bool,
}

impl SessionSnapshot {
    /// Idle session with nothing loaded.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            active_room: None,
            subscribed_room: None,
            phase: SubscriptionPhase::Idle,
            rooms: BTreeMap::new(),
            epoch_history: Vec::new(),
            open_streams: 0,
            quiescent: true,
        }
    }

    /// Set the active and subscribed room.
    #[must_use]
    pub fn with_room(mut self, room_id: RoomId, phase: SubscriptionPhase) -> Self {
        self.active_room = Some(room_id.clone());
        self.subscribed_room = Some(room_id);
        self.phase = phase;
        self
    }

    /// Add a room's messages.
    #[must_use]
    pub fn with_messages(mut self, room_id: RoomId, messages: Vec<StoredMessage>) -> Self {
        self.rooms.insert(room_id, messages);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot() {
        let snapshot = SystemSnapshot::empty();
        assert!(snapshot.sessions.is_empty());
    }

    #[test]
    fn session_snapshot_builder() {
        let room = RoomId::public("general").unwrap();
        let session = SessionSnapshot::new(UserId::new("alice").unwrap())
            .with_room(room.clone(), SubscriptionPhase::Live)
            .with_messages(room.clone(), Vec::new());

        assert_eq!(session.active_room.as_ref(), Some(&room));
        assert_eq!(session.phase, SubscriptionPhase::Live);
        assert!(session.rooms.contains_key(&room));
    }
}
