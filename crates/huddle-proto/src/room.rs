//! Room identity resolver.
//!
//! Every client computes the same direct-message room id from the two
//! participant ids without a lookup round trip: the ids are sorted and joined
//! under the `dm_` prefix. Public channel ids can never start with that prefix
//! (see [`RoomId::public`]), so the two namespaces are disjoint.
//!
//! # Invariants
//!
//! - Symmetry: `resolve_dm_room_id(a, b) == resolve_dm_room_id(b, a)`.
//! - Namespace separation: `classify` of a resolved id is always `Direct`, and
//!   of any id accepted by `RoomId::public` always `Public`.
//! - Injectivity: user ids contain no `_`, so distinct pairs never map to the
//!   same room id.

use serde::{Deserialize, Serialize};

use crate::ids::{RoomId, UserId};

/// Namespace prefix of direct-message room ids.
pub const DM_PREFIX: &str = "dm_";

/// Room kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Server-created channel visible to the whole team.
    Public,
    /// Virtual pairwise room between two users.
    Direct,
}

/// Derive the direct-message room id for two participants.
pub fn resolve_dm_room_id(self_id: &UserId, other_id: &UserId) -> RoomId {
    let (low, high) = if self_id <= other_id { (self_id, other_id) } else { (other_id, self_id) };
    RoomId::from_resolved(format!("{DM_PREFIX}{low}_{high}"))
}

/// Classify a room id by its namespace prefix.
pub fn classify(room_id: &RoomId) -> RoomKind {
    if room_id.as_str().starts_with(DM_PREFIX) { RoomKind::Direct } else { RoomKind::Public }
}

/// Recover both participants of a direct-message room. `None` for public
/// rooms or ids that were not produced by the resolver.
pub fn dm_participants(room_id: &RoomId) -> Option<(UserId, UserId)> {
    let rest = room_id.as_str().strip_prefix(DM_PREFIX)?;
    let (low, high) = rest.split_once('_')?;
    Some((UserId::new(low).ok()?, UserId::new(high).ok()?))
}

impl RoomId {
    /// Other participant of a DM room from `self_id`'s point of view. `None`
    /// for public rooms or if `self_id` is not a participant.
    pub fn other_participant(&self, self_id: &UserId) -> Option<UserId> {
        let (low, high) = dm_participants(self)?;
        if &low == self_id {
            Some(high)
        } else if &high == self_id {
            Some(low)
        } else {
            None
        }
    }
}

/// A room the user can activate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Canonical room id.
    pub id: RoomId,
    /// Public channel or direct message.
    pub kind: RoomKind,
    /// Channel name, or the other participant's name for DMs.
    pub display_name: String,
}

impl Room {
    /// Public channel with a server-assigned id.
    pub fn public(id: RoomId, name: impl Into<String>) -> Self {
        let kind = classify(&id);
        Self { id, kind, display_name: name.into() }
    }

    /// Direct-message room between `self_id` and `other_id`. Exists as soon
    /// as both ids are known; there is no creation step.
    pub fn direct(self_id: &UserId, other_id: &UserId, other_name: impl Into<String>) -> Self {
        Self {
            id: resolve_dm_room_id(self_id, other_id),
            kind: RoomKind::Direct,
            display_name: other_name.into(),
        }
    }
}
