//! Identifiers.
//!
//! `UserId` and `RoomId` are validated strings. `MessageId` is a closed type
//! with two disjoint variants: server ids assigned on persistence and local
//! ids used during the optimistic-send window. A local id can never compare
//! equal to a server id, so reconciliation never picks the wrong entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    room::DM_PREFIX,
};

/// Opaque user identifier supplied by the identity collaborator.
///
/// Never empty and never contains `_`, which separates the participants of a
/// direct-message room id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate and wrap a user id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProtocolError::EmptyId { kind: "user" });
        }
        if id.contains('_') {
            return Err(ProtocolError::InvalidUserId(id));
        }
        Ok(Self(id))
    }

    /// Id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical room identifier.
///
/// Public channel ids are assigned by the backend. Direct-message ids live in
/// the `dm_` namespace and are derived with
/// [`resolve_dm_room_id`](crate::resolve_dm_room_id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a server-assigned public channel id.
    ///
    /// Rejects ids inside the direct-message namespace so public and DM ids
    /// never collide.
    pub fn public(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProtocolError::EmptyId { kind: "room" });
        }
        if id.starts_with(DM_PREFIX) {
            return Err(ProtocolError::ReservedRoomId(id));
        }
        Ok(Self(id))
    }

    /// Parse an id of either namespace (as received from the backend).
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProtocolError::EmptyId { kind: "room" });
        }
        Ok(Self(id))
    }

    /// Only for the resolver, which guarantees the namespace.
    pub(crate) fn from_resolved(id: String) -> Self {
        Self(id)
    }

    /// Id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identifier.
///
/// Serialized untagged: server ids as strings, local ids as integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Assigned by the backend once the message is persisted.
    Server(String),
    /// Client-generated id for an optimistic message awaiting its ack.
    Local(u64),
}

impl MessageId {
    /// Server id, if persisted.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    /// Local id, if still provisional.
    pub fn local(&self) -> Option<u64> {
        match self {
            Self::Server(_) => None,
            Self::Local(id) => Some(*id),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => f.write_str(id),
            Self::Local(id) => write!(f, "local-{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_empty_and_separator() {
        assert!(matches!(UserId::new(""), Err(ProtocolError::EmptyId { kind: "user" })));
        assert!(matches!(UserId::new("a_b"), Err(ProtocolError::InvalidUserId(_))));
        assert_eq!(UserId::new("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn public_room_rejects_dm_namespace() {
        assert!(matches!(RoomId::public("dm_a_b"), Err(ProtocolError::ReservedRoomId(_))));
        assert!(RoomId::parse("dm_a_b").is_ok());
        assert!(RoomId::public("general").is_ok());
    }

    #[test]
    fn local_and_server_ids_never_collide() {
        assert_ne!(MessageId::Local(7), MessageId::Server("7".into()));
        assert_eq!(MessageId::Local(7).to_string(), "local-7");
    }
}
