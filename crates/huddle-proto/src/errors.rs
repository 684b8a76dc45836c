//! Protocol-level errors.
//!
//! Raised when constructing identifiers from untrusted text or when decoding
//! stream events. The engine logs and drops events that fail to decode; id
//! errors surface to whoever supplied the bad id.

use thiserror::Error;

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced by the data model and the event codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Identifier was empty.
    #[error("{kind} id must not be empty")]
    EmptyId {
        /// Which identifier was empty (`user`, `room`).
        kind: &'static str,
    },

    /// User id contains the DM separator.
    #[error("user id {0:?} must not contain '_'")]
    InvalidUserId(String),

    /// Public room id uses the reserved direct-message namespace.
    #[error("room id {0:?} is in the reserved direct-message namespace")]
    ReservedRoomId(String),

    /// Event bytes are not a valid CBOR envelope.
    #[error("malformed event envelope: {0}")]
    Malformed(String),

    /// Envelope carries a tag outside the known event set.
    #[error("unknown event type: {0:?}")]
    UnknownEventType(String),

    /// Envelope tag is known but the payload does not match its shape.
    #[error("invalid {tag} payload: {reason}")]
    InvalidPayload {
        /// Event tag of the envelope.
        tag: &'static str,
        /// Decoder failure description.
        reason: String,
    },

    /// Event could not be encoded.
    #[error("failed to encode event: {0}")]
    Encode(String),
}
