//! Conversation errors.
//!
//! Returned synchronously from [`Conversation::handle`](crate::Conversation::handle)
//! when a user intent is rejected before any collaborator call is made.
//! Collaborator failures never surface here; they become visible state and
//! [`Notice`](crate::Notice)s.

use huddle_proto::RoomId;
use thiserror::Error;

/// Rejected user intent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// The intent needs an active room and none is selected.
    #[error("no active room")]
    NoActiveRoom,

    /// Message text is empty and there is no attachment.
    #[error("message is empty")]
    EmptyMessage,

    /// Only the sender may edit or delete a message.
    #[error("message {id} belongs to another user")]
    NotAuthor {
        /// Target message.
        id: String,
    },

    /// No loaded message with this id in the room.
    #[error("message {id} not found in room {room_id}")]
    MessageNotFound {
        /// Room searched.
        room_id: RoomId,
        /// Requested message id.
        id: String,
    },

    /// No optimistic message with this local id.
    #[error("unknown local message {local_id}")]
    UnknownLocalMessage {
        /// Requested local id.
        local_id: u64,
    },

    /// The local message has not failed, so it cannot be retried or
    /// discarded.
    #[error("local message {local_id} has not failed")]
    NotFailed {
        /// Requested local id.
        local_id: u64,
    },
}
