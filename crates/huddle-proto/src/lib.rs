//! Huddle data model
//!
//! Types shared by every layer of the conversation engine: identifiers, rooms,
//! messages, presence state, and the tagged events carried by the live stream.
//!
//! # Components
//!
//! - [`room`]: Room identity resolver (DM ids derived from the participants)
//! - [`Message`]: A chat message with reactions and soft-delete marker
//! - [`StreamEvent`]: Closed set of live-stream events with a CBOR codec
//! - [`PresenceState`]: Ephemeral online/typing state announced by a peer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod event;
pub mod ids;
pub mod message;
pub mod presence;
pub mod room;

pub use errors::{ProtocolError, Result};
pub use event::{MessageDeletion, MessageEdit, ReactionChange, StreamEvent};
pub use ids::{MessageId, RoomId, UserId};
pub use message::{Attachment, AttachmentKind, Message, MessageDraft, MessagePatch, Reaction};
pub use presence::{PresenceKey, PresenceScope, PresenceState};
pub use room::{Room, RoomKind, classify, dm_participants, resolve_dm_room_id};
