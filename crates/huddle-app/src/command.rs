//! UI commands and signals.

use huddle_client::{ConversationError, ConversationEvent, Notice};
use huddle_proto::{Attachment, Room, RoomId, UserId};

/// User intents sent to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show a room.
    SwitchRoom(Room),
    /// Show the direct-message room with a user.
    OpenDirect {
        /// Other participant.
        user_id: UserId,
        /// Their display name.
        display_name: String,
    },
    /// Send a message to the active room.
    Send {
        /// Message body.
        text: String,
        /// Already uploaded attachment.
        attachment: Option<Attachment>,
    },
    /// Re-send a failed message.
    RetrySend {
        /// Local id of the failed message.
        local_id: u64,
    },
    /// Drop a failed message.
    DiscardFailed {
        /// Local id of the failed message.
        local_id: u64,
    },
    /// Edit one of our messages.
    Edit {
        /// Server id.
        id: String,
        /// Replacement body.
        text: String,
    },
    /// Soft-delete one of our messages.
    Delete {
        /// Server id.
        id: String,
    },
    /// Toggle our reaction.
    React {
        /// Server id.
        id: String,
        /// Emoji.
        emoji: String,
    },
    /// Keystroke in the composer.
    NotifyTyping,
    /// Scrolled to the top.
    LoadOlder,
    /// Reload history after a failure.
    RetryHistory,
    /// Stop the runtime.
    Quit,
}

impl Command {
    /// Conversation event for this command. `None` for [`Command::Quit`].
    pub fn into_event<I>(self) -> Option<ConversationEvent<I>> {
        let event = match self {
            Self::SwitchRoom(room) => ConversationEvent::SwitchRoom(room),
            Self::OpenDirect { user_id, display_name } => {
                ConversationEvent::OpenDirect { user_id, display_name }
            },
            Self::Send { text, attachment } => ConversationEvent::Send { text, attachment },
            Self::RetrySend { local_id } => ConversationEvent::RetrySend { local_id },
            Self::DiscardFailed { local_id } => ConversationEvent::DiscardFailed { local_id },
            Self::Edit { id, text } => ConversationEvent::Edit { id, text },
            Self::Delete { id } => ConversationEvent::Delete { id },
            Self::React { id, emoji } => ConversationEvent::React { id, emoji },
            Self::NotifyTyping => ConversationEvent::NotifyTyping,
            Self::LoadOlder => ConversationEvent::LoadOlder,
            Self::RetryHistory => ConversationEvent::RetryHistory,
            Self::Quit => return None,
        };
        Some(event)
    }
}

/// One-off notifications for the UI, next to the continuously published
/// [`ConversationView`](huddle_client::ConversationView).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A collaborator failure the user should see.
    Notice(Notice),
    /// An older page was spliced in; restore the scroll offset.
    HistoryPrepended {
        /// Affected room.
        room_id: RoomId,
        /// Messages inserted above the previous top.
        count: usize,
    },
    /// A command was rejected before reaching the backend.
    Rejected(ConversationError),
}
