//! Owned render snapshot.

use huddle_core::{HistoryStatus, StoredMessage, SubscriptionPhase};
use huddle_proto::{Room, UserId};

/// Everything the UI needs to render the active conversation.
///
/// Produced by [`Conversation::view`](crate::Conversation::view); compare two
/// views to decide whether a re-render is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationView {
    /// Active room.
    pub room: Option<Room>,
    /// Messages of the active room in display order.
    pub messages: Vec<StoredMessage>,
    /// Other users typing in the active room.
    pub typing: Vec<UserId>,
    /// Users online.
    pub online: Vec<UserId>,
    /// History status of the active room.
    pub history: HistoryStatus,
    /// Whether an older page is being fetched.
    pub loading_older: bool,
    /// Whether every older page has been loaded.
    pub exhausted: bool,
    /// Live stream state.
    pub subscription: SubscriptionPhase,
}

impl ConversationView {
    /// Whether `user_id` appears in the online set.
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.online.contains(user_id)
    }

    /// Messages still waiting for their ack.
    pub fn pending(&self) -> impl Iterator<Item = &StoredMessage> {
        self.messages.iter().filter(|m| m.delivery == huddle_core::Delivery::Pending)
    }
}
