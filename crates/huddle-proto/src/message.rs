//! Message payload types.
//!
//! A [`Message`] is the authoritative row shape returned by the persistence
//! collaborator and carried by `insert` stream events. Reactions are kept as a
//! multiset of `(emoji, user)` pairs; counts and "has reacted" are derived.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId, UserId};

/// Attachment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Rendered inline.
    Image,
    /// Offered as a download.
    File,
}

/// File or image attached to a message. The bytes live in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Public URL of the stored object.
    pub url: String,
    /// How the UI presents it.
    pub kind: AttachmentKind,
    /// Original file name.
    pub name: String,
}

/// One user's reaction with one emoji.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reaction {
    /// Emoji text.
    pub emoji: String,
    /// Reacting user.
    pub user_id: UserId,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server id once persisted, local id while optimistic.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Message body.
    pub text: String,
    /// Creation time in Unix milliseconds.
    pub created_at: u64,
    /// Optional attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    /// Reaction multiset.
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Last edit time in Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<u64>,
    /// Soft-delete time in Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
}

impl Message {
    /// Whether the message has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Reaction counts per emoji.
    pub fn reaction_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for reaction in &self.reactions {
            *counts.entry(reaction.emoji.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Whether `user_id` has reacted with `emoji`.
    pub fn has_reacted(&self, user_id: &UserId, emoji: &str) -> bool {
        self.reactions.iter().any(|r| &r.user_id == user_id && r.emoji == emoji)
    }

    /// Add the reaction if absent, remove it if present.
    ///
    /// Returns `true` if the reaction was added.
    pub fn toggle_reaction(&mut self, emoji: &str, user_id: &UserId) -> bool {
        if let Some(pos) =
            self.reactions.iter().position(|r| &r.user_id == user_id && r.emoji == emoji)
        {
            self.reactions.remove(pos);
            false
        } else {
            self.reactions.push(Reaction { emoji: emoji.to_string(), user_id: user_id.clone() });
            true
        }
    }
}

/// Insert request for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    /// Target room.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Message body.
    pub text: String,
    /// Optional attachment (already uploaded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

/// Update request for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePatch {
    /// Replacement body.
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message {
            id: MessageId::Server("m1".into()),
            room_id: RoomId::public("general").unwrap(),
            sender_id: UserId::new("alice").unwrap(),
            text: "hello".into(),
            created_at: 1,
            attachment: None,
            reactions: Vec::new(),
            edited_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn toggle_reaction_adds_then_removes() {
        let mut msg = message();
        let bob = UserId::new("bob").unwrap();

        assert!(msg.toggle_reaction("👍", &bob));
        assert!(msg.has_reacted(&bob, "👍"));
        assert!(!msg.toggle_reaction("👍", &bob));
        assert!(msg.reactions.is_empty());
    }

    #[test]
    fn counts_are_per_emoji() {
        let mut msg = message();
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();
        msg.toggle_reaction("👍", &alice);
        msg.toggle_reaction("👍", &bob);
        msg.toggle_reaction("🎉", &bob);

        let counts = msg.reaction_counts();
        assert_eq!(counts.get("👍"), Some(&2));
        assert_eq!(counts.get("🎉"), Some(&1));
    }
}
