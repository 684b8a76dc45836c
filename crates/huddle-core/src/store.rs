//! Message store.
//!
//! Owns the in-memory message list of every room the session has loaded. All
//! mutation goes through this API so the ordering invariant holds no matter
//! how optimistic sends, history pages and stream events interleave.
//!
//! # Layout
//!
//! Each [`RoomTimeline`] is a vector split in two parts:
//!
//! ```text
//! [ confirmed (Sent), sorted by created_at ... | unconfirmed (Pending/Failed) ]
//!   0 .. confirmed                               confirmed .. len
//! ```
//!
//! plus an id → position index so reconciliation and event application are
//! O(1) lookups.
//!
//! # Invariants
//!
//! - Confirmed entries are in non-decreasing `created_at` order.
//! - Unconfirmed entries always trail the confirmed ones: their server
//!   timestamp is not known yet.
//! - Every id appears at most once; the index maps each id to its position.
//! - Server messages are never removed once loaded (soft delete only). Only a
//!   failed local send can be discarded.

use std::collections::HashMap;

use huddle_proto::{Message, MessageId, Reaction, RoomId, UserId};

/// Delivery state of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Optimistically shown, waiting for the persistence ack.
    Pending,
    /// Authoritative copy from the backend.
    Sent,
    /// Send failed or timed out; offered for retry or discard.
    Failed,
}

/// Message plus its delivery state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Message content.
    pub message: Message,
    /// Delivery state.
    pub delivery: Delivery,
}

impl StoredMessage {
    /// Whether this is an authoritative server copy.
    pub fn is_confirmed(&self) -> bool {
        self.delivery == Delivery::Sent
    }
}

/// Result of reconciling an optimistic message with its ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Optimistic entry replaced by the server copy.
    Replaced,
    /// The server copy had already arrived; the optimistic entry was dropped.
    Deduplicated,
    /// No optimistic entry with that local id.
    Unknown,
}

/// Result of merging a history page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Messages that were not loaded before.
    pub inserted: usize,
    /// Known messages refreshed from the authoritative copy.
    pub updated: usize,
    /// Inserted messages older than the previous oldest message.
    pub prepended: usize,
}

impl MergeOutcome {
    /// Whether the merge changed anything visible.
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0
    }
}

/// Position of a confirmed message, ordered by `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cursor {
    /// `created_at` of the message.
    pub created_at: u64,
    /// Server id of the message.
    pub id: String,
}

impl Cursor {
    /// Cursor of a server message, `None` for optimistic entries.
    pub fn of(message: &Message) -> Option<Self> {
        message.id.server().map(|id| Self { created_at: message.created_at, id: id.to_string() })
    }
}

/// Ordered message list of one room.
#[derive(Debug, Clone, Default)]
pub struct RoomTimeline {
    entries: Vec<StoredMessage>,
    index: HashMap<MessageId, usize>,
    confirmed: usize,
}

impl RoomTimeline {
    /// All entries in display order.
    pub fn entries(&self) -> &[StoredMessage] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of unconfirmed (pending or failed) entries.
    pub fn unconfirmed(&self) -> usize {
        self.entries.len() - self.confirmed
    }

    /// Entry by id.
    pub fn get(&self, id: &MessageId) -> Option<&StoredMessage> {
        self.index.get(id).and_then(|&pos| self.entries.get(pos))
    }

    /// Cursor for fetching the page before the oldest loaded message.
    pub fn oldest_cursor(&self) -> Option<Cursor> {
        self.entries[..self.confirmed].first().and_then(|entry| Cursor::of(&entry.message))
    }

    /// Cursor of the newest confirmed message.
    pub fn newest_cursor(&self) -> Option<Cursor> {
        self.entries[..self.confirmed].last().and_then(|entry| Cursor::of(&entry.message))
    }

    fn append_optimistic(&mut self, message: Message) -> bool {
        if message.id.local().is_none() || self.index.contains_key(&message.id) {
            return false;
        }
        self.index.insert(message.id.clone(), self.entries.len());
        self.entries.push(StoredMessage { message, delivery: Delivery::Pending });
        true
    }

    fn reconcile(&mut self, local_id: u64, server: Message) -> ReconcileOutcome {
        let key = MessageId::Local(local_id);
        let Some(pos) = self.index.get(&key).copied() else {
            return ReconcileOutcome::Unknown;
        };

        if self.index.contains_key(&server.id) {
            self.remove_at(pos);
            return ReconcileOutcome::Deduplicated;
        }

        // Unconfirmed entries sit at or after `confirmed`, so the ordered slot
        // never lies after `pos`. With a single pending send both are equal and
        // the entry keeps its position.
        self.entries.remove(pos);
        self.index.remove(&key);
        let slot = self.ordered_slot(server.created_at);
        self.entries.insert(slot, StoredMessage { message: server, delivery: Delivery::Sent });
        self.confirmed += 1;
        self.reindex_from(slot);
        ReconcileOutcome::Replaced
    }

    fn set_delivery(&mut self, local_id: u64, from: Delivery, to: Delivery) -> bool {
        let Some(&pos) = self.index.get(&MessageId::Local(local_id)) else {
            return false;
        };
        match self.entries.get_mut(pos) {
            Some(entry) if entry.delivery == from => {
                entry.delivery = to;
                true
            },
            _ => false,
        }
    }

    fn retry(&mut self, local_id: u64) -> Option<Message> {
        let key = MessageId::Local(local_id);
        let pos = *self.index.get(&key)?;
        if self.entries.get(pos)?.delivery != Delivery::Failed {
            return None;
        }
        let mut entry = self.entries.remove(pos);
        entry.delivery = Delivery::Pending;
        let message = entry.message.clone();
        self.entries.push(entry);
        self.reindex_from(pos);
        Some(message)
    }

    fn discard(&mut self, local_id: u64) -> bool {
        let Some(&pos) = self.index.get(&MessageId::Local(local_id)) else {
            return false;
        };
        if self.entries.get(pos).map(|e| e.delivery) != Some(Delivery::Failed) {
            return false;
        }
        self.remove_at(pos);
        true
    }

    fn apply_insert(&mut self, message: Message) -> bool {
        if message.id.server().is_none() || self.index.contains_key(&message.id) {
            return false;
        }
        self.insert_confirmed(message);
        true
    }

    fn merge_history(&mut self, messages: Vec<Message>) -> MergeOutcome {
        let anchor = self.entries[..self.confirmed].first().map(|e| e.message.created_at);
        let mut outcome = MergeOutcome::default();

        for message in messages {
            if message.id.server().is_none() {
                continue;
            }
            match self.index.get(&message.id).copied() {
                Some(pos) => {
                    if self.absorb(pos, message) {
                        outcome.updated += 1;
                    }
                },
                None => {
                    if anchor.is_some_and(|oldest| message.created_at < oldest) {
                        outcome.prepended += 1;
                    }
                    self.insert_confirmed(message);
                    outcome.inserted += 1;
                },
            }
        }
        outcome
    }

    /// Refresh a known entry from an authoritative copy without regressing
    /// edits or un-deleting.
    fn absorb(&mut self, pos: usize, incoming: Message) -> bool {
        let Some(entry) = self.entries.get_mut(pos) else {
            return false;
        };
        let before = entry.message.clone();
        let existing = &mut entry.message;

        if incoming.edited_at >= existing.edited_at {
            existing.text = incoming.text;
            existing.edited_at = incoming.edited_at;
        }
        existing.deleted_at = existing.deleted_at.or(incoming.deleted_at);
        existing.reactions = incoming.reactions;
        existing.attachment = incoming.attachment;

        *existing != before
    }

    fn with_server_entry(&mut self, id: &str, f: impl FnOnce(&mut Message) -> bool) -> bool {
        match self.index.get(&MessageId::Server(id.to_string())) {
            Some(&pos) => self.entries.get_mut(pos).is_some_and(|entry| f(&mut entry.message)),
            None => false,
        }
    }

    fn insert_confirmed(&mut self, message: Message) {
        let slot = self.ordered_slot(message.created_at);
        self.entries.insert(slot, StoredMessage { message, delivery: Delivery::Sent });
        self.confirmed += 1;
        self.reindex_from(slot);
    }

    fn remove_at(&mut self, pos: usize) {
        let entry = self.entries.remove(pos);
        self.index.remove(&entry.message.id);
        if pos < self.confirmed {
            self.confirmed -= 1;
        }
        self.reindex_from(pos);
    }

    /// Slot after every confirmed entry with `created_at <= created_at`.
    fn ordered_slot(&self, created_at: u64) -> usize {
        self.entries[..self.confirmed].partition_point(|e| e.message.created_at <= created_at)
    }

    fn reindex_from(&mut self, start: usize) {
        for (pos, entry) in self.entries.iter().enumerate().skip(start) {
            self.index.insert(entry.message.id.clone(), pos);
        }
    }
}

/// Per-room message lists for the whole session.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    rooms: HashMap<RoomId, RoomTimeline>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline of a room. `None` if nothing was ever loaded for it.
    pub fn timeline(&self, room_id: &RoomId) -> Option<&RoomTimeline> {
        self.rooms.get(room_id)
    }

    /// Entries of a room in display order (empty if never loaded).
    pub fn messages(&self, room_id: &RoomId) -> &[StoredMessage] {
        self.rooms.get(room_id).map(RoomTimeline::entries).unwrap_or_default()
    }

    /// Entry by id.
    pub fn get(&self, room_id: &RoomId, id: &MessageId) -> Option<&StoredMessage> {
        self.rooms.get(room_id).and_then(|t| t.get(id))
    }

    /// Rooms with a timeline.
    pub fn rooms(&self) -> impl Iterator<Item = (&RoomId, &RoomTimeline)> {
        self.rooms.iter()
    }

    /// Append the sender's own just-sent message at the tail as `Pending`.
    ///
    /// Returns `false` if the message does not carry a fresh local id.
    pub fn append_optimistic(&mut self, message: Message) -> bool {
        self.rooms.entry(message.room_id.clone()).or_default().append_optimistic(message)
    }

    /// Replace an optimistic entry with its authoritative copy.
    pub fn reconcile(&mut self, room_id: &RoomId, local_id: u64, server: Message) -> ReconcileOutcome {
        match self.rooms.get_mut(room_id) {
            Some(timeline) => timeline.reconcile(local_id, server),
            None => ReconcileOutcome::Unknown,
        }
    }

    /// Mark a pending optimistic entry as failed.
    pub fn mark_failed(&mut self, room_id: &RoomId, local_id: u64) -> bool {
        self.rooms
            .get_mut(room_id)
            .is_some_and(|t| t.set_delivery(local_id, Delivery::Pending, Delivery::Failed))
    }

    /// Put a failed entry back to `Pending` at the tail and return it for
    /// re-sending.
    pub fn retry(&mut self, room_id: &RoomId, local_id: u64) -> Option<Message> {
        self.rooms.get_mut(room_id).and_then(|t| t.retry(local_id))
    }

    /// Drop a failed entry.
    pub fn discard(&mut self, room_id: &RoomId, local_id: u64) -> bool {
        self.rooms.get_mut(room_id).is_some_and(|t| t.discard(local_id))
    }

    /// Insert a message delivered by the stream. Duplicate deliveries are
    /// no-ops.
    pub fn apply_insert(&mut self, message: Message) -> bool {
        let room_id = message.room_id.clone();
        let inserted = self.rooms.entry(room_id).or_default().apply_insert(message);
        if !inserted {
            tracing::debug!("ignoring duplicate or local insert");
        }
        inserted
    }

    /// Merge a history page into a room.
    pub fn merge_history(&mut self, room_id: &RoomId, messages: Vec<Message>) -> MergeOutcome {
        self.rooms.entry(room_id.clone()).or_default().merge_history(messages)
    }

    /// Apply an edit. No-op for unknown ids or edits older than the stored one.
    pub fn apply_edit(&mut self, room_id: &RoomId, id: &str, text: &str, edited_at: u64) -> bool {
        self.rooms.get_mut(room_id).is_some_and(|t| {
            t.with_server_entry(id, |message| {
                if message.edited_at.is_some_and(|current| current > edited_at) {
                    return false;
                }
                message.text = text.to_string();
                message.edited_at = Some(edited_at);
                true
            })
        })
    }

    /// Apply a soft delete. No-op for unknown or already deleted ids.
    pub fn apply_delete(&mut self, room_id: &RoomId, id: &str, deleted_at: u64) -> bool {
        self.rooms.get_mut(room_id).is_some_and(|t| {
            t.with_server_entry(id, |message| {
                if message.is_deleted() {
                    return false;
                }
                message.deleted_at = Some(deleted_at);
                true
            })
        })
    }

    /// Replace the reaction multiset. No-op for unknown ids.
    pub fn apply_reactions(&mut self, room_id: &RoomId, id: &str, reactions: Vec<Reaction>) -> bool {
        self.rooms.get_mut(room_id).is_some_and(|t| {
            t.with_server_entry(id, |message| {
                if message.reactions == reactions {
                    return false;
                }
                message.reactions = reactions;
                true
            })
        })
    }

    /// Toggle one user's reaction. No-op for unknown ids.
    pub fn toggle_reaction(&mut self, room_id: &RoomId, id: &str, emoji: &str, user_id: &UserId) -> bool {
        self.rooms.get_mut(room_id).is_some_and(|t| {
            t.with_server_entry(id, |message| {
                message.toggle_reaction(emoji, user_id);
                true
            })
        })
    }

    /// Oldest loaded message of a room, for pagination.
    pub fn oldest_cursor(&self, room_id: &RoomId) -> Option<Cursor> {
        self.rooms.get(room_id).and_then(RoomTimeline::oldest_cursor)
    }

    /// Newest confirmed message of a room.
    pub fn newest_cursor(&self, room_id: &RoomId) -> Option<Cursor> {
        self.rooms.get(room_id).and_then(RoomTimeline::newest_cursor)
    }
}
