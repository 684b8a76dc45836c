//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use huddle_core::{Delivery, SubscriptionPhase};

use super::{Invariant, InvariantResult, SystemSnapshot};

/// Confirmed messages are ordered by `created_at` and precede every
/// optimistic one.
///
/// Pending and failed messages always render at the bottom, in send order,
/// regardless of the provisional timestamps they carry.
pub struct MessageOrder;

impl Invariant for MessageOrder {
    fn name(&self) -> &'static str {
        "message_order"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for (room_id, entries) in &session.rooms {
                let confirmed = entries.iter().take_while(|e| e.is_confirmed()).count();
                if let Some(stray) = entries[confirmed..].iter().find(|e| e.is_confirmed()) {
                    return Err(self.violation(format!(
                        "{} room {room_id}: confirmed {} after an optimistic message",
                        session.user_id, stray.message.id
                    )));
                }
                for pair in entries[..confirmed].windows(2) {
                    if pair[1].message.created_at < pair[0].message.created_at {
                        return Err(self.violation(format!(
                            "{} room {room_id}: {} ({}) before {} ({})",
                            session.user_id,
                            pair[0].message.id,
                            pair[0].message.created_at,
                            pair[1].message.id,
                            pair[1].message.created_at
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A message appears at most once per room, and only authoritative copies
/// carry server ids.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for (room_id, entries) in &session.rooms {
                let mut seen = HashSet::new();
                for entry in entries {
                    if !seen.insert(&entry.message.id) {
                        return Err(self.violation(format!(
                            "{} room {room_id}: {} rendered twice",
                            session.user_id, entry.message.id
                        )));
                    }
                    if (entry.delivery == Delivery::Sent) != entry.message.id.server().is_some() {
                        return Err(self.violation(format!(
                            "{} room {room_id}: {} is {:?}",
                            session.user_id, entry.message.id, entry.delivery
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Every stored message belongs to the room it is listed under.
pub struct RoomIsolation;

impl Invariant for RoomIsolation {
    fn name(&self) -> &'static str {
        "room_isolation"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for (room_id, entries) in &session.rooms {
                if let Some(stray) = entries.iter().find(|e| e.message.room_id != *room_id) {
                    return Err(self.violation(format!(
                        "{} room {room_id}: holds {} of room {}",
                        session.user_id, stray.message.id, stray.message.room_id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The stream is bound to the active room, and idle without one.
pub struct ActiveRoomSubscribed;

impl Invariant for ActiveRoomSubscribed {
    fn name(&self) -> &'static str {
        "active_room_subscribed"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            let consistent = match &session.active_room {
                Some(active) => {
                    session.phase != SubscriptionPhase::Idle && session.subscribed_room.as_ref() == Some(active)
                },
                None => session.phase == SubscriptionPhase::Idle && session.subscribed_room.is_none(),
            };
            if !consistent {
                return Err(self.violation(format!(
                    "{}: active {:?}, stream {:?} on {:?}",
                    session.user_id, session.active_room, session.phase, session.subscribed_room
                )));
            }
        }
        Ok(())
    }
}

/// Once every completion has been delivered, a session holds at most one open
/// stream, and exactly one while live.
pub struct SingleLiveSubscription;

impl Invariant for SingleLiveSubscription {
    fn name(&self) -> &'static str {
        "single_live_subscription"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in state.sessions.iter().filter(|s| s.quiescent) {
            let live = session.phase == SubscriptionPhase::Live;
            if session.open_streams > 1 || (live && session.open_streams == 0) {
                return Err(self.violation(format!(
                    "{}: {} open streams while {:?}",
                    session.user_id, session.open_streams, session.phase
                )));
            }
        }
        Ok(())
    }
}

/// Activation epochs never decrease.
pub struct EpochMonotonicity;

impl Invariant for EpochMonotonicity {
    fn name(&self) -> &'static str {
        "epoch_monotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for window in session.epoch_history.windows(2) {
                if window[1] < window[0] {
                    return Err(self.violation(format!(
                        "{}: epoch decreased {} → {}",
                        session.user_id, window[0], window[1]
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use huddle_core::StoredMessage;
    use huddle_proto::{Message, MessageId, RoomId, UserId};

    use super::*;
    use crate::invariants::SessionSnapshot;

    fn room() -> RoomId {
        RoomId::public("general").unwrap()
    }

    fn entry(id: MessageId, created_at: u64, delivery: Delivery) -> StoredMessage {
        let message = Message {
            id,
            room_id: room(),
            sender_id: UserId::new("alice").unwrap(),
            text: String::new(),
            created_at,
            attachment: None,
            reactions: Vec::new(),
            edited_at: None,
            deleted_at: None,
        };
        StoredMessage { message, delivery }
    }

    fn session(entries: Vec<StoredMessage>) -> SystemSnapshot {
        SystemSnapshot::single(
            SessionSnapshot::new(UserId::new("alice").unwrap())
                .with_room(room(), SubscriptionPhase::Subscribing)
                .with_messages(room(), entries),
        )
    }

    #[test]
    fn out_of_order_confirmed_messages_are_flagged() {
        let state = session(vec![
            entry(MessageId::Server("b".into()), 20, Delivery::Sent),
            entry(MessageId::Server("a".into()), 10, Delivery::Sent),
        ]);
        assert!(MessageOrder.check(&state).is_err());
    }

    #[test]
    fn optimistic_messages_trail_confirmed_ones() {
        let ok = session(vec![
            entry(MessageId::Server("a".into()), 10, Delivery::Sent),
            entry(MessageId::Local(1), 5, Delivery::Pending),
        ]);
        assert!(MessageOrder.check(&ok).is_ok());

        let bad = session(vec![
            entry(MessageId::Local(1), 5, Delivery::Pending),
            entry(MessageId::Server("a".into()), 10, Delivery::Sent),
        ]);
        assert!(MessageOrder.check(&bad).is_err());
    }

    #[test]
    fn duplicates_are_flagged() {
        let state = session(vec![
            entry(MessageId::Server("a".into()), 10, Delivery::Sent),
            entry(MessageId::Server("a".into()), 10, Delivery::Sent),
        ]);
        assert!(UniqueMessageIds.check(&state).is_err());
    }

    #[test]
    fn stream_must_follow_active_room() {
        let mut snapshot = SessionSnapshot::new(UserId::new("alice").unwrap()).with_room(room(), SubscriptionPhase::Live);
        snapshot.subscribed_room = Some(RoomId::public("random").unwrap());
        assert!(ActiveRoomSubscribed.check(&SystemSnapshot::single(snapshot)).is_err());
    }

    #[test]
    fn extra_open_streams_are_flagged_only_when_settled() {
        let mut snapshot = SessionSnapshot::new(UserId::new("alice").unwrap()).with_room(room(), SubscriptionPhase::Live);
        snapshot.open_streams = 2;
        snapshot.quiescent = false;
        assert!(SingleLiveSubscription.check(&SystemSnapshot::single(snapshot.clone())).is_ok());

        snapshot.quiescent = true;
        assert!(SingleLiveSubscription.check(&SystemSnapshot::single(snapshot)).is_err());
    }
}
