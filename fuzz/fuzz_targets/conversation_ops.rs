//! Fuzz target for conversation operation sequences
//!
//! # Strategy
//!
//! - Two sessions on one simulated backend
//! - Arbitrary room switches, sends, edits, reactions, typing and paging
//! - Arbitrary delivery: in order, reversed, or held back
//! - Injected backend failures, dropped streams and garbage stream bytes
//!
//! # Invariants
//!
//! - Every standard conversation invariant holds after every step
//! - NEVER panic on any operation sequence

#![no_main]

use std::{sync::Arc, time::Duration};

use arbitrary::Arbitrary;
use huddle_client::{ConversationEvent, UserProfile};
use huddle_harness::{Fault, InvariantRegistry, SimBackend, SimEnv, SimSession, system_snapshot};
use huddle_proto::{Room, RoomId, UserId};
use libfuzzer_sys::fuzz_target;

const ROOMS: [&str; 3] = ["general", "random", "lobby"];

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    ops: Vec<Op>,
}

#[derive(Debug, Arbitrary)]
enum Op {
    Switch { who: bool, room: u8 },
    OpenDirect { who: bool },
    Send { who: bool, text: String },
    Edit { who: bool, index: u8, text: String },
    Delete { who: bool, index: u8 },
    React { who: bool, index: u8 },
    Retry { who: bool, local_id: u64 },
    Discard { who: bool, local_id: u64 },
    Type { who: bool },
    LoadOlder { who: bool },
    RetryHistory { who: bool },
    DeliverNext { who: bool },
    DeliverReversed { who: bool },
    Settle { who: bool },
    Advance { who: bool, millis: u16 },
    Fail { fault: u8, count: u8 },
    DropStreams { room: u8 },
    Garbage { room: u8, bytes: Vec<u8> },
}

fn room_id(index: u8) -> RoomId {
    RoomId::public(ROOMS[index as usize % ROOMS.len()]).expect("constant room ids are valid")
}

fn fault(index: u8) -> Fault {
    match index % 5 {
        0 => Fault::Fetch,
        1 => Fault::Insert,
        2 => Fault::Write,
        3 => Fault::Subscribe,
        _ => Fault::Track,
    }
}

fn server_id(session: &SimSession, index: u8) -> Option<String> {
    let messages = session.conversation().messages();
    if messages.is_empty() {
        return None;
    }
    messages[index as usize % messages.len()].message.id.server().map(ToString::to_string)
}

fn apply(op: Op, sessions: &mut [SimSession; 2], backend: &SimBackend) {
    let pick = |who: bool| usize::from(who);
    // Rejections are part of the surface under test; they must not panic
    match op {
        Op::Switch { who, room } => {
            let id = room_id(room);
            let name = id.to_string();
            sessions[pick(who)].switch_room(Room::public(id, name));
        },
        Op::OpenDirect { who } => {
            let other = sessions[1 - pick(who)].user_id().clone();
            sessions[pick(who)].open_direct(&other, other.as_str());
        },
        Op::Send { who, text } => {
            let _ = sessions[pick(who)].send(&text);
        },
        Op::Edit { who, index, text } => {
            let session = &mut sessions[pick(who)];
            if let Some(id) = server_id(session, index) {
                let _ = session.handle(ConversationEvent::Edit { id, text });
            }
        },
        Op::Delete { who, index } => {
            let session = &mut sessions[pick(who)];
            if let Some(id) = server_id(session, index) {
                let _ = session.handle(ConversationEvent::Delete { id });
            }
        },
        Op::React { who, index } => {
            let session = &mut sessions[pick(who)];
            if let Some(id) = server_id(session, index) {
                let _ = session.handle(ConversationEvent::React { id, emoji: "🔥".into() });
            }
        },
        Op::Retry { who, local_id } => {
            let _ = sessions[pick(who)].handle(ConversationEvent::RetrySend { local_id: local_id % 8 });
        },
        Op::Discard { who, local_id } => {
            let _ = sessions[pick(who)].handle(ConversationEvent::DiscardFailed { local_id: local_id % 8 });
        },
        Op::Type { who } => {
            let _ = sessions[pick(who)].type_key();
        },
        Op::LoadOlder { who } => {
            let _ = sessions[pick(who)].handle(ConversationEvent::LoadOlder);
        },
        Op::RetryHistory { who } => {
            let _ = sessions[pick(who)].handle(ConversationEvent::RetryHistory);
        },
        Op::DeliverNext { who } => {
            sessions[pick(who)].deliver_next();
        },
        Op::DeliverReversed { who } => {
            let session = &mut sessions[pick(who)];
            for completion in session.take_pending().into_iter().rev() {
                session.deliver(completion);
            }
        },
        Op::Settle { who } => sessions[pick(who)].settle(),
        Op::Advance { who, millis } => sessions[pick(who)].advance(Duration::from_millis(u64::from(millis))),
        Op::Fail { fault: index, count } => backend.fail_next(fault(index), u32::from(count % 4)),
        Op::DropStreams { room } => backend.drop_streams(&room_id(room)),
        Op::Garbage { room, bytes } => backend.push_raw(&room_id(room), &bytes),
    }
}

fuzz_target!(|scenario: Scenario| {
    let env = SimEnv::with_seed(scenario.seed);
    let backend = Arc::new(SimBackend::new(env.clone()));
    let mut sessions = ["alice", "bob"].map(|name| {
        let profile = UserProfile::new(UserId::new(name).expect("constant user ids are valid"), name);
        let mut session = SimSession::new(env.clone(), Arc::clone(&backend), profile);
        session.start();
        session
    });

    let registry = InvariantRegistry::standard();
    for op in scenario.ops.into_iter().take(256) {
        apply(op, &mut sessions, &backend);
        registry.assert_all(&system_snapshot(sessions.iter_mut()), "conversation_ops");
    }
});
