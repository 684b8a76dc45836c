//! In-memory backend for simulation.
//!
//! `SimBackend` plays all three collaborator roles at once: a message table,
//! a per-room change stream and a presence hub. Every mutation is broadcast to
//! the open streams of its room as CBOR-encoded events, the way a hosted
//! realtime database would push row changes.
//!
//! Calls complete synchronously. The async trait methods wrap the synchronous
//! ones in ready futures, so the same backend serves the [`crate::SimSession`]
//! driver and the tokio [`huddle_app::Runtime`].

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    future::{Future, ready},
    sync::{Mutex, MutexGuard, PoisonError},
};

use huddle_app::{EventSink, LiveStream, Persistence, PresenceChannel, PresenceSink, PresenceWatchHandle};
use huddle_core::{CollaboratorError, Cursor, Environment, SubscriptionHandle};
use huddle_proto::{
    Message, MessageDeletion, MessageDraft, MessageEdit, MessageId, MessagePatch, PresenceScope,
    PresenceState, ReactionChange, RoomId, StreamEvent, UserId,
};

use crate::sim_env::SimEnv;

/// Backend operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `fetch_messages`
    Fetch,
    /// `insert_message`
    Insert,
    /// `update_message`, `delete_message` and `toggle_reaction`
    Write,
    /// `subscribe`
    Subscribe,
    /// `track`
    Track,
}

struct Stream {
    room_id: RoomId,
    sink: EventSink,
}

#[derive(Default)]
struct State {
    messages: Vec<Message>,
    next_message: u64,
    last_created_at: u64,

    streams: BTreeMap<SubscriptionHandle, Stream>,
    next_stream: u64,

    presence: HashMap<PresenceScope, BTreeMap<UserId, PresenceState>>,
    watchers: BTreeMap<PresenceWatchHandle, PresenceSink>,
    next_watch: u64,

    offline: bool,
    faults: HashMap<Fault, u32>,
}

impl State {
    /// Consume one injected failure for `fault`, if any.
    fn check(&mut self, fault: Fault) -> Result<(), CollaboratorError> {
        if self.offline {
            return Err(CollaboratorError::Network("backend offline".into()));
        }
        match self.faults.get_mut(&fault) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(CollaboratorError::Network(format!("injected {fault:?} failure")))
            },
            _ => Ok(()),
        }
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Message, CollaboratorError> {
        self.messages
            .iter_mut()
            .find(|m| m.id.server() == Some(id))
            .ok_or_else(|| CollaboratorError::NotFound(id.to_string()))
    }

    /// Push `event` to every open stream of `room_id`.
    fn broadcast(&mut self, room_id: &RoomId, event: &StreamEvent) {
        let encoded = match event.encode() {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                tracing::warn!(%error, "event not encodable, delivering decoded");
                None
            },
        };

        self.streams.retain(|handle, stream| {
            if stream.room_id != *room_id {
                return true;
            }
            let delivered = match &encoded {
                Some(bytes) => stream.sink.deliver_bytes(bytes),
                None => stream.sink.deliver(event.clone()),
            };
            if !delivered {
                tracing::debug!(?handle, "pruning stream of stopped session");
            }
            delivered
        });
    }

    /// Push the merged snapshot of `scope` to its watchers.
    fn sync(&mut self, scope: &PresenceScope) {
        let snapshot: Vec<PresenceState> =
            self.presence.get(scope).map(|peers| peers.values().cloned().collect()).unwrap_or_default();
        self.watchers.retain(|_, sink| sink.scope() != scope || sink.sync(snapshot.clone()));
    }
}

/// In-memory persistence, live stream and presence hub.
pub struct SimBackend {
    env: SimEnv,
    state: Mutex<State>,
}

impl SimBackend {
    /// Empty backend stamping rows with `env`'s wall clock.
    pub fn new(env: SimEnv) -> Self {
        Self { env, state: Mutex::new(State::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `messages` as existing rows without broadcasting.
    pub fn seed(&self, messages: impl IntoIterator<Item = Message>) {
        let mut state = self.lock();
        for message in messages {
            state.last_created_at = state.last_created_at.max(message.created_at);
            state.messages.push(message);
        }
    }

    /// Every row of `room_id`, ascending by `(created_at, id)`.
    pub fn messages(&self, room_id: &RoomId) -> Vec<Message> {
        let state = self.lock();
        let mut rows: Vec<Message> = state.messages.iter().filter(|m| m.room_id == *room_id).cloned().collect();
        rows.sort_by(|a, b| (a.created_at, a.id.to_string()).cmp(&(b.created_at, b.id.to_string())));
        rows
    }

    /// Make every call fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Make the next `count` calls of `fault` fail.
    pub fn fail_next(&self, fault: Fault, count: u32) {
        *self.lock().faults.entry(fault).or_default() += count;
    }

    /// Go back online and drop every pending injected failure.
    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.offline = false;
        state.faults.clear();
    }

    /// Number of open streams, across all sessions.
    pub fn open_streams(&self) -> usize {
        self.lock().streams.len()
    }

    /// Number of open streams bound to `room_id`.
    pub fn open_streams_in(&self, room_id: &RoomId) -> usize {
        self.lock().streams.values().filter(|s| s.room_id == *room_id).count()
    }

    /// Number of presence watches, across all sessions.
    pub fn watch_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Presence state of `user_id` on `scope`.
    pub fn presence_of(&self, scope: &PresenceScope, user_id: &UserId) -> Option<PresenceState> {
        self.lock().presence.get(scope).and_then(|peers| peers.get(user_id)).cloned()
    }

    /// Close every stream of `room_id` as if the connection dropped.
    pub fn drop_streams(&self, room_id: &RoomId) {
        let mut state = self.lock();
        let dropped: Vec<SubscriptionHandle> =
            state.streams.iter().filter(|(_, s)| s.room_id == *room_id).map(|(h, _)| *h).collect();
        for handle in dropped {
            if let Some(stream) = state.streams.remove(&handle) {
                tracing::info!(room = %room_id, ?handle, "dropping stream");
                stream.sink.dropped();
            }
        }
    }

    /// Remove `user_id` from every presence scope, as when their connection
    /// goes away without a goodbye.
    pub fn disconnect(&self, user_id: &UserId) {
        let mut state = self.lock();
        let scopes: Vec<PresenceScope> = state
            .presence
            .iter_mut()
            .filter_map(|(scope, peers)| peers.remove(user_id).map(|_| scope.clone()))
            .collect();
        for scope in scopes {
            state.sync(&scope);
        }
    }

    /// Deliver raw bytes on every stream of `room_id`.
    pub fn push_raw(&self, room_id: &RoomId, bytes: &[u8]) {
        let state = self.lock();
        for stream in state.streams.values().filter(|s| s.room_id == *room_id) {
            stream.sink.deliver_bytes(bytes);
        }
    }

    /// Fetch a page of `room_id`.
    pub fn fetch(
        &self,
        room_id: &RoomId,
        before: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<Message>, CollaboratorError> {
        self.lock().check(Fault::Fetch)?;
        let mut rows = self.messages(room_id);
        if let Some(cursor) = before {
            rows.retain(|m| (m.created_at, m.id.to_string()) < (cursor.created_at, cursor.id.clone()));
        }
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.split_off(skip))
    }

    /// Persist a draft and broadcast it.
    pub fn insert(&self, draft: MessageDraft) -> Result<Message, CollaboratorError> {
        let mut state = self.lock();
        state.check(Fault::Insert)?;

        state.next_message += 1;
        let created_at = self.env.unix_millis().max(state.last_created_at + 1);
        state.last_created_at = created_at;
        let message = Message {
            id: MessageId::Server(format!("msg-{:06}", state.next_message)),
            room_id: draft.room_id,
            sender_id: draft.sender_id,
            text: draft.text,
            created_at,
            attachment: draft.attachment,
            reactions: Vec::new(),
            edited_at: None,
            deleted_at: None,
        };
        state.messages.push(message.clone());
        state.broadcast(&message.room_id, &StreamEvent::Insert(message.clone()));
        Ok(message)
    }

    /// Replace a message body and broadcast the edit.
    pub fn update(&self, id: &str, patch: MessagePatch) -> Result<Message, CollaboratorError> {
        let edited_at = self.env.unix_millis();
        let mut state = self.lock();
        state.check(Fault::Write)?;

        let message = state.find_mut(id)?;
        if message.is_deleted() {
            return Err(CollaboratorError::Rejected("message is deleted".into()));
        }
        message.text = patch.text;
        message.edited_at = Some(edited_at);
        let message = message.clone();

        let edit = MessageEdit { id: id.to_string(), text: message.text.clone(), edited_at };
        state.broadcast(&message.room_id, &StreamEvent::Update(edit));
        Ok(message)
    }

    /// Soft-delete a message and broadcast the deletion.
    pub fn delete(&self, id: &str) -> Result<(), CollaboratorError> {
        let deleted_at = self.env.unix_millis();
        let mut state = self.lock();
        state.check(Fault::Write)?;

        let message = state.find_mut(id)?;
        message.deleted_at = Some(deleted_at);
        let room_id = message.room_id.clone();

        state.broadcast(&room_id, &StreamEvent::Delete(MessageDeletion { id: id.to_string(), deleted_at }));
        Ok(())
    }

    /// Toggle a reaction and broadcast the new reaction set.
    pub fn toggle(&self, id: &str, emoji: &str, user_id: &UserId) -> Result<(), CollaboratorError> {
        let mut state = self.lock();
        state.check(Fault::Write)?;

        let message = state.find_mut(id)?;
        message.toggle_reaction(emoji, user_id);
        let change = ReactionChange { id: id.to_string(), reactions: message.reactions.clone() };
        let room_id = message.room_id.clone();

        state.broadcast(&room_id, &StreamEvent::Reaction(change));
        Ok(())
    }

    /// Open a stream of `room_id` delivering into `sink`.
    pub fn open_stream(&self, room_id: RoomId, sink: EventSink) -> Result<SubscriptionHandle, CollaboratorError> {
        let mut state = self.lock();
        state.check(Fault::Subscribe)?;

        state.next_stream += 1;
        let handle = SubscriptionHandle(state.next_stream);
        tracing::debug!(room = %room_id, ?handle, epoch = %sink.epoch(), "stream opened");
        state.streams.insert(handle, Stream { room_id, sink });
        Ok(handle)
    }

    /// Close a stream. Unknown handles are ignored.
    pub fn close_stream(&self, handle: SubscriptionHandle) {
        if self.lock().streams.remove(&handle).is_some() {
            tracing::debug!(?handle, "stream closed");
        }
    }

    /// Publish `state` on `scope` and sync its watchers.
    pub fn publish(&self, scope: PresenceScope, presence: PresenceState) -> Result<(), CollaboratorError> {
        let mut state = self.lock();
        state.check(Fault::Track)?;

        state.presence.entry(scope.clone()).or_default().insert(presence.user_id.clone(), presence);
        state.sync(&scope);
        Ok(())
    }

    /// Register a watch and deliver the current snapshot right away.
    pub fn add_watch(&self, scope: PresenceScope, sink: PresenceSink) -> PresenceWatchHandle {
        let mut state = self.lock();
        state.next_watch += 1;
        let handle = PresenceWatchHandle(state.next_watch);

        let snapshot: Vec<PresenceState> =
            state.presence.get(&scope).map(|peers| peers.values().cloned().collect()).unwrap_or_default();
        sink.sync(snapshot);
        state.watchers.insert(handle, sink);
        handle
    }

    /// Remove a watch. Unknown handles are ignored.
    pub fn remove_watch(&self, handle: PresenceWatchHandle) {
        self.lock().watchers.remove(&handle);
    }
}

impl Persistence for SimBackend {
    fn fetch_messages(
        &self,
        room_id: RoomId,
        before: Option<Cursor>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, CollaboratorError>> + Send {
        ready(self.fetch(&room_id, before.as_ref(), limit))
    }

    fn insert_message(&self, draft: MessageDraft) -> impl Future<Output = Result<Message, CollaboratorError>> + Send {
        ready(self.insert(draft))
    }

    fn update_message(
        &self,
        id: String,
        patch: MessagePatch,
    ) -> impl Future<Output = Result<Message, CollaboratorError>> + Send {
        ready(self.update(&id, patch))
    }

    fn delete_message(&self, id: String) -> impl Future<Output = Result<(), CollaboratorError>> + Send {
        ready(self.delete(&id))
    }

    fn toggle_reaction(
        &self,
        id: String,
        emoji: String,
        user_id: UserId,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send {
        ready(self.toggle(&id, &emoji, &user_id))
    }
}

impl LiveStream for SimBackend {
    fn subscribe(
        &self,
        room_id: RoomId,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionHandle, CollaboratorError>> + Send {
        ready(self.open_stream(room_id, sink))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> impl Future<Output = ()> + Send {
        self.close_stream(handle);
        ready(())
    }
}

impl PresenceChannel for SimBackend {
    fn track(
        &self,
        scope: PresenceScope,
        state: PresenceState,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send {
        ready(self.publish(scope, state))
    }

    fn on_sync(
        &self,
        scope: PresenceScope,
        sink: PresenceSink,
    ) -> impl Future<Output = Result<PresenceWatchHandle, CollaboratorError>> + Send {
        ready(Ok(self.add_watch(scope, sink)))
    }

    fn unwatch(&self, handle: PresenceWatchHandle) -> impl Future<Output = ()> + Send {
        self.remove_watch(handle);
        ready(())
    }
}

#[cfg(test)]
mod tests {
    use huddle_core::Epoch;
    use tokio::sync::mpsc;

    use super::*;

    fn room() -> RoomId {
        RoomId::public("general").unwrap()
    }

    fn draft(text: &str) -> MessageDraft {
        MessageDraft {
            room_id: room(),
            sender_id: UserId::new("alice").unwrap(),
            text: text.into(),
            attachment: None,
        }
    }

    #[test]
    fn pages_walk_backwards_from_cursor() {
        let backend = SimBackend::new(SimEnv::default());
        for i in 0..5 {
            backend.insert(draft(&format!("m{i}"))).unwrap();
        }

        let newest = backend.fetch(&room(), None, 2).unwrap();
        assert_eq!(newest.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), ["m3", "m4"]);

        let oldest = &newest[0];
        let cursor = Cursor { created_at: oldest.created_at, id: oldest.id.to_string() };
        let older = backend.fetch(&room(), Some(&cursor), 2).unwrap();
        assert_eq!(older.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(), ["m1", "m2"]);
    }

    #[test]
    fn inserts_are_broadcast_to_room_streams() {
        let backend = SimBackend::new(SimEnv::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        backend.open_stream(room(), EventSink::new(Epoch::from(1), tx)).unwrap();

        let message = backend.insert(draft("hi")).unwrap();
        match rx.try_recv() {
            Ok(huddle_app::Completion::Stream { event: StreamEvent::Insert(pushed), .. }) => {
                assert_eq!(pushed, message);
            },
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn injected_faults_are_consumed() {
        let backend = SimBackend::new(SimEnv::default());
        backend.fail_next(Fault::Insert, 1);

        assert!(backend.insert(draft("a")).is_err());
        assert!(backend.insert(draft("b")).is_ok());

        backend.set_offline(true);
        assert!(matches!(backend.fetch(&room(), None, 10), Err(CollaboratorError::Network(_))));
    }

    #[test]
    fn deleted_messages_cannot_be_edited() {
        let backend = SimBackend::new(SimEnv::default());
        let message = backend.insert(draft("a")).unwrap();
        let id = message.id.to_string();

        backend.delete(&id).unwrap();
        let result = backend.update(&id, MessagePatch { text: "b".into() });
        assert!(matches!(result, Err(CollaboratorError::Rejected(_))));
    }

    #[test]
    fn writes_to_unknown_ids_report_the_id() {
        let backend = SimBackend::new(SimEnv::default());

        let result = backend.update("msg-404", MessagePatch { text: "b".into() });
        assert!(matches!(result, Err(CollaboratorError::NotFound(id)) if id == "msg-404"));
        assert!(matches!(backend.delete("msg-404"), Err(CollaboratorError::NotFound(_))));
        let user = UserId::new("alice").unwrap();
        assert!(matches!(backend.toggle("msg-404", "👍", &user), Err(CollaboratorError::NotFound(_))));
    }
}
