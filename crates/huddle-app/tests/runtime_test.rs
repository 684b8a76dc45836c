//! Runtime integration tests against an in-process backend double.
//!
//! Every test ends with an oracle check on the published view, the signals
//! or the calls the backend observed.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use huddle_app::{
    Collaborators, Command, EventSink, LiveStream, Persistence, PresenceChannel, PresenceSink,
    PresenceWatchHandle, Runtime, RuntimeConfig, RuntimeHandle, Signal, SystemEnv,
};
use huddle_client::{ConversationError, ConversationView, Notice, UserProfile};
use huddle_core::{CollaboratorError, Cursor, Delivery, SubscriptionHandle, SubscriptionPhase};
use huddle_proto::{
    Message, MessageDraft, MessageId, MessagePatch, PresenceScope, PresenceState, Room, RoomId,
    StreamEvent, UserId,
};

#[derive(Default)]
struct State {
    messages: Vec<Message>,
    next_id: u64,
    streams: HashMap<SubscriptionHandle, (RoomId, EventSink)>,
    unsubscribed: Vec<SubscriptionHandle>,
    tracked: Vec<PresenceState>,
    peers: HashMap<PresenceScope, Vec<PresenceState>>,
    watches: u64,
    unwatched: Vec<PresenceWatchHandle>,
    fail_inserts: bool,
    // Delay before subscribe and on_sync return their handle
    ack_delay: Duration,
}

#[derive(Clone, Default)]
struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    fn with_history(messages: Vec<Message>) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().messages = messages;
        backend
    }

    fn fail_inserts(&self, fail: bool) {
        self.state.lock().unwrap().fail_inserts = fail;
    }

    fn delay_acks(&self, delay: Duration) {
        self.state.lock().unwrap().ack_delay = delay;
    }

    fn unsubscribed(&self) -> Vec<SubscriptionHandle> {
        self.state.lock().unwrap().unsubscribed.clone()
    }
}

impl Persistence for FakeBackend {
    fn fetch_messages(
        &self,
        room_id: RoomId,
        before: Option<Cursor>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, CollaboratorError>> + Send {
        let state = self.state.lock().unwrap();
        let mut page: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter(|m| {
                before.as_ref().is_none_or(|cursor| {
                    (m.created_at, m.id.to_string()) < (cursor.created_at, cursor.id.clone())
                })
            })
            .cloned()
            .collect();
        page.sort_by_key(|m| (m.created_at, m.id.to_string()));
        let skip = page.len().saturating_sub(limit);
        let page = page.split_off(skip);
        async move { Ok(page) }
    }

    fn insert_message(
        &self,
        draft: MessageDraft,
    ) -> impl Future<Output = Result<Message, CollaboratorError>> + Send {
        let mut state = self.state.lock().unwrap();
        let result = if state.fail_inserts {
            Err(CollaboratorError::Network("offline".into()))
        } else {
            state.next_id += 1;
            let message = Message {
                id: MessageId::Server(format!("srv-{}", state.next_id)),
                room_id: draft.room_id,
                sender_id: draft.sender_id,
                text: draft.text,
                created_at: 5_000 + state.next_id,
                attachment: draft.attachment,
                reactions: Vec::new(),
                edited_at: None,
                deleted_at: None,
            };
            state.messages.push(message.clone());
            for (room_id, sink) in state.streams.values() {
                if *room_id == message.room_id {
                    sink.deliver(StreamEvent::Insert(message.clone()));
                }
            }
            Ok(message)
        };
        async move { result }
    }

    fn update_message(
        &self,
        id: String,
        patch: MessagePatch,
    ) -> impl Future<Output = Result<Message, CollaboratorError>> + Send {
        let mut state = self.state.lock().unwrap();
        let result = state
            .messages
            .iter_mut()
            .find(|m| m.id.server() == Some(id.as_str()))
            .map(|m| {
                m.text = patch.text;
                m.edited_at = Some(9_000);
                m.clone()
            })
            .ok_or_else(|| CollaboratorError::NotFound(id.clone()));
        async move { result }
    }

    fn delete_message(&self, _id: String) -> impl Future<Output = Result<(), CollaboratorError>> + Send {
        async { Ok(()) }
    }

    fn toggle_reaction(
        &self,
        _id: String,
        _emoji: String,
        _user_id: UserId,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send {
        async { Ok(()) }
    }
}

impl LiveStream for FakeBackend {
    fn subscribe(
        &self,
        room_id: RoomId,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionHandle, CollaboratorError>> + Send {
        let mut state = self.state.lock().unwrap();
        let handle = SubscriptionHandle(state.streams.len() as u64 + state.unsubscribed.len() as u64 + 1);
        state.streams.insert(handle, (room_id, sink));
        let delay = state.ack_delay;
        async move {
            tokio::time::sleep(delay).await;
            Ok(handle)
        }
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> impl Future<Output = ()> + Send {
        let mut state = self.state.lock().unwrap();
        state.streams.remove(&handle);
        state.unsubscribed.push(handle);
        async {}
    }
}

impl PresenceChannel for FakeBackend {
    fn track(
        &self,
        _scope: PresenceScope,
        state: PresenceState,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send {
        self.state.lock().unwrap().tracked.push(state);
        async { Ok(()) }
    }

    fn on_sync(
        &self,
        scope: PresenceScope,
        sink: PresenceSink,
    ) -> impl Future<Output = Result<PresenceWatchHandle, CollaboratorError>> + Send {
        let mut state = self.state.lock().unwrap();
        state.watches += 1;
        let handle = PresenceWatchHandle(state.watches);
        sink.sync(state.peers.get(&scope).cloned().unwrap_or_default());
        let delay = state.ack_delay;
        async move {
            tokio::time::sleep(delay).await;
            Ok(handle)
        }
    }

    fn unwatch(&self, handle: PresenceWatchHandle) -> impl Future<Output = ()> + Send {
        self.state.lock().unwrap().unwatched.push(handle);
        async {}
    }
}

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn general() -> Room {
    Room::public(RoomId::public("general").unwrap(), "General")
}

fn message(id: &str, sender: &str, created_at: u64) -> Message {
    Message {
        id: MessageId::Server(id.into()),
        room_id: RoomId::public("general").unwrap(),
        sender_id: user(sender),
        text: id.into(),
        created_at,
        attachment: None,
        reactions: Vec::new(),
        edited_at: None,
        deleted_at: None,
    }
}

fn start(backend: &FakeBackend) -> (tokio::task::JoinHandle<()>, RuntimeHandle) {
    let profile = UserProfile::new(user("alice"), "Alice");
    let collaborators = Collaborators::shared(Arc::new(backend.clone()));
    let (runtime, handle) = Runtime::new(SystemEnv::new(), &profile, collaborators, RuntimeConfig::default());
    (tokio::spawn(runtime.run()), handle)
}

async fn wait_for(
    handle: &mut RuntimeHandle,
    predicate: impl FnMut(&ConversationView) -> bool,
) -> ConversationView {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for(predicate))
        .await
        .expect("view never matched")
        .unwrap()
}

fn is_live(view: &ConversationView) -> bool {
    view.subscription == SubscriptionPhase::Live
}

#[tokio::test]
async fn switching_room_loads_history_and_goes_live() {
    let backend = FakeBackend::with_history(vec![message("m1", "bob", 10), message("m2", "bob", 20)]);
    let (task, mut handle) = start(&backend);

    handle.send(Command::SwitchRoom(general())).await.unwrap();
    let view = wait_for(&mut handle, |v| is_live(v) && v.messages.len() == 2).await;

    assert_eq!(view.room.as_ref().map(|r| r.id.as_str()), Some("general"));
    let ids: Vec<_> = view.messages.iter().map(|e| e.message.id.to_string()).collect();
    assert_eq!(ids, ["m1", "m2"]);

    handle.send(Command::Quit).await.unwrap();
    task.await.unwrap();
    assert_eq!(backend.unsubscribed().len(), 1);
}

#[tokio::test]
async fn sent_message_and_its_stream_echo_render_once() {
    let backend = FakeBackend::default();
    let (task, mut handle) = start(&backend);

    handle.send(Command::SwitchRoom(general())).await.unwrap();
    wait_for(&mut handle, is_live).await;

    handle.send(Command::Send { text: "hello".into(), attachment: None }).await.unwrap();
    let view = wait_for(&mut handle, |v| v.messages.iter().any(|e| e.delivery == Delivery::Sent)).await;

    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].message.text, "hello");
    assert!(matches!(&view.messages[0].message.id, MessageId::Server(id) if id.starts_with("srv-")));

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn commands_without_a_room_are_rejected() {
    let backend = FakeBackend::default();
    let (task, mut handle) = start(&backend);

    handle.send(Command::Send { text: "hello".into(), attachment: None }).await.unwrap();
    let signal = tokio::time::timeout(Duration::from_secs(5), handle.next_signal()).await.unwrap();

    assert_eq!(signal, Some(Signal::Rejected(ConversationError::NoActiveRoom)));
    handle.send(Command::Quit).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn failed_send_is_surfaced_and_retry_delivers_it() {
    let backend = FakeBackend::default();
    backend.fail_inserts(true);
    let (task, mut handle) = start(&backend);

    handle.send(Command::SwitchRoom(general())).await.unwrap();
    wait_for(&mut handle, is_live).await;
    handle.send(Command::Send { text: "hello".into(), attachment: None }).await.unwrap();

    let view = wait_for(&mut handle, |v| v.messages.iter().any(|e| e.delivery == Delivery::Failed)).await;
    let local_id = view.messages[0].message.id.local().unwrap();
    let signal = tokio::time::timeout(Duration::from_secs(5), handle.next_signal()).await.unwrap();
    assert!(matches!(signal, Some(Signal::Notice(Notice::SendFailed { .. }))));

    backend.fail_inserts(false);
    handle.send(Command::RetrySend { local_id }).await.unwrap();
    let view = wait_for(&mut handle, |v| v.messages.iter().all(|e| e.delivery == Delivery::Sent)).await;
    assert_eq!(view.messages.len(), 1);

    handle.send(Command::Quit).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn online_peers_appear_in_the_view() {
    let backend = FakeBackend::default();
    backend
        .state
        .lock()
        .unwrap()
        .peers
        .insert(PresenceScope::Online, vec![PresenceState::online(user("bob"), 1_000)]);
    let (task, mut handle) = start(&backend);

    let view = wait_for(&mut handle, |v| !v.online.is_empty()).await;
    assert!(view.is_online(&user("bob")));

    handle.send(Command::Quit).await.unwrap();
    task.await.unwrap();

    let tracked = backend.state.lock().unwrap().tracked.clone();
    assert!(tracked.iter().any(|s| s.user_id == user("alice") && s.room_id.is_none()));
}

#[tokio::test]
async fn edit_applies_after_ack() {
    let backend = FakeBackend::with_history(vec![message("m1", "alice", 10)]);
    let (task, mut handle) = start(&backend);

    handle.send(Command::SwitchRoom(general())).await.unwrap();
    wait_for(&mut handle, |v| is_live(v) && v.messages.len() == 1).await;

    handle.send(Command::Edit { id: "m1".into(), text: "fixed".into() }).await.unwrap();
    let view = wait_for(&mut handle, |v| v.messages.first().is_some_and(|e| e.message.text == "fixed")).await;
    assert_eq!(view.messages[0].message.edited_at, Some(9_000));

    handle.send(Command::Quit).await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn quitting_while_subscribing_releases_late_handles() {
    let backend = FakeBackend::default();
    backend.delay_acks(Duration::from_millis(50));
    let (task, handle) = start(&backend);

    handle.send(Command::SwitchRoom(general())).await.unwrap();
    handle.send(Command::Quit).await.unwrap();
    task.await.unwrap();

    let state = backend.state.lock().unwrap();
    assert!(state.streams.is_empty(), "stream left open after shutdown");
    assert_eq!(state.unsubscribed.len(), 1);
    // Online and typing watches
    assert_eq!(state.watches, 2);
    assert_eq!(state.unwatched.len(), 2);
}
