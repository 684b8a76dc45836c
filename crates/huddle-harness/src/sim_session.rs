//! Synchronous session driver.
//!
//! `SimSession` drives one [`Conversation`] against a shared [`SimBackend`]
//! without an async runtime. Backend calls run immediately when their action
//! is executed, but their results (and every stream or presence push) are
//! queued instead of fed back right away. Tests decide when completions are
//! delivered and in which order, which is how reordering races are
//! reproduced deterministically.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::Arc,
};

use huddle_app::{Completion, EventSink, PresenceSink, PresenceWatchHandle};
use huddle_client::{
    Conversation, ConversationAction, ConversationConfig, ConversationError, ConversationEvent,
    ConversationView, Environment, Notice, UserProfile,
};
use huddle_core::{Epoch, SubscriptionHandle};
use huddle_proto::{Attachment, PresenceScope, Room, RoomId, UserId};
use tokio::sync::mpsc;

use crate::{
    invariants::{SessionSnapshot, SystemSnapshot},
    sim_backend::SimBackend,
    sim_env::{SimEnv, SimInstant},
};

/// Upper bound on completions delivered by one [`SimSession::settle`].
const SETTLE_LIMIT: usize = 10_000;

/// One signed-in user driven step by step.
pub struct SimSession {
    env: SimEnv,
    backend: Arc<SimBackend>,
    conversation: Conversation<SimEnv>,

    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    /// Results and pushes not yet fed into the conversation
    queue: VecDeque<Completion>,

    watches: HashMap<PresenceScope, PresenceWatchHandle>,
    open_streams: BTreeSet<SubscriptionHandle>,

    notices: Vec<Notice>,
    prepends: Vec<(RoomId, usize)>,
    epochs: Vec<Epoch>,
}

impl SimSession {
    /// Session for `profile` with default configuration.
    pub fn new(env: SimEnv, backend: Arc<SimBackend>, profile: UserProfile) -> Self {
        Self::with_config(env, backend, profile, ConversationConfig::default())
    }

    /// Session with explicit configuration.
    pub fn with_config(
        env: SimEnv,
        backend: Arc<SimBackend>,
        profile: UserProfile,
        config: ConversationConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let conversation = Conversation::new(env.clone(), profile, config);
        let epochs = vec![conversation.epoch()];
        Self {
            env,
            backend,
            conversation,
            tx,
            rx,
            queue: VecDeque::new(),
            watches: HashMap::new(),
            open_streams: BTreeSet::new(),
            notices: Vec::new(),
            prepends: Vec::new(),
            epochs,
        }
    }

    /// Signed-in user.
    pub fn user_id(&self) -> &UserId {
        &self.conversation.profile().user_id
    }

    /// Underlying state machine.
    pub fn conversation(&self) -> &Conversation<SimEnv> {
        &self.conversation
    }

    /// Render snapshot.
    pub fn view(&self) -> ConversationView {
        self.conversation.view()
    }

    /// Server ids (or `local-N`) of the active room, in display order.
    pub fn message_ids(&self) -> Vec<String> {
        self.conversation.messages().iter().map(|e| e.message.id.to_string()).collect()
    }

    /// Feed an event and execute the resulting actions.
    pub fn handle(&mut self, event: ConversationEvent<SimInstant>) -> Result<(), ConversationError> {
        let actions = self.conversation.handle(event)?;
        self.record_epoch();
        for action in actions {
            self.execute(action);
        }
        Ok(())
    }

    /// Announce online and watch the online set.
    pub fn start(&mut self) {
        self.dispatch(ConversationEvent::Start);
    }

    /// Release the stream and presence.
    pub fn shutdown(&mut self) {
        self.dispatch(ConversationEvent::Shutdown);
    }

    /// Make `room` active.
    pub fn switch_room(&mut self, room: Room) {
        self.dispatch(ConversationEvent::SwitchRoom(room));
    }

    /// Open the direct-message room with `user_id`.
    pub fn open_direct(&mut self, user_id: &UserId, display_name: &str) {
        self.dispatch(ConversationEvent::OpenDirect {
            user_id: user_id.clone(),
            display_name: display_name.to_string(),
        });
    }

    /// Send a text message.
    pub fn send(&mut self, text: &str) -> Result<(), ConversationError> {
        self.handle(ConversationEvent::Send { text: text.to_string(), attachment: None })
    }

    /// Send a message with an attachment.
    pub fn send_attachment(&mut self, text: &str, attachment: Attachment) -> Result<(), ConversationError> {
        self.handle(ConversationEvent::Send { text: text.to_string(), attachment: Some(attachment) })
    }

    /// Keystroke in the composer.
    pub fn type_key(&mut self) -> Result<(), ConversationError> {
        self.handle(ConversationEvent::NotifyTyping)
    }

    /// Move the virtual clock and tick.
    pub fn advance(&mut self, by: std::time::Duration) {
        self.env.advance(by);
        self.tick();
    }

    /// Tick at the current virtual time.
    pub fn tick(&mut self) {
        let now = self.env.now();
        self.dispatch(ConversationEvent::Tick { now });
    }

    /// Completions waiting for delivery.
    pub fn pending(&mut self) -> usize {
        self.absorb();
        self.queue.len()
    }

    /// Take every queued completion without delivering it.
    pub fn take_pending(&mut self) -> Vec<Completion> {
        self.absorb();
        self.queue.drain(..).collect()
    }

    /// Feed one completion into the conversation.
    pub fn deliver(&mut self, completion: Completion) {
        if let Completion::Watched { scope, result } = completion {
            tracing::debug!(%scope, ok = result.is_ok(), "watch completion ignored by sync driver");
            return;
        }
        if let Some(event) = completion.into_event() {
            self.dispatch(event);
        }
    }

    /// Deliver the oldest queued completion. Returns `false` when the queue
    /// is empty.
    pub fn deliver_next(&mut self) -> bool {
        self.absorb();
        match self.queue.pop_front() {
            Some(completion) => {
                self.deliver(completion);
                true
            },
            None => false,
        }
    }

    /// Deliver completions until none are left.
    pub fn settle(&mut self) {
        for _ in 0..SETTLE_LIMIT {
            if !self.deliver_next() {
                return;
            }
        }
        tracing::warn!(user = %self.user_id(), "session did not settle");
    }

    /// Notices shown so far.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Scroll anchors emitted so far.
    pub fn prepends(&self) -> &[(RoomId, usize)] {
        &self.prepends
    }

    /// Streams this session opened and has not closed.
    pub fn open_streams(&self) -> usize {
        self.open_streams.len()
    }

    /// Observable state for invariant checks.
    pub fn snapshot(&mut self) -> SessionSnapshot {
        let quiescent = self.pending() == 0;
        let conversation = &self.conversation;
        let rooms: BTreeMap<RoomId, Vec<_>> = conversation
            .store()
            .rooms()
            .map(|(room_id, timeline)| (room_id.clone(), timeline.entries().to_vec()))
            .collect();

        SessionSnapshot {
            user_id: conversation.profile().user_id.clone(),
            active_room: conversation.active_room().map(|room| room.id.clone()),
            subscribed_room: conversation.subscribed_room().cloned(),
            phase: conversation.subscription_phase(),
            rooms,
            epoch_history: self.epochs.iter().map(|epoch| epoch.value()).collect(),
            open_streams: self.open_streams.len(),
            quiescent,
        }
    }

    fn dispatch(&mut self, event: ConversationEvent<SimInstant>) {
        if let Err(error) = self.handle(event) {
            tracing::debug!(user = %self.user_id(), %error, "event rejected");
        }
    }

    fn record_epoch(&mut self) {
        let epoch = self.conversation.epoch();
        if self.epochs.last() != Some(&epoch) {
            self.epochs.push(epoch);
        }
    }

    /// Move pushes delivered through the channel into the queue.
    fn absorb(&mut self) {
        while let Ok(completion) = self.rx.try_recv() {
            self.queue.push_back(completion);
        }
    }

    fn complete(&mut self, completion: Completion) {
        // Pushes emitted by the call itself precede its result
        self.absorb();
        self.queue.push_back(completion);
    }

    fn execute(&mut self, action: ConversationAction) {
        match action {
            ConversationAction::FetchHistory(request) => {
                let before = request.kind.before();
                let result = self.backend.fetch(&request.room_id, before, request.limit);
                self.complete(Completion::History { request: request.id, result });
            },
            ConversationAction::InsertMessage { local_id, draft } => {
                let result = self.backend.insert(draft);
                self.complete(Completion::Persisted { local_id, result });
            },
            ConversationAction::UpdateMessage { request, id, patch } => {
                let result = self.backend.update(&id, patch).map(Some);
                self.complete(Completion::Written { request, result });
            },
            ConversationAction::DeleteMessage { request, id } => {
                let result = self.backend.delete(&id).map(|()| None);
                self.complete(Completion::Written { request, result });
            },
            ConversationAction::ToggleReaction { request, id, emoji, user_id } => {
                let result = self.backend.toggle(&id, &emoji, &user_id).map(|()| None);
                self.complete(Completion::Written { request, result });
            },
            ConversationAction::Subscribe { room_id, epoch } => {
                let sink = EventSink::new(epoch, self.tx.clone());
                let completion = match self.backend.open_stream(room_id, sink) {
                    Ok(handle) => {
                        self.open_streams.insert(handle);
                        Completion::Opened { epoch, handle }
                    },
                    Err(error) => Completion::OpenFailed { epoch, reason: error.to_string() },
                };
                self.complete(completion);
            },
            ConversationAction::Unsubscribe { handle } => {
                self.backend.close_stream(handle);
                self.open_streams.remove(&handle);
            },
            ConversationAction::TrackPresence { scope, state } => {
                if let Err(error) = self.backend.publish(scope.clone(), state) {
                    tracing::warn!(%scope, %error, "presence track failed");
                }
            },
            ConversationAction::WatchPresence { scope } => {
                if !self.watches.contains_key(&scope) {
                    let sink = PresenceSink::new(scope.clone(), self.tx.clone());
                    let handle = self.backend.add_watch(scope.clone(), sink);
                    self.watches.insert(scope, handle);
                }
            },
            ConversationAction::UnwatchPresence { scope } => {
                if let Some(handle) = self.watches.remove(&scope) {
                    self.backend.remove_watch(handle);
                }
            },
            ConversationAction::HistoryPrepended { room_id, count } => self.prepends.push((room_id, count)),
            ConversationAction::Notify(notice) => self.notices.push(notice),
        }
    }
}

/// Snapshot of several sessions for invariant checks.
pub fn system_snapshot<'a>(sessions: impl IntoIterator<Item = &'a mut SimSession>) -> SystemSnapshot {
    SystemSnapshot::from_sessions(sessions.into_iter().map(SimSession::snapshot).collect())
}
