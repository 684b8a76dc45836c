//! Conversation facade.
//!
//! Composes the engine components into one session-scoped state machine. The
//! conversation owns the active room, the activation epoch, the message store,
//! the history loader, the subscription manager and the presence tracker.
//!
//! # Epochs
//!
//! Every room switch bumps the epoch. History results, stream handles and
//! stream events carry the epoch they were issued under and are discarded
//! when it is no longer current, so switching `A -> B -> A` before any
//! response arrives never leaks B's messages into A.

use std::collections::HashMap;

use huddle_core::{
    CollaboratorError, Cursor, Environment, Epoch, HistoryLoader, HistoryOutcome, HistoryStatus, MessageStore,
    PageKind, PresenceAction, PresenceTracker, ReconcileOutcome, RequestId, StoredMessage,
    SubscriptionAction, SubscriptionHandle, SubscriptionManager, SubscriptionPhase, SubscriptionState,
};
use huddle_proto::{
    Attachment, Message, MessageDraft, MessageId, MessagePatch, PresenceScope, Room, RoomId,
    StreamEvent, UserId,
};

use crate::{
    config::ConversationConfig,
    error::ConversationError,
    event::{ConversationAction, ConversationEvent, Notice, WriteId},
    view::ConversationView,
};

/// Signed-in user.
///
/// Read-only for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Stable user id.
    pub user_id: UserId,
    /// Name shown to other users.
    pub display_name: String,
    /// Avatar image URL.
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// Profile without an avatar.
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self { user_id, display_name: display_name.into(), avatar_url: None }
    }
}

/// Optimistic message waiting for its ack.
#[derive(Debug, Clone)]
struct PendingSend<I> {
    room_id: RoomId,
    /// `None` once the send failed or timed out
    deadline: Option<I>,
}

#[derive(Debug, Clone)]
enum WriteKind {
    Edit { text: String },
    Delete,
    /// `present` is the reaction state the request establishes
    React { emoji: String, present: bool },
}

#[derive(Debug, Clone)]
struct PendingWrite {
    room_id: RoomId,
    id: String,
    kind: WriteKind,
}

/// Conversation state machine for one signed-in user.
pub struct Conversation<E: Environment> {
    /// Environment for time and randomness
    env: E,

    /// Signed-in user
    profile: UserProfile,

    config: ConversationConfig,

    /// Current activation epoch
    epoch: Epoch,

    /// Room currently shown
    active: Option<Room>,

    store: MessageStore,
    history: HistoryLoader,
    subscription: SubscriptionManager<E::Instant>,
    presence: PresenceTracker<E::Instant>,

    /// Optimistic sends by local id
    pending_sends: HashMap<u64, PendingSend<E::Instant>>,
    next_local_id: u64,

    /// Edits, deletes and reactions awaiting their ack
    pending_writes: HashMap<WriteId, PendingWrite>,
    next_write_id: u64,
}

impl<E: Environment> Conversation<E> {
    /// Create a conversation for `profile`. Nothing happens until
    /// [`ConversationEvent::Start`].
    pub fn new(env: E, profile: UserProfile, config: ConversationConfig) -> Self {
        let presence = PresenceTracker::new(profile.user_id.clone(), config.presence.clone());
        Self {
            env,
            profile,
            epoch: Epoch::ZERO,
            active: None,
            store: MessageStore::new(),
            history: HistoryLoader::new(config.history.clone()),
            subscription: SubscriptionManager::new(config.backoff.clone()),
            presence,
            pending_sends: HashMap::new(),
            next_local_id: 1,
            pending_writes: HashMap::new(),
            next_write_id: 1,
            config,
        }
    }

    /// Signed-in user.
    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Current activation epoch.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Active room.
    pub fn active_room(&self) -> Option<&Room> {
        self.active.as_ref()
    }

    /// Messages of the active room.
    pub fn messages(&self) -> &[StoredMessage] {
        match &self.active {
            Some(room) => self.store.messages(&room.id),
            None => &[],
        }
    }

    /// Messages of any loaded room.
    pub fn messages_in(&self, room_id: &RoomId) -> &[StoredMessage] {
        self.store.messages(room_id)
    }

    /// Message store, for inspection.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Other users typing in the active room.
    pub fn typing_users(&self) -> Vec<UserId> {
        match &self.active {
            Some(room) => self.presence.typing_users(&room.id, self.env.now()).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Users online.
    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.online_users(self.env.now()).into_iter().collect()
    }

    /// History status of the active room.
    pub fn history_status(&self) -> HistoryStatus {
        self.active.as_ref().map(|room| self.history.status(&room.id)).unwrap_or_default()
    }

    /// Full stream state, including the retry deadline while reconnecting.
    pub fn subscription_state(&self) -> &SubscriptionState<E::Instant> {
        self.subscription.state()
    }

    /// Coarse stream state.
    pub fn subscription_phase(&self) -> SubscriptionPhase {
        self.subscription.phase()
    }

    /// Handle of the live stream, if any.
    pub fn subscription_handle(&self) -> Option<SubscriptionHandle> {
        self.subscription.handle()
    }

    /// Room the stream is bound to.
    pub fn subscribed_room(&self) -> Option<&RoomId> {
        self.subscription.room()
    }

    /// Owned snapshot for rendering.
    pub fn view(&self) -> ConversationView {
        let room_id = self.active.as_ref().map(|room| room.id.clone());
        ConversationView {
            room: self.active.clone(),
            messages: self.messages().to_vec(),
            typing: self.typing_users(),
            online: self.online_users(),
            history: self.history_status(),
            loading_older: room_id.as_ref().is_some_and(|id| self.history.is_loading_older(id)),
            exhausted: room_id.as_ref().is_some_and(|id| self.history.is_exhausted(id)),
            subscription: self.subscription.phase(),
        }
    }

    /// Process an event and return resulting actions.
    pub fn handle(
        &mut self,
        event: ConversationEvent<E::Instant>,
    ) -> Result<Vec<ConversationAction>, ConversationError> {
        match event {
            ConversationEvent::Start => Ok(self.handle_start()),
            ConversationEvent::Shutdown => Ok(self.handle_shutdown()),
            ConversationEvent::SwitchRoom(room) => Ok(self.handle_switch_room(room)),
            ConversationEvent::OpenDirect { user_id, display_name } => {
                let room = Room::direct(&self.profile.user_id, &user_id, display_name);
                Ok(self.handle_switch_room(room))
            },
            ConversationEvent::Send { text, attachment } => self.handle_send(text, attachment),
            ConversationEvent::RetrySend { local_id } => self.handle_retry_send(local_id),
            ConversationEvent::DiscardFailed { local_id } => self.handle_discard(local_id),
            ConversationEvent::Edit { id, text } => self.handle_edit(id, text),
            ConversationEvent::Delete { id } => self.handle_delete(id),
            ConversationEvent::React { id, emoji } => self.handle_react(id, emoji),
            ConversationEvent::NotifyTyping => self.handle_notify_typing(),
            ConversationEvent::LoadOlder => self.handle_load_older(),
            ConversationEvent::RetryHistory => self.handle_retry_history(),
            ConversationEvent::Tick { now } => Ok(self.handle_tick(now)),
            ConversationEvent::HistoryLoaded { request, result } => {
                Ok(self.handle_history_loaded(request, result))
            },
            ConversationEvent::MessagePersisted { local_id, result } => {
                Ok(self.handle_message_persisted(local_id, result))
            },
            ConversationEvent::WriteCompleted { request, result } => {
                Ok(self.handle_write_completed(request, result))
            },
            ConversationEvent::SubscriptionOpened { epoch, handle } => {
                Ok(self.handle_subscription_opened(epoch, handle))
            },
            ConversationEvent::SubscriptionFailed { epoch, reason } => {
                let actions = self.subscription.on_open_failed(epoch, &reason, self.env.now());
                Ok(self.convert_subscription_actions(actions))
            },
            ConversationEvent::StreamDropped { epoch } => {
                let actions = self.subscription.on_dropped(epoch, self.env.now());
                Ok(self.convert_subscription_actions(actions))
            },
            ConversationEvent::StreamEvent { epoch, event } => {
                self.handle_stream_event(epoch, event);
                Ok(Vec::new())
            },
            ConversationEvent::PresenceSynced { scope, snapshot } => {
                self.presence.apply_sync(&scope, snapshot, self.env.now());
                Ok(Vec::new())
            },
        }
    }

    fn handle_start(&mut self) -> Vec<ConversationAction> {
        tracing::info!(user = %self.profile.user_id, "session start");
        let actions = self.presence.go_online(self.env.now(), self.env.unix_millis());
        convert_presence_actions(actions)
    }

    fn handle_shutdown(&mut self) -> Vec<ConversationAction> {
        tracing::info!(user = %self.profile.user_id, "session end");
        // Anything still in flight belongs to the old session
        self.epoch = self.epoch.next();
        self.active = None;

        let subscription = self.subscription.deactivate();
        let mut actions = self.convert_subscription_actions(subscription);
        actions.extend(convert_presence_actions(self.presence.shutdown(self.env.unix_millis())));
        actions
    }

    fn handle_switch_room(&mut self, room: Room) -> Vec<ConversationAction> {
        if self.active.as_ref().is_some_and(|active| active.id == room.id) {
            return Vec::new();
        }

        let now_ms = self.env.unix_millis();
        let mut presence_actions = self.presence.stop_typing(now_ms);
        if let Some(previous) = self.active.take() {
            presence_actions.extend(self.presence.unwatch(&PresenceScope::Typing(previous.id)));
        }

        self.epoch = self.epoch.next();
        tracing::info!(room = %room.id, epoch = %self.epoch, "switching room");

        let mut actions = convert_presence_actions(presence_actions);
        let subscription = self.subscription.activate(&room.id, self.epoch);
        actions.extend(self.convert_subscription_actions(subscription));
        let held = self.store.newest_cursor(&room.id);
        actions.push(ConversationAction::FetchHistory(self.history.begin_initial(&room.id, self.epoch, held)));
        actions.extend(convert_presence_actions(
            self.presence.watch(PresenceScope::Typing(room.id.clone())),
        ));

        self.active = Some(room);
        actions
    }

    fn handle_send(
        &mut self,
        text: String,
        attachment: Option<Attachment>,
    ) -> Result<Vec<ConversationAction>, ConversationError> {
        let room_id = self.active_room_id()?;
        if text.trim().is_empty() && attachment.is_none() {
            return Err(ConversationError::EmptyMessage);
        }

        let local_id = self.next_local_id;
        self.next_local_id += 1;

        let message = Message {
            id: MessageId::Local(local_id),
            room_id: room_id.clone(),
            sender_id: self.profile.user_id.clone(),
            text,
            created_at: self.env.unix_millis(),
            attachment,
            reactions: Vec::new(),
            edited_at: None,
            deleted_at: None,
        };
        let draft = draft_of(&message);
        self.store.append_optimistic(message);
        self.pending_sends.insert(
            local_id,
            PendingSend { room_id, deadline: Some(self.env.now() + self.config.send_timeout) },
        );

        let mut actions = vec![ConversationAction::InsertMessage { local_id, draft }];
        actions.extend(convert_presence_actions(self.presence.stop_typing(self.env.unix_millis())));
        Ok(actions)
    }

    fn handle_retry_send(&mut self, local_id: u64) -> Result<Vec<ConversationAction>, ConversationError> {
        let pending = self
            .pending_sends
            .get_mut(&local_id)
            .ok_or(ConversationError::UnknownLocalMessage { local_id })?;
        let message =
            self.store.retry(&pending.room_id, local_id).ok_or(ConversationError::NotFailed { local_id })?;

        pending.deadline = Some(self.env.now() + self.config.send_timeout);
        tracing::debug!(local_id, "retrying send");
        Ok(vec![ConversationAction::InsertMessage { local_id, draft: draft_of(&message) }])
    }

    fn handle_discard(&mut self, local_id: u64) -> Result<Vec<ConversationAction>, ConversationError> {
        let pending =
            self.pending_sends.get(&local_id).ok_or(ConversationError::UnknownLocalMessage { local_id })?;
        if !self.store.discard(&pending.room_id, local_id) {
            return Err(ConversationError::NotFailed { local_id });
        }
        self.pending_sends.remove(&local_id);
        Ok(Vec::new())
    }

    fn handle_edit(&mut self, id: String, text: String) -> Result<Vec<ConversationAction>, ConversationError> {
        let room_id = self.active_room_id()?;
        if text.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }
        self.authorize_author(&room_id, &id)?;

        let request = self.track_write(room_id, id.clone(), WriteKind::Edit { text: text.clone() });
        Ok(vec![ConversationAction::UpdateMessage { request, id, patch: MessagePatch { text } }])
    }

    fn handle_delete(&mut self, id: String) -> Result<Vec<ConversationAction>, ConversationError> {
        let room_id = self.active_room_id()?;
        self.authorize_author(&room_id, &id)?;

        let request = self.track_write(room_id, id.clone(), WriteKind::Delete);
        Ok(vec![ConversationAction::DeleteMessage { request, id }])
    }

    fn handle_react(&mut self, id: String, emoji: String) -> Result<Vec<ConversationAction>, ConversationError> {
        let room_id = self.active_room_id()?;
        let message = self.find_message(&room_id, &id)?;
        let present = !message.has_reacted(&self.profile.user_id, &emoji);

        let request =
            self.track_write(room_id, id.clone(), WriteKind::React { emoji: emoji.clone(), present });
        Ok(vec![ConversationAction::ToggleReaction {
            request,
            id,
            emoji,
            user_id: self.profile.user_id.clone(),
        }])
    }

    fn handle_notify_typing(&mut self) -> Result<Vec<ConversationAction>, ConversationError> {
        let room_id = self.active_room_id()?;
        let actions = self.presence.notify_typing(&room_id, self.env.now(), self.env.unix_millis());
        Ok(convert_presence_actions(actions))
    }

    fn handle_load_older(&mut self) -> Result<Vec<ConversationAction>, ConversationError> {
        let room_id = self.active_room_id()?;
        let Some(before) = self.store.oldest_cursor(&room_id) else {
            return Ok(Vec::new());
        };
        Ok(self
            .history
            .begin_older(&room_id, self.epoch, before)
            .map(ConversationAction::FetchHistory)
            .into_iter()
            .collect())
    }

    fn handle_retry_history(&mut self) -> Result<Vec<ConversationAction>, ConversationError> {
        let room_id = self.active_room_id()?;
        if self.history.status(&room_id) == HistoryStatus::Loading {
            return Ok(Vec::new());
        }
        let held = self.store.newest_cursor(&room_id);
        Ok(vec![ConversationAction::FetchHistory(self.history.begin_initial(&room_id, self.epoch, held))])
    }

    /// Fires presence timers, reconnects and send timeouts.
    fn handle_tick(&mut self, now: E::Instant) -> Vec<ConversationAction> {
        let now_ms = self.env.unix_millis();
        let mut actions = convert_presence_actions(self.presence.on_tick(now, now_ms));
        let subscription = self.subscription.on_tick(now);
        actions.extend(self.convert_subscription_actions(subscription));

        let mut expired: Vec<u64> = self
            .pending_sends
            .iter()
            .filter(|(_, pending)| pending.deadline.is_some_and(|deadline| now >= deadline))
            .map(|(&local_id, _)| local_id)
            .collect();
        expired.sort_unstable();

        for local_id in expired {
            let Some(pending) = self.pending_sends.get_mut(&local_id) else {
                continue;
            };
            pending.deadline = None;
            let room_id = pending.room_id.clone();
            if self.store.mark_failed(&room_id, local_id) {
                tracing::warn!(room = %room_id, local_id, "send timed out");
                actions.push(ConversationAction::Notify(Notice::SendFailed {
                    room_id,
                    local_id,
                    reason: format!("no acknowledgement within {:?}", self.config.send_timeout),
                }));
            }
        }

        actions
    }

    fn handle_history_loaded(
        &mut self,
        request: RequestId,
        result: Result<Vec<Message>, CollaboratorError>,
    ) -> Vec<ConversationAction> {
        match self.history.complete(request, self.epoch, result) {
            HistoryOutcome::Apply { room_id, kind, messages, next } => {
                let outcome = self.store.merge_history(&room_id, messages);
                tracing::debug!(
                    room = %room_id,
                    inserted = outcome.inserted,
                    updated = outcome.updated,
                    "history merged"
                );
                let mut actions: Vec<_> = next.map(ConversationAction::FetchHistory).into_iter().collect();
                if matches!(kind, PageKind::Older { .. }) && outcome.prepended > 0 {
                    actions.push(ConversationAction::HistoryPrepended { room_id, count: outcome.prepended });
                }
                actions
            },
            HistoryOutcome::Stale => Vec::new(),
            HistoryOutcome::Failed { room_id, kind, error } => {
                tracing::warn!(room = %room_id, ?kind, %error, "history load failed");
                match kind {
                    PageKind::Initial | PageKind::Gap { .. } => {
                        vec![ConversationAction::Notify(Notice::HistoryUnavailable {
                            room_id,
                            reason: error.to_string(),
                        })]
                    },
                    // The older page can simply be requested again
                    PageKind::Older { .. } => Vec::new(),
                }
            },
        }
    }

    fn handle_message_persisted(
        &mut self,
        local_id: u64,
        result: Result<Message, CollaboratorError>,
    ) -> Vec<ConversationAction> {
        let Some(pending) = self.pending_sends.get_mut(&local_id) else {
            tracing::debug!(local_id, "ack for unknown or discarded send");
            return Vec::new();
        };
        let room_id = pending.room_id.clone();

        match result {
            Ok(message) => {
                self.pending_sends.remove(&local_id);
                // Without a live stream, rows around this one may be missing
                if !self.is_live_in(&room_id) {
                    self.history.mark_unsynced(&room_id, self.store.newest_cursor(&room_id));
                    self.history.mark_unsynced(&room_id, Cursor::of(&message));
                }
                match self.store.reconcile(&room_id, local_id, message) {
                    ReconcileOutcome::Replaced => {},
                    ReconcileOutcome::Deduplicated => {
                        tracing::debug!(room = %room_id, local_id, "stream delivered the message first");
                    },
                    ReconcileOutcome::Unknown => {
                        tracing::debug!(room = %room_id, local_id, "optimistic entry already gone");
                    },
                }
                Vec::new()
            },
            Err(error) => {
                pending.deadline = None;
                tracing::warn!(room = %room_id, local_id, %error, "send failed");
                if self.store.mark_failed(&room_id, local_id) {
                    vec![ConversationAction::Notify(Notice::SendFailed {
                        room_id,
                        local_id,
                        reason: error.to_string(),
                    })]
                } else {
                    Vec::new()
                }
            },
        }
    }

    fn handle_write_completed(
        &mut self,
        request: WriteId,
        result: Result<Option<Message>, CollaboratorError>,
    ) -> Vec<ConversationAction> {
        let Some(write) = self.pending_writes.remove(&request) else {
            return Vec::new();
        };
        let PendingWrite { room_id, id, kind } = write;

        let authoritative = match result {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(room = %room_id, %id, %error, "write rejected");
                return vec![ConversationAction::Notify(Notice::WriteFailed { id, reason: error.to_string() })];
            },
        };

        let now_ms = self.env.unix_millis();
        match kind {
            WriteKind::Edit { text } => {
                let (text, edited_at) = match &authoritative {
                    Some(message) => (message.text.as_str(), message.edited_at.unwrap_or(now_ms)),
                    None => (text.as_str(), now_ms),
                };
                self.store.apply_edit(&room_id, &id, text, edited_at);
            },
            WriteKind::Delete => {
                let deleted_at = authoritative.and_then(|m| m.deleted_at).unwrap_or(now_ms);
                self.store.apply_delete(&room_id, &id, deleted_at);
            },
            WriteKind::React { emoji, present } => {
                let user_id = &self.profile.user_id;
                let has = self
                    .store
                    .get(&room_id, &MessageId::Server(id.clone()))
                    .is_some_and(|entry| entry.message.has_reacted(user_id, &emoji));
                // The stream may already have delivered the new reaction set
                if has != present {
                    self.store.toggle_reaction(&room_id, &id, &emoji, user_id);
                }
            },
        }
        Vec::new()
    }

    fn handle_subscription_opened(&mut self, epoch: Epoch, handle: SubscriptionHandle) -> Vec<ConversationAction> {
        let actions = self.subscription.on_opened(epoch, handle);
        let mut actions = self.convert_subscription_actions(actions);

        // A first open has no resync, but acks may have left a gap meanwhile
        if let Some(room_id) = self.active.as_ref().map(|room| room.id.clone())
            && epoch == self.epoch
            && self.is_live_in(&room_id)
            && self.history.needs_reload(&room_id, epoch)
        {
            tracing::debug!(room = %room_id, "reloading history to close a gap");
            let held = self.store.newest_cursor(&room_id);
            actions.push(ConversationAction::FetchHistory(self.history.begin_initial(&room_id, epoch, held)));
        }
        actions
    }

    fn handle_stream_event(&mut self, epoch: Epoch, event: StreamEvent) {
        let Some((room_id, event)) = self.subscription.on_event(epoch, event) else {
            return;
        };

        match event {
            StreamEvent::Insert(message) => {
                if message.room_id != room_id {
                    tracing::warn!(
                        room = %room_id,
                        message_room = %message.room_id,
                        "dropping insert for another room"
                    );
                    return;
                }
                self.store.apply_insert(message);
            },
            StreamEvent::Update(edit) => {
                self.store.apply_edit(&room_id, &edit.id, &edit.text, edit.edited_at);
            },
            StreamEvent::Delete(deletion) => {
                self.store.apply_delete(&room_id, &deletion.id, deletion.deleted_at);
            },
            StreamEvent::Reaction(change) => {
                self.store.apply_reactions(&room_id, &change.id, change.reactions);
            },
        }
    }

    /// Convert subscription actions to conversation actions.
    ///
    /// `Resync` becomes a fresh initial history load under the current epoch.
    fn convert_subscription_actions(&mut self, actions: Vec<SubscriptionAction>) -> Vec<ConversationAction> {
        actions
            .into_iter()
            .map(|action| match action {
                SubscriptionAction::Open { room_id, epoch } => ConversationAction::Subscribe { room_id, epoch },
                SubscriptionAction::Close { handle } => ConversationAction::Unsubscribe { handle },
                SubscriptionAction::Resync { room_id, epoch } => {
                    tracing::info!(room = %room_id, "resyncing after reconnect");
                    let held = self.store.newest_cursor(&room_id);
                    ConversationAction::FetchHistory(self.history.begin_initial(&room_id, epoch, held))
                },
            })
            .collect()
    }

    fn is_live_in(&self, room_id: &RoomId) -> bool {
        self.subscription.phase() == SubscriptionPhase::Live && self.subscription.room() == Some(room_id)
    }

    fn active_room_id(&self) -> Result<RoomId, ConversationError> {
        self.active.as_ref().map(|room| room.id.clone()).ok_or(ConversationError::NoActiveRoom)
    }

    fn find_message(&self, room_id: &RoomId, id: &str) -> Result<&Message, ConversationError> {
        self.store
            .get(room_id, &MessageId::Server(id.to_string()))
            .map(|entry| &entry.message)
            .ok_or_else(|| ConversationError::MessageNotFound { room_id: room_id.clone(), id: id.to_string() })
    }

    fn authorize_author(&self, room_id: &RoomId, id: &str) -> Result<(), ConversationError> {
        let message = self.find_message(room_id, id)?;
        if message.sender_id != self.profile.user_id {
            return Err(ConversationError::NotAuthor { id: id.to_string() });
        }
        Ok(())
    }

    fn track_write(&mut self, room_id: RoomId, id: String, kind: WriteKind) -> WriteId {
        let request = WriteId(self.next_write_id);
        self.next_write_id += 1;
        self.pending_writes.insert(request, PendingWrite { room_id, id, kind });
        request
    }
}

fn draft_of(message: &Message) -> MessageDraft {
    MessageDraft {
        room_id: message.room_id.clone(),
        sender_id: message.sender_id.clone(),
        text: message.text.clone(),
        attachment: message.attachment.clone(),
    }
}

/// Convert presence actions to conversation actions.
fn convert_presence_actions(actions: Vec<PresenceAction>) -> Vec<ConversationAction> {
    actions
        .into_iter()
        .map(|action| match action {
            PresenceAction::Track { scope, state } => ConversationAction::TrackPresence { scope, state },
            PresenceAction::Watch { scope } => ConversationAction::WatchPresence { scope },
            PresenceAction::Unwatch { scope } => ConversationAction::UnwatchPresence { scope },
        })
        .collect()
}
