//! Backend collaborator traits.
//!
//! The runtime never talks to a concrete backend. Each collaborator is a trait
//! so production adapters, the simulated backend and test doubles run the
//! same orchestration code.
//!
//! # Sinks
//!
//! Push-style collaborators (live stream, presence) deliver into a sink handed
//! out by the runtime. Sinks are cheap to clone and tagged with the epoch or
//! scope they were issued for, so late deliveries can be recognized and
//! discarded by the conversation.

use std::{future::Future, sync::Arc};

use huddle_client::{ConversationEvent, UserProfile, WriteId};
use huddle_core::{CollaboratorError, Cursor, Epoch, RequestId, SubscriptionHandle};
use huddle_proto::{
    Message, MessageDraft, MessagePatch, PresenceScope, PresenceState, RoomId, StreamEvent, UserId,
};
use tokio::sync::mpsc;

/// Handle of a presence watch registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PresenceWatchHandle(pub u64);

/// Message persistence.
pub trait Persistence: Send + Sync + 'static {
    /// Fetch up to `limit` messages of `room_id`, ascending by `created_at`.
    ///
    /// Without `before` the newest page is returned; otherwise the page
    /// immediately preceding the cursor.
    fn fetch_messages(
        &self,
        room_id: RoomId,
        before: Option<Cursor>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, CollaboratorError>> + Send;

    /// Persist a new message and return the authoritative row.
    fn insert_message(
        &self,
        draft: MessageDraft,
    ) -> impl Future<Output = Result<Message, CollaboratorError>> + Send;

    /// Replace the text of a message and return the authoritative row.
    fn update_message(
        &self,
        id: String,
        patch: MessagePatch,
    ) -> impl Future<Output = Result<Message, CollaboratorError>> + Send;

    /// Soft-delete a message.
    fn delete_message(&self, id: String) -> impl Future<Output = Result<(), CollaboratorError>> + Send;

    /// Add the reaction if absent, remove it if present.
    fn toggle_reaction(
        &self,
        id: String,
        emoji: String,
        user_id: UserId,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;
}

/// Live change stream of one room.
pub trait LiveStream: Send + Sync + 'static {
    /// Start delivering events of `room_id` into `sink`.
    fn subscribe(
        &self,
        room_id: RoomId,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionHandle, CollaboratorError>> + Send;

    /// Stop delivering. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> impl Future<Output = ()> + Send;
}

/// Broadcast presence channel.
pub trait PresenceChannel: Send + Sync + 'static {
    /// Publish our state on `scope`.
    fn track(
        &self,
        scope: PresenceScope,
        state: PresenceState,
    ) -> impl Future<Output = Result<(), CollaboratorError>> + Send;

    /// Deliver the merged snapshot of `scope` into `sink` on every change.
    fn on_sync(
        &self,
        scope: PresenceScope,
        sink: PresenceSink,
    ) -> impl Future<Output = Result<PresenceWatchHandle, CollaboratorError>> + Send;

    /// Stop delivering. Unknown handles are ignored.
    fn unwatch(&self, handle: PresenceWatchHandle) -> impl Future<Output = ()> + Send;
}

/// Signed-in user, read-only.
pub trait Identity: Send + Sync {
    /// Current user's profile.
    fn current_user(&self) -> UserProfile;
}

impl Identity for UserProfile {
    fn current_user(&self) -> UserProfile {
        self.clone()
    }
}

/// The backend a runtime executes against.
pub struct Collaborators<P, S, C> {
    /// Message persistence.
    pub persistence: Arc<P>,
    /// Live change stream.
    pub stream: Arc<S>,
    /// Presence channel.
    pub presence: Arc<C>,
}

impl<P, S, C> Collaborators<P, S, C> {
    /// Bundle the three collaborators.
    pub fn new(persistence: Arc<P>, stream: Arc<S>, presence: Arc<C>) -> Self {
        Self { persistence, stream, presence }
    }
}

impl<T> Collaborators<T, T, T> {
    /// Use one backend for all three roles.
    pub fn shared(backend: Arc<T>) -> Self {
        Self { persistence: Arc::clone(&backend), stream: Arc::clone(&backend), presence: backend }
    }
}

impl<P, S, C> Clone for Collaborators<P, S, C> {
    fn clone(&self) -> Self {
        Self {
            persistence: Arc::clone(&self.persistence),
            stream: Arc::clone(&self.stream),
            presence: Arc::clone(&self.presence),
        }
    }
}

/// Collaborator results and pushes flowing back into the conversation.
#[derive(Debug, Clone)]
pub enum Completion {
    /// History fetch finished.
    History {
        /// Fetch id.
        request: RequestId,
        /// Page or failure.
        result: Result<Vec<Message>, CollaboratorError>,
    },
    /// Insert finished.
    Persisted {
        /// Local id of the optimistic copy.
        local_id: u64,
        /// Authoritative row or failure.
        result: Result<Message, CollaboratorError>,
    },
    /// Edit, delete or reaction finished.
    Written {
        /// Write id.
        request: WriteId,
        /// Authoritative row when returned, or failure.
        result: Result<Option<Message>, CollaboratorError>,
    },
    /// Stream subscription opened.
    Opened {
        /// Activation epoch.
        epoch: Epoch,
        /// Stream handle.
        handle: SubscriptionHandle,
    },
    /// Stream subscription failed to open.
    OpenFailed {
        /// Activation epoch.
        epoch: Epoch,
        /// Failure description.
        reason: String,
    },
    /// Event pushed by a stream.
    Stream {
        /// Epoch of the delivering subscription.
        epoch: Epoch,
        /// Decoded event.
        event: StreamEvent,
    },
    /// Stream closed unexpectedly.
    Dropped {
        /// Epoch of the dropped subscription.
        epoch: Epoch,
    },
    /// Presence watch registration finished.
    Watched {
        /// Watched scope.
        scope: PresenceScope,
        /// Watch handle or failure.
        result: Result<PresenceWatchHandle, CollaboratorError>,
    },
    /// Presence snapshot pushed by a watch.
    Presence {
        /// Scope of the snapshot.
        scope: PresenceScope,
        /// Every peer's state on the scope.
        snapshot: Vec<PresenceState>,
    },
}

impl Completion {
    /// Conversation event for this completion. `None` for watch
    /// registrations, which only the runtime tracks.
    pub fn into_event<I>(self) -> Option<ConversationEvent<I>> {
        let event = match self {
            Self::History { request, result } => ConversationEvent::HistoryLoaded { request, result },
            Self::Persisted { local_id, result } => ConversationEvent::MessagePersisted { local_id, result },
            Self::Written { request, result } => ConversationEvent::WriteCompleted { request, result },
            Self::Opened { epoch, handle } => ConversationEvent::SubscriptionOpened { epoch, handle },
            Self::OpenFailed { epoch, reason } => ConversationEvent::SubscriptionFailed { epoch, reason },
            Self::Stream { epoch, event } => ConversationEvent::StreamEvent { epoch, event },
            Self::Dropped { epoch } => ConversationEvent::StreamDropped { epoch },
            Self::Presence { scope, snapshot } => ConversationEvent::PresenceSynced { scope, snapshot },
            Self::Watched { .. } => return None,
        };
        Some(event)
    }
}

/// Delivery side of one stream subscription.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<Completion>,
}

impl EventSink {
    /// Sink delivering into `tx`, tagged with `epoch`.
    pub fn new(epoch: Epoch, tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self { epoch, tx }
    }

    /// Epoch the subscription was opened under.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Deliver a decoded event. Returns `false` once the runtime has stopped.
    pub fn deliver(&self, event: StreamEvent) -> bool {
        self.tx.send(Completion::Stream { epoch: self.epoch, event }).is_ok()
    }

    /// Decode and deliver a wire event. Undecodable payloads and unknown event
    /// types are logged and dropped.
    pub fn deliver_bytes(&self, bytes: &[u8]) -> bool {
        match StreamEvent::decode(bytes) {
            Ok(event) => self.deliver(event),
            Err(error) => {
                tracing::warn!(epoch = %self.epoch, %error, "dropping undecodable stream event");
                !self.tx.is_closed()
            },
        }
    }

    /// Report that the stream closed unexpectedly.
    pub fn dropped(&self) {
        if self.tx.send(Completion::Dropped { epoch: self.epoch }).is_err() {
            tracing::debug!(epoch = %self.epoch, "runtime gone, drop not reported");
        }
    }

    /// Whether the runtime stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Delivery side of one presence watch.
#[derive(Debug, Clone)]
pub struct PresenceSink {
    scope: PresenceScope,
    tx: mpsc::UnboundedSender<Completion>,
}

impl PresenceSink {
    /// Sink delivering snapshots of `scope` into `tx`.
    pub fn new(scope: PresenceScope, tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self { scope, tx }
    }

    /// Scope the watch was registered for.
    pub fn scope(&self) -> &PresenceScope {
        &self.scope
    }

    /// Deliver the merged snapshot. Returns `false` once the runtime has
    /// stopped.
    pub fn sync(&self, snapshot: Vec<PresenceState>) -> bool {
        self.tx.send(Completion::Presence { scope: self.scope.clone(), snapshot }).is_ok()
    }

    /// Whether the runtime stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
