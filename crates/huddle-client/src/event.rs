//! Conversation events and actions.

use huddle_core::{CollaboratorError, Epoch, HistoryRequest, RequestId, SubscriptionHandle};
use huddle_proto::{
    Attachment, Message, MessageDraft, MessagePatch, PresenceScope, PresenceState, Room, RoomId,
    StreamEvent, UserId,
};

/// Identifies one edit, delete or reaction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteId(pub u64);

/// Events the caller feeds into the conversation.
///
/// The caller is responsible for:
/// - Forwarding user intents (switch room, send, edit, react, type)
/// - Executing [`ConversationAction`]s and feeding their results back
/// - Driving time forward via ticks
///
/// Generic over `I` (Instant type) to support both production
/// (`std::time::Instant`) and simulated time.
#[derive(Debug, Clone)]
pub enum ConversationEvent<I = std::time::Instant> {
    /// Session start: announce online and watch the online set.
    Start,

    /// Session end: close the stream, release presence, retract typing.
    Shutdown,

    /// Make `room` the active room.
    SwitchRoom(Room),

    /// Open the direct-message room with another user.
    OpenDirect {
        /// Other participant.
        user_id: UserId,
        /// Their display name.
        display_name: String,
    },

    /// Send a message to the active room.
    Send {
        /// Message body. May be empty when an attachment is present.
        text: String,
        /// Already uploaded attachment.
        attachment: Option<Attachment>,
    },

    /// Re-send a failed optimistic message.
    RetrySend {
        /// Local id of the failed message.
        local_id: u64,
    },

    /// Drop a failed optimistic message.
    DiscardFailed {
        /// Local id of the failed message.
        local_id: u64,
    },

    /// Edit one of our messages in the active room.
    Edit {
        /// Server id of the message.
        id: String,
        /// Replacement body.
        text: String,
    },

    /// Soft-delete one of our messages in the active room.
    Delete {
        /// Server id of the message.
        id: String,
    },

    /// Toggle our reaction on a message in the active room.
    React {
        /// Server id of the message.
        id: String,
        /// Emoji.
        emoji: String,
    },

    /// A keystroke in the active room's composer.
    NotifyTyping,

    /// Fetch the page before the oldest loaded message.
    LoadOlder,

    /// Reload the newest page of the active room after a failure.
    RetryHistory,

    /// Time tick for timeout processing.
    ///
    /// The caller should send ticks periodically so debounce, send timeouts
    /// and reconnect backoff can fire.
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// A history fetch completed.
    HistoryLoaded {
        /// Request id from [`ConversationAction::FetchHistory`].
        request: RequestId,
        /// Messages ascending by `created_at`, or the failure.
        result: Result<Vec<Message>, CollaboratorError>,
    },

    /// An insert completed.
    MessagePersisted {
        /// Local id from [`ConversationAction::InsertMessage`].
        local_id: u64,
        /// Authoritative row, or the failure.
        result: Result<Message, CollaboratorError>,
    },

    /// An edit, delete or reaction request completed.
    WriteCompleted {
        /// Request id from the action.
        request: WriteId,
        /// Authoritative row when the backend returns one.
        result: Result<Option<Message>, CollaboratorError>,
    },

    /// A stream subscription opened.
    SubscriptionOpened {
        /// Epoch from [`ConversationAction::Subscribe`].
        epoch: Epoch,
        /// Handle of the open stream.
        handle: SubscriptionHandle,
    },

    /// Opening a stream subscription failed.
    SubscriptionFailed {
        /// Epoch from [`ConversationAction::Subscribe`].
        epoch: Epoch,
        /// Failure description.
        reason: String,
    },

    /// The stream of `epoch` closed unexpectedly.
    StreamDropped {
        /// Epoch of the dropped stream.
        epoch: Epoch,
    },

    /// An event delivered by the stream of `epoch`.
    StreamEvent {
        /// Epoch of the delivering stream.
        epoch: Epoch,
        /// Decoded event.
        event: StreamEvent,
    },

    /// A presence snapshot for a watched scope.
    PresenceSynced {
        /// Scope the snapshot belongs to.
        scope: PresenceScope,
        /// Every peer's state on the scope.
        snapshot: Vec<PresenceState>,
    },
}

/// User-facing notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A message could not be delivered and is offered for retry.
    SendFailed {
        /// Room of the message.
        room_id: RoomId,
        /// Local id of the failed message.
        local_id: u64,
        /// Failure description.
        reason: String,
    },

    /// History of a room could not be loaded.
    HistoryUnavailable {
        /// Affected room.
        room_id: RoomId,
        /// Failure description.
        reason: String,
    },

    /// An edit, delete or reaction was rejected.
    WriteFailed {
        /// Target message.
        id: String,
        /// Failure description.
        reason: String,
    },
}

/// Actions the conversation produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationAction {
    /// Fetch a history page; report back with
    /// [`ConversationEvent::HistoryLoaded`].
    FetchHistory(HistoryRequest),

    /// Persist a new message; report back with
    /// [`ConversationEvent::MessagePersisted`].
    InsertMessage {
        /// Local id of the optimistic copy.
        local_id: u64,
        /// Insert request.
        draft: MessageDraft,
    },

    /// Persist an edit.
    UpdateMessage {
        /// Request id.
        request: WriteId,
        /// Target message.
        id: String,
        /// New content.
        patch: MessagePatch,
    },

    /// Persist a soft delete.
    DeleteMessage {
        /// Request id.
        request: WriteId,
        /// Target message.
        id: String,
    },

    /// Persist a reaction toggle.
    ToggleReaction {
        /// Request id.
        request: WriteId,
        /// Target message.
        id: String,
        /// Emoji.
        emoji: String,
        /// Reacting user.
        user_id: UserId,
    },

    /// Open a stream for a room; report back with
    /// [`ConversationEvent::SubscriptionOpened`] or
    /// [`ConversationEvent::SubscriptionFailed`].
    Subscribe {
        /// Room to subscribe.
        room_id: RoomId,
        /// Epoch to echo back.
        epoch: Epoch,
    },

    /// Close a stream.
    Unsubscribe {
        /// Handle to release.
        handle: SubscriptionHandle,
    },

    /// Publish our presence state.
    TrackPresence {
        /// Target scope.
        scope: PresenceScope,
        /// State to publish.
        state: PresenceState,
    },

    /// Start delivering snapshots of a scope.
    WatchPresence {
        /// Scope to watch.
        scope: PresenceScope,
    },

    /// Stop delivering snapshots of a scope.
    UnwatchPresence {
        /// Scope to release.
        scope: PresenceScope,
    },

    /// An older page was spliced in front of the list. The UI should keep the
    /// viewport anchored by restoring the scroll delta.
    HistoryPrepended {
        /// Affected room.
        room_id: RoomId,
        /// Messages inserted before the previous oldest one.
        count: usize,
    },

    /// Show a notification.
    Notify(Notice),
}
