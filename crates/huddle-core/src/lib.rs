//! Huddle core
//!
//! Sans-IO building blocks of the conversation engine. Every component is a
//! pure state machine: it receives inputs (including the current time) and
//! returns actions for the caller to execute. No component performs I/O.
//!
//! # Components
//!
//! - [`MessageStore`]: Per-room ordered message lists with optimistic-send
//!   reconciliation
//! - [`PresenceTracker`]: Online set and per-room typing indicators
//! - [`HistoryLoader`]: Epoch-guarded backlog fetches and pagination
//! - [`SubscriptionManager`]: Single live stream subscription with reconnect
//!   backoff
//! - [`Environment`]: Time and randomness, swapped for virtual ones in tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod epoch;
pub mod error;
pub mod history;
pub mod presence;
pub mod store;
pub mod subscription;

pub use env::{Environment, InstantLike};
pub use epoch::Epoch;
pub use error::CollaboratorError;
pub use history::{
    HistoryConfig, HistoryLoader, HistoryOutcome, HistoryRequest, HistoryStatus, PageKind, RequestId,
};
pub use presence::{PresenceAction, PresenceConfig, PresenceTracker};
pub use store::{
    Cursor, Delivery, MergeOutcome, MessageStore, ReconcileOutcome, RoomTimeline, StoredMessage,
};
pub use subscription::{
    BackoffConfig, SubscriptionAction, SubscriptionHandle, SubscriptionManager, SubscriptionPhase,
    SubscriptionState,
};
