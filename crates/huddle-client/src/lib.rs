//! Client
//!
//! Conversation facade for one signed-in user: room switching, optimistic
//! sends, edits, reactions, history paging, typing and online presence.
//!
//! # Architecture
//!
//! The conversation follows the same Sans-IO and action-based patterns as
//! [`huddle_core`]. It receives events ([`ConversationEvent`]), processes them
//! through pure state machine logic, and returns actions
//! ([`ConversationAction`]) for the caller to execute against the backend.
//!
//! # Components
//!
//! - [`Conversation`]: Top-level state machine for one session
//! - [`ConversationEvent`]: User intents and collaborator results
//! - [`ConversationAction`]: Effects for the caller to execute
//! - [`ConversationView`]: Owned snapshot for rendering

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conversation;
mod error;
mod event;
mod view;

pub use config::{ConversationConfig, DEFAULT_SEND_TIMEOUT};
pub use conversation::{Conversation, UserProfile};
pub use error::ConversationError;
pub use event::{ConversationAction, ConversationEvent, Notice, WriteId};
pub use huddle_core::env::Environment;
pub use view::ConversationView;
