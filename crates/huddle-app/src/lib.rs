//! Application runtime
//!
//! Async glue between a UI, the [`huddle_client::Conversation`] state machine
//! and the backend collaborators.
//!
//! # Architecture
//!
//! ```text
//! UI ──Command──► Runtime ──event──► Conversation
//!  ▲                 │                   │
//!  │              spawn ◄────action──────┘
//!  │                 ▼
//!  │            Collaborators ──Completion──► Runtime
//!  └──view / Signal──┘
//! ```
//!
//! - [`Runtime`]: `tokio::select!` event loop owning the conversation
//! - [`RuntimeHandle`]: Command sender, view watcher and signal receiver
//! - [`Persistence`], [`LiveStream`], [`PresenceChannel`], [`Identity`]:
//!   Backend seams
//! - [`SystemEnv`]: Production environment

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
mod command;
mod config;
mod error;
mod runtime;
mod system_env;

pub use collaborators::{
    Collaborators, Completion, EventSink, Identity, LiveStream, Persistence, PresenceChannel,
    PresenceSink, PresenceWatchHandle,
};
pub use command::{Command, Signal};
pub use config::{DEFAULT_COMMAND_BUFFER, DEFAULT_TICK_INTERVAL, RuntimeConfig};
pub use error::RuntimeError;
pub use runtime::{Runtime, RuntimeHandle};
pub use system_env::SystemEnv;
