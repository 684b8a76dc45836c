//! Runtime errors.

use thiserror::Error;

/// Errors from the application runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime task has stopped and no longer accepts commands.
    #[error("runtime stopped")]
    Stopped,
}
