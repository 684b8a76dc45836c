//! Activation epoch.
//!
//! Every room activation bumps the epoch. Asynchronous results carry the epoch
//! they were issued under; a result whose epoch is not the current one belongs
//! to a room the user has already left and is discarded.

use std::fmt;

/// Monotonic activation counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Epoch(u64);

impl Epoch {
    /// Epoch before any activation.
    pub const ZERO: Self = Self(0);

    /// Following epoch.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Epoch {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
