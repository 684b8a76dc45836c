//! Environment abstraction for deterministic testing.
//!
//! Decouples engine logic from system resources (time, randomness). The
//! simulation harness provides a virtual clock and seeded RNG; production uses
//! the system clock.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Instant bounds shared by every time-driven component.
///
/// Satisfied by `std::time::Instant` and by the harness' virtual instant.
pub trait InstantLike:
    Copy + Ord + Send + Sync + Debug + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

impl<T> InstantLike for T where
    T: Copy + Ord + Send + Sync + Debug + Sub<Output = Duration> + Add<Duration, Output = T>
{
}

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `unix_millis()` advances with `now()` (it is only used for display
///   timestamps, never for timeouts)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use a virtual instant.
    type Instant: InstantLike;

    /// Current time (monotonic). All deadlines are computed from this.
    fn now(&self) -> Self::Instant;

    /// Wall-clock time in Unix milliseconds.
    ///
    /// Used for provisional `created_at` on optimistic messages and for
    /// presence announcements.
    fn unix_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by runtime code (not engine logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
