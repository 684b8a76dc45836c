//! Deterministic simulation harness for Huddle conversation testing.
//!
//! Virtual-clock [`SimEnv`], in-memory [`SimBackend`] and a synchronous
//! [`SimSession`] driver for deterministic, reproducible tests of the
//! conversation engine under reordering, failures and reconnects.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the
//! conversation invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_backend;
pub mod sim_env;
pub mod sim_session;

pub use invariants::{
    ActiveRoomSubscribed, EpochMonotonicity, Invariant, InvariantRegistry, InvariantResult, MessageOrder,
    RoomIsolation, SessionSnapshot, SingleLiveSubscription, SystemSnapshot, UniqueMessageIds, Violation,
};
pub use sim_backend::{Fault, SimBackend};
pub use sim_env::{SIM_EPOCH_MS, SimEnv, SimInstant};
pub use sim_session::{SimSession, system_snapshot};
