//! Live subscription manager.
//!
//! Holds at most one live stream subscription, bound to the active room and
//! epoch. Pure state machine: methods take time as input and return
//! [`SubscriptionAction`]s.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ activate ┌─────────────┐  opened   ┌──────┐
//! │ Idle │─────────>│ Subscribing │──────────>│ Live │
//! └──────┘          └─────────────┘           └──────┘
//!    ^                 │       ^                  │
//!    │ deactivate      │failed │ retry due        │ dropped
//!    │                 v       │                  v
//!    │              ┌──────────────┐              │
//!    └──────────────│ Reconnecting │<─────────────┘
//!                   └──────────────┘
//! ```
//!
//! Leaving `Live` always emits `Close` for the old handle before anything
//! else, so two subscriptions are never open at once. Handles that arrive for
//! an epoch that is no longer current are closed immediately.

use std::time::{Duration, Instant};

use huddle_proto::{RoomId, StreamEvent};

use crate::{env::InstantLike, epoch::Epoch};

/// First reconnect delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Reconnect delay cap.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Reconnect backoff configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound for the delay
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base: DEFAULT_BACKOFF_BASE, max: DEFAULT_BACKOFF_MAX }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`,
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Opaque handle of an open stream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub u64);

/// Subscription state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState<I> {
    /// No subscription
    Idle,
    /// Open requested, waiting for the handle
    Subscribing {
        /// Room being subscribed
        room_id: RoomId,
        /// Activation epoch
        epoch: Epoch,
        /// Failed attempts so far
        attempt: u32,
    },
    /// Stream open and delivering
    Live {
        /// Subscribed room
        room_id: RoomId,
        /// Activation epoch
        epoch: Epoch,
        /// Stream handle
        handle: SubscriptionHandle,
    },
    /// Waiting to retry after a failure or drop
    Reconnecting {
        /// Room to resubscribe
        room_id: RoomId,
        /// Activation epoch
        epoch: Epoch,
        /// Failed attempts so far
        attempt: u32,
        /// When the next open is due
        retry_at: I,
    },
}

/// Coarse state, for views and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SubscriptionPhase {
    /// No subscription
    #[default]
    Idle,
    /// Opening
    Subscribing,
    /// Delivering events
    Live,
    /// Backing off
    Reconnecting,
}

/// Actions returned by the subscription manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Open a stream for `room_id`; report back with the same epoch
    Open {
        /// Room to subscribe
        room_id: RoomId,
        /// Activation epoch
        epoch: Epoch,
    },

    /// Close a stream
    Close {
        /// Handle to release
        handle: SubscriptionHandle,
    },

    /// Stream reopened after a gap; reload the newest history page
    Resync {
        /// Room to resync
        room_id: RoomId,
        /// Activation epoch
        epoch: Epoch,
    },
}

/// Live subscription state machine.
#[derive(Debug, Clone)]
pub struct SubscriptionManager<I = Instant>
where
    I: InstantLike,
{
    config: BackoffConfig,
    state: SubscriptionState<I>,
}

impl<I> SubscriptionManager<I>
where
    I: InstantLike,
{
    /// Create an idle manager.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, state: SubscriptionState::Idle }
    }

    /// Current state.
    pub fn state(&self) -> &SubscriptionState<I> {
        &self.state
    }

    /// Coarse state.
    pub fn phase(&self) -> SubscriptionPhase {
        match self.state {
            SubscriptionState::Idle => SubscriptionPhase::Idle,
            SubscriptionState::Subscribing { .. } => SubscriptionPhase::Subscribing,
            SubscriptionState::Live { .. } => SubscriptionPhase::Live,
            SubscriptionState::Reconnecting { .. } => SubscriptionPhase::Reconnecting,
        }
    }

    /// Room the manager is bound to, in any non-idle state.
    pub fn room(&self) -> Option<&RoomId> {
        match &self.state {
            SubscriptionState::Idle => None,
            SubscriptionState::Subscribing { room_id, .. }
            | SubscriptionState::Live { room_id, .. }
            | SubscriptionState::Reconnecting { room_id, .. } => Some(room_id),
        }
    }

    /// Live handle, if any.
    pub fn handle(&self) -> Option<SubscriptionHandle> {
        match self.state {
            SubscriptionState::Live { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Bind to `room_id` under `epoch`, tearing down any current stream first.
    pub fn activate(&mut self, room_id: &RoomId, epoch: Epoch) -> Vec<SubscriptionAction> {
        let mut actions = self.teardown();
        tracing::info!(room = %room_id, %epoch, "subscribing");
        self.state = SubscriptionState::Subscribing { room_id: room_id.clone(), epoch, attempt: 0 };
        actions.push(SubscriptionAction::Open { room_id: room_id.clone(), epoch });
        actions
    }

    /// Release the current stream and go idle.
    pub fn deactivate(&mut self) -> Vec<SubscriptionAction> {
        self.teardown()
    }

    /// A stream opened for `epoch`.
    pub fn on_opened(&mut self, epoch: Epoch, handle: SubscriptionHandle) -> Vec<SubscriptionAction> {
        match &self.state {
            SubscriptionState::Subscribing { room_id, epoch: current, attempt } if *current == epoch => {
                let room_id = room_id.clone();
                let reconnected = *attempt > 0;
                tracing::info!(room = %room_id, %epoch, "subscription live");
                self.state = SubscriptionState::Live { room_id: room_id.clone(), epoch, handle };
                if reconnected {
                    vec![SubscriptionAction::Resync { room_id, epoch }]
                } else {
                    Vec::new()
                }
            },
            _ => {
                tracing::debug!(%epoch, ?handle, "closing late subscription");
                vec![SubscriptionAction::Close { handle }]
            },
        }
    }

    /// Opening a stream for `epoch` failed.
    pub fn on_open_failed(&mut self, epoch: Epoch, reason: &str, now: I) -> Vec<SubscriptionAction> {
        if let SubscriptionState::Subscribing { room_id, epoch: current, attempt } = &self.state
            && *current == epoch
        {
            let (room_id, attempt) = (room_id.clone(), *attempt + 1);
            tracing::warn!(room = %room_id, attempt, reason, "subscription failed");
            self.schedule_retry(room_id, epoch, attempt, now);
        }
        Vec::new()
    }

    /// The live stream for `epoch` dropped.
    pub fn on_dropped(&mut self, epoch: Epoch, now: I) -> Vec<SubscriptionAction> {
        if let SubscriptionState::Live { room_id, epoch: current, handle } = &self.state
            && *current == epoch
        {
            let (room_id, handle) = (room_id.clone(), *handle);
            tracing::warn!(room = %room_id, "stream dropped");
            self.schedule_retry(room_id, epoch, 1, now);
            return vec![SubscriptionAction::Close { handle }];
        }
        Vec::new()
    }

    /// Filter an inbound event. Returns the room it belongs to when it was
    /// delivered by the live stream of `epoch`.
    pub fn on_event(&self, epoch: Epoch, event: StreamEvent) -> Option<(RoomId, StreamEvent)> {
        match &self.state {
            SubscriptionState::Live { room_id, epoch: current, .. } if *current == epoch => {
                Some((room_id.clone(), event))
            },
            _ => {
                tracing::debug!(%epoch, tag = event.tag(), "dropping event from inactive stream");
                None
            },
        }
    }

    /// Fire a due reconnect.
    pub fn on_tick(&mut self, now: I) -> Vec<SubscriptionAction> {
        match &self.state {
            SubscriptionState::Reconnecting { room_id, epoch, attempt, retry_at } if now >= *retry_at => {
                let (room_id, epoch, attempt) = (room_id.clone(), *epoch, *attempt);
                tracing::info!(room = %room_id, attempt, "reconnecting");
                self.state = SubscriptionState::Subscribing { room_id: room_id.clone(), epoch, attempt };
                vec![SubscriptionAction::Open { room_id, epoch }]
            },
            _ => Vec::new(),
        }
    }

    fn schedule_retry(&mut self, room_id: RoomId, epoch: Epoch, attempt: u32, now: I) {
        let delay = self.config.delay(attempt.saturating_sub(1));
        self.state = SubscriptionState::Reconnecting { room_id, epoch, attempt, retry_at: now + delay };
    }

    fn teardown(&mut self) -> Vec<SubscriptionAction> {
        let previous = std::mem::replace(&mut self.state, SubscriptionState::Idle);
        match previous {
            SubscriptionState::Live { room_id, handle, .. } => {
                tracing::info!(room = %room_id, "unsubscribing");
                vec![SubscriptionAction::Close { handle }]
            },
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use huddle_proto::{MessageDeletion, StreamEvent};

    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::public(id).unwrap()
    }

    fn event() -> StreamEvent {
        StreamEvent::Delete(MessageDeletion { id: "m1".into(), deleted_at: 1 })
    }

    fn manager() -> SubscriptionManager<Instant> {
        SubscriptionManager::new(BackoffConfig::default())
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(10), Duration::from_secs(30));
        assert_eq!(backoff.delay(64), Duration::from_secs(30));
    }

    #[test]
    fn switching_closes_before_opening() {
        let mut subs = manager();
        let e1 = Epoch::from(1);
        subs.activate(&room("a"), e1);
        subs.on_opened(e1, SubscriptionHandle(7));

        let e2 = e1.next();
        let actions = subs.activate(&room("b"), e2);
        assert_eq!(actions, [
            SubscriptionAction::Close { handle: SubscriptionHandle(7) },
            SubscriptionAction::Open { room_id: room("b"), epoch: e2 },
        ]);
    }

    #[test]
    fn late_handle_is_closed() {
        let mut subs = manager();
        subs.activate(&room("a"), Epoch::from(1));
        subs.activate(&room("b"), Epoch::from(2));

        let actions = subs.on_opened(Epoch::from(1), SubscriptionHandle(3));
        assert_eq!(actions, [SubscriptionAction::Close { handle: SubscriptionHandle(3) }]);
        assert_eq!(subs.phase(), SubscriptionPhase::Subscribing);
    }

    #[test]
    fn events_only_pass_when_live_and_current() {
        let mut subs = manager();
        let epoch = Epoch::from(1);
        subs.activate(&room("a"), epoch);
        assert!(subs.on_event(epoch, event()).is_none());

        subs.on_opened(epoch, SubscriptionHandle(1));
        assert_eq!(subs.on_event(epoch, event()).map(|(r, _)| r), Some(room("a")));
        assert!(subs.on_event(epoch.next(), event()).is_none());
    }

    #[test]
    fn drop_reconnects_with_backoff_and_resyncs() {
        let mut subs = manager();
        let epoch = Epoch::from(1);
        let t0 = Instant::now();
        subs.activate(&room("a"), epoch);
        subs.on_opened(epoch, SubscriptionHandle(1));

        let actions = subs.on_dropped(epoch, t0);
        assert_eq!(actions, [SubscriptionAction::Close { handle: SubscriptionHandle(1) }]);
        assert_eq!(subs.phase(), SubscriptionPhase::Reconnecting);

        assert!(subs.on_tick(t0 + Duration::from_millis(499)).is_empty());
        let retry = subs.on_tick(t0 + Duration::from_millis(500));
        assert_eq!(retry, [SubscriptionAction::Open { room_id: room("a"), epoch }]);

        let reopened = subs.on_opened(epoch, SubscriptionHandle(2));
        assert_eq!(reopened, [SubscriptionAction::Resync { room_id: room("a"), epoch }]);
        assert_eq!(subs.handle(), Some(SubscriptionHandle(2)));
    }

    #[test]
    fn repeated_open_failures_back_off_further() {
        let mut subs = manager();
        let epoch = Epoch::from(1);
        let t0 = Instant::now();
        subs.activate(&room("a"), epoch);

        subs.on_open_failed(epoch, "refused", t0);
        subs.on_tick(t0 + Duration::from_millis(500));
        subs.on_open_failed(epoch, "refused", t0 + Duration::from_millis(500));

        match subs.state() {
            SubscriptionState::Reconnecting { attempt, retry_at, .. } => {
                assert_eq!(*attempt, 2);
                assert_eq!(*retry_at, t0 + Duration::from_millis(1500));
            },
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn failure_for_old_epoch_is_ignored() {
        let mut subs = manager();
        subs.activate(&room("a"), Epoch::from(2));
        subs.on_open_failed(Epoch::from(1), "refused", Instant::now());
        assert_eq!(subs.phase(), SubscriptionPhase::Subscribing);
    }

    #[test]
    fn deactivate_closes_live_stream() {
        let mut subs = manager();
        let epoch = Epoch::from(1);
        subs.activate(&room("a"), epoch);
        subs.on_opened(epoch, SubscriptionHandle(9));

        assert_eq!(subs.deactivate(), [SubscriptionAction::Close { handle: SubscriptionHandle(9) }]);
        assert_eq!(subs.phase(), SubscriptionPhase::Idle);
        assert!(subs.deactivate().is_empty());
    }
}
