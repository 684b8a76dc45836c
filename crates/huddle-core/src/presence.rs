//! Presence tracker.
//!
//! Tracks two kinds of soft state over the same broadcast mechanism: the
//! global online set and per-room typing indicators. Like the other engine
//! components this is a pure state machine: methods take time as input and
//! return [`PresenceAction`]s for the runtime to execute.
//!
//! Remote state is reconciled from full snapshots delivered by the presence
//! channel. Entries are deduplicated by `(user, room)`; the newest
//! `last_seen_at` wins. A local refresh instant is recorded whenever an entry
//! changes, and entries not refreshed within the configured expiry are
//! treated as absent, so a peer that vanished without retracting its state
//! still clears.
//!
//! Local typing is debounced: every keystroke pushes the stop deadline out by
//! `typing_debounce`, re-announcements are throttled to `typing_refresh`, and
//! [`PresenceTracker::on_tick`] retracts the indicator once the deadline
//! passes.

use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};

use huddle_proto::{PresenceKey, PresenceScope, PresenceState, RoomId, UserId};

use crate::env::InstantLike;

/// Inactivity after the last keystroke before typing is retracted.
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_secs(2);

/// Minimum interval between two `is_typing: true` announcements.
pub const DEFAULT_TYPING_REFRESH: Duration = Duration::from_secs(1);

/// Age after which a remote typing entry is ignored.
pub const DEFAULT_TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Interval between online re-announcements when `online_timeout` is set.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Presence configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Local typing debounce
    pub typing_debounce: Duration,
    /// Throttle for repeated typing announcements (should be < typing_expiry)
    pub typing_refresh: Duration,
    /// Remote typing entries older than this are dropped
    pub typing_expiry: Duration,
    /// Remote online entries older than this are dropped. `None` when the
    /// transport removes departed peers itself.
    pub online_timeout: Option<Duration>,
    /// Online heartbeat, only used together with `online_timeout`
    pub heartbeat_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
            typing_refresh: DEFAULT_TYPING_REFRESH,
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            online_timeout: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Actions returned by the presence tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceAction {
    /// Publish our own state on a scope (fire-and-forget)
    Track {
        /// Target scope
        scope: PresenceScope,
        /// State to publish
        state: PresenceState,
    },

    /// Start receiving snapshots for a scope
    Watch {
        /// Scope to watch
        scope: PresenceScope,
    },

    /// Stop receiving snapshots for a scope
    Unwatch {
        /// Scope to release
        scope: PresenceScope,
    },
}

#[derive(Debug, Clone)]
struct TrackedEntry<I> {
    state: PresenceState,
    refreshed_at: I,
}

#[derive(Debug, Clone)]
struct LocalTyping<I> {
    room_id: RoomId,
    last_announce: I,
    deadline: I,
}

/// Presence state machine for one signed-in user.
#[derive(Debug, Clone)]
pub struct PresenceTracker<I = Instant>
where
    I: InstantLike,
{
    self_id: UserId,
    config: PresenceConfig,
    /// Watched scopes and their reconciled entries
    scopes: HashMap<PresenceScope, HashMap<PresenceKey, TrackedEntry<I>>>,
    /// Our own typing indicator, if announced
    typing: Option<LocalTyping<I>>,
    /// Last online announcement, `None` until [`Self::go_online`]
    last_heartbeat: Option<I>,
}

impl<I> PresenceTracker<I>
where
    I: InstantLike,
{
    /// Create a tracker for `self_id`.
    pub fn new(self_id: UserId, config: PresenceConfig) -> Self {
        Self { self_id, config, scopes: HashMap::new(), typing: None, last_heartbeat: None }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Publish `state` on `scope`.
    pub fn announce(&self, scope: PresenceScope, state: PresenceState) -> PresenceAction {
        PresenceAction::Track { scope, state }
    }

    /// Register interest in a scope. No-op if already watched.
    pub fn watch(&mut self, scope: PresenceScope) -> Vec<PresenceAction> {
        if self.scopes.contains_key(&scope) {
            return Vec::new();
        }
        self.scopes.insert(scope.clone(), HashMap::new());
        vec![PresenceAction::Watch { scope }]
    }

    /// Release a scope and forget its entries. No-op if not watched.
    pub fn unwatch(&mut self, scope: &PresenceScope) -> Vec<PresenceAction> {
        match self.scopes.remove(scope) {
            Some(_) => vec![PresenceAction::Unwatch { scope: scope.clone() }],
            None => Vec::new(),
        }
    }

    /// Whether snapshots for `scope` are currently accepted.
    pub fn is_watching(&self, scope: &PresenceScope) -> bool {
        self.scopes.contains_key(scope)
    }

    /// Scopes currently watched.
    pub fn watched(&self) -> impl Iterator<Item = &PresenceScope> {
        self.scopes.keys()
    }

    /// Announce ourselves online and watch the global scope.
    pub fn go_online(&mut self, now: I, now_ms: u64) -> Vec<PresenceAction> {
        self.last_heartbeat = Some(now);
        let mut actions = vec![
            self.announce(PresenceScope::Online, PresenceState::online(self.self_id.clone(), now_ms)),
        ];
        actions.extend(self.watch(PresenceScope::Online));
        actions
    }

    /// Reconcile a snapshot for `scope`.
    ///
    /// Returns `true` if the stored entries changed. Snapshots for scopes that
    /// are not watched are dropped.
    pub fn apply_sync(&mut self, scope: &PresenceScope, snapshot: Vec<PresenceState>, now: I) -> bool {
        let Some(entries) = self.scopes.get_mut(scope) else {
            tracing::debug!(%scope, "dropping presence sync for unwatched scope");
            return false;
        };

        let mut latest: HashMap<PresenceKey, PresenceState> = HashMap::with_capacity(snapshot.len());
        for state in snapshot {
            let key = state.key();
            match latest.get(&key) {
                Some(existing) if existing.last_seen_at >= state.last_seen_at => {},
                _ => {
                    latest.insert(key, state);
                },
            }
        }

        let mut changed = latest.len() != entries.len();
        let mut next = HashMap::with_capacity(latest.len());
        for (key, state) in latest {
            let refreshed_at = match entries.get(&key) {
                Some(previous) if previous.state == state => previous.refreshed_at,
                _ => {
                    changed = true;
                    now
                },
            };
            next.insert(key, TrackedEntry { state, refreshed_at });
        }
        *entries = next;
        changed
    }

    /// Users online at `now`, including ourselves once announced.
    pub fn online_users(&self, now: I) -> BTreeSet<UserId> {
        let Some(entries) = self.scopes.get(&PresenceScope::Online) else {
            return BTreeSet::new();
        };
        entries
            .values()
            .filter(|entry| match self.config.online_timeout {
                Some(timeout) => now - entry.refreshed_at < timeout,
                None => true,
            })
            .map(|entry| entry.state.user_id.clone())
            .collect()
    }

    /// Other users typing in `room_id` at `now`.
    pub fn typing_users(&self, room_id: &RoomId, now: I) -> BTreeSet<UserId> {
        let scope = PresenceScope::Typing(room_id.clone());
        let Some(entries) = self.scopes.get(&scope) else {
            return BTreeSet::new();
        };
        entries
            .values()
            .filter(|entry| {
                entry.state.is_typing
                    && entry.state.user_id != self.self_id
                    && entry.state.room_id.as_ref() == Some(room_id)
                    && now - entry.refreshed_at < self.config.typing_expiry
            })
            .map(|entry| entry.state.user_id.clone())
            .collect()
    }

    /// Room we currently announce typing in.
    pub fn local_typing_room(&self) -> Option<&RoomId> {
        self.typing.as_ref().map(|t| &t.room_id)
    }

    /// Register a keystroke in `room_id`.
    pub fn notify_typing(&mut self, room_id: &RoomId, now: I, now_ms: u64) -> Vec<PresenceAction> {
        let mut actions = Vec::new();
        if self.typing.as_ref().is_some_and(|t| &t.room_id != room_id) {
            actions.extend(self.stop_typing(now_ms));
        }

        let deadline = now + self.config.typing_debounce;
        match &mut self.typing {
            Some(typing) => {
                typing.deadline = deadline;
                if now - typing.last_announce >= self.config.typing_refresh {
                    typing.last_announce = now;
                    actions.push(typing_action(&self.self_id, room_id, true, now_ms));
                }
            },
            None => {
                self.typing = Some(LocalTyping { room_id: room_id.clone(), last_announce: now, deadline });
                actions.push(typing_action(&self.self_id, room_id, true, now_ms));
            },
        }
        actions
    }

    /// Retract our typing indicator, if any.
    pub fn stop_typing(&mut self, now_ms: u64) -> Vec<PresenceAction> {
        match self.typing.take() {
            Some(typing) => vec![typing_action(&self.self_id, &typing.room_id, false, now_ms)],
            None => Vec::new(),
        }
    }

    /// Fire due timers: typing debounce and online heartbeat.
    pub fn on_tick(&mut self, now: I, now_ms: u64) -> Vec<PresenceAction> {
        let mut actions = Vec::new();

        if self.typing.as_ref().is_some_and(|t| now >= t.deadline) {
            actions.extend(self.stop_typing(now_ms));
        }

        if self.config.online_timeout.is_some()
            && let Some(last) = self.last_heartbeat
            && now - last >= self.config.heartbeat_interval
        {
            self.last_heartbeat = Some(now);
            actions.push(
                self.announce(PresenceScope::Online, PresenceState::online(self.self_id.clone(), now_ms)),
            );
        }

        actions
    }

    /// Session end: retract typing and release every scope.
    pub fn shutdown(&mut self, now_ms: u64) -> Vec<PresenceAction> {
        let mut actions = self.stop_typing(now_ms);
        let mut scopes: Vec<_> = self.scopes.drain().map(|(scope, _)| scope).collect();
        scopes.sort_by_key(ToString::to_string);
        actions.extend(scopes.into_iter().map(|scope| PresenceAction::Unwatch { scope }));
        self.last_heartbeat = None;
        actions
    }
}

fn typing_action(user_id: &UserId, room_id: &RoomId, is_typing: bool, now_ms: u64) -> PresenceAction {
    PresenceAction::Track {
        scope: PresenceScope::Typing(room_id.clone()),
        state: PresenceState::typing(user_id.clone(), room_id.clone(), is_typing, now_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn room(id: &str) -> RoomId {
        RoomId::public(id).unwrap()
    }

    fn tracker() -> PresenceTracker<Instant> {
        PresenceTracker::new(user("alice"), PresenceConfig::default())
    }

    fn tracked_typing(actions: &[PresenceAction]) -> Vec<bool> {
        actions
            .iter()
            .filter_map(|a| match a {
                PresenceAction::Track { state, .. } if state.room_id.is_some() => Some(state.is_typing),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn typing_is_throttled_and_debounced() {
        let mut presence = tracker();
        let general = room("general");
        let t0 = Instant::now();

        assert_eq!(tracked_typing(&presence.notify_typing(&general, t0, 0)), [true]);
        let quiet = presence.notify_typing(&general, t0 + Duration::from_millis(300), 300);
        assert!(quiet.is_empty(), "re-announce throttled");
        let refresh = presence.notify_typing(&general, t0 + Duration::from_millis(1200), 1200);
        assert_eq!(tracked_typing(&refresh), [true]);

        // Deadline is 2 s after the last keystroke
        assert!(presence.on_tick(t0 + Duration::from_millis(3000), 3000).is_empty());
        let stop = presence.on_tick(t0 + Duration::from_millis(3200), 3200);
        assert_eq!(tracked_typing(&stop), [false]);
        assert!(presence.local_typing_room().is_none());
    }

    #[test]
    fn typing_in_another_room_retracts_the_old_one() {
        let mut presence = tracker();
        let t0 = Instant::now();
        presence.notify_typing(&room("general"), t0, 0);

        let actions = presence.notify_typing(&room("random"), t0, 0);
        assert_eq!(tracked_typing(&actions), [false, true]);
        assert_eq!(presence.local_typing_room(), Some(&room("random")));
    }

    #[test]
    fn sync_for_unwatched_scope_is_dropped() {
        let mut presence = tracker();
        let scope = PresenceScope::Typing(room("general"));
        let bob = PresenceState::typing(user("bob"), room("general"), true, 10);

        assert!(!presence.apply_sync(&scope, vec![bob], Instant::now()));
        assert!(presence.typing_users(&room("general"), Instant::now()).is_empty());
    }

    #[test]
    fn newest_entry_wins_and_self_is_excluded() {
        let mut presence = tracker();
        let general = room("general");
        let scope = PresenceScope::Typing(general.clone());
        let t0 = Instant::now();
        presence.watch(scope.clone());

        let snapshot = vec![
            PresenceState::typing(user("bob"), general.clone(), true, 20),
            PresenceState::typing(user("bob"), general.clone(), false, 10),
            PresenceState::typing(user("alice"), general.clone(), true, 20),
        ];
        assert!(presence.apply_sync(&scope, snapshot, t0));

        let typing = presence.typing_users(&general, t0);
        assert_eq!(typing.into_iter().collect::<Vec<_>>(), [user("bob")]);
    }

    #[test]
    fn remote_typing_expires_without_refresh() {
        let mut presence = tracker();
        let general = room("general");
        let scope = PresenceScope::Typing(general.clone());
        let t0 = Instant::now();
        presence.watch(scope.clone());
        presence.apply_sync(&scope, vec![PresenceState::typing(user("bob"), general.clone(), true, 1)], t0);

        // Same snapshot again does not count as a refresh
        let t1 = t0 + Duration::from_secs(2);
        assert!(!presence.apply_sync(
            &scope,
            vec![PresenceState::typing(user("bob"), general.clone(), true, 1)],
            t1
        ));
        assert_eq!(presence.typing_users(&general, t1).len(), 1);
        assert!(presence.typing_users(&general, t0 + Duration::from_secs(3)).is_empty());
    }

    #[test]
    fn online_set_follows_snapshots() {
        let mut presence = tracker();
        let t0 = Instant::now();
        let actions = presence.go_online(t0, 0);
        assert!(actions.contains(&PresenceAction::Watch { scope: PresenceScope::Online }));

        presence.apply_sync(
            &PresenceScope::Online,
            vec![PresenceState::online(user("alice"), 0), PresenceState::online(user("bob"), 0)],
            t0,
        );
        assert_eq!(presence.online_users(t0).len(), 2);

        presence.apply_sync(&PresenceScope::Online, vec![PresenceState::online(user("alice"), 0)], t0);
        assert!(!presence.online_users(t0).contains(&user("bob")));
    }

    #[test]
    fn heartbeat_only_with_online_timeout() {
        let config = PresenceConfig { online_timeout: Some(Duration::from_secs(30)), ..Default::default() };
        let mut presence = PresenceTracker::new(user("alice"), config);
        let t0 = Instant::now();
        presence.go_online(t0, 0);

        assert!(presence.on_tick(t0 + Duration::from_secs(10), 10_000).is_empty());
        let beat = presence.on_tick(t0 + Duration::from_secs(15), 15_000);
        assert!(matches!(beat.as_slice(), [PresenceAction::Track { scope: PresenceScope::Online, .. }]));

        let mut plain = tracker();
        plain.go_online(t0, 0);
        assert!(plain.on_tick(t0 + Duration::from_secs(60), 60_000).is_empty());
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut presence = tracker();
        let t0 = Instant::now();
        presence.go_online(t0, 0);
        presence.watch(PresenceScope::Typing(room("general")));
        presence.notify_typing(&room("general"), t0, 0);

        let actions = presence.shutdown(5);
        assert_eq!(tracked_typing(&actions), [false]);
        assert_eq!(actions.iter().filter(|a| matches!(a, PresenceAction::Unwatch { .. })).count(), 2);
        assert_eq!(presence.watched().count(), 0);
    }
}
