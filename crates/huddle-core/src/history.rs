//! History loader.
//!
//! Tracks backlog fetches per room. Every request records the epoch it was
//! issued under; a completion whose epoch no longer matches the current one is
//! reported as [`HistoryOutcome::Stale`] and must be discarded by the caller.
//!
//! Older-page fetches are serialized per room: at most one in flight, and none
//! once a short page showed the room is exhausted.
//!
//! Reloading a room that already holds messages (re-entry, resync, retry)
//! remembers the newest message it held. If the fresh newest page is full and
//! starts after that message, the loader keeps fetching the pages in between
//! until one overlaps it or comes back short.

use std::collections::HashMap;

use huddle_proto::{Message, RoomId};

use crate::{epoch::Epoch, error::CollaboratorError, store::Cursor};

/// Messages requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// History configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Page size requested from persistence
    pub page_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { page_size: DEFAULT_PAGE_SIZE }
    }
}

/// Identifies one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Which page a request fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    /// Newest page (activation, resync, retry)
    Initial,
    /// Page before the oldest loaded message
    Older {
        /// Oldest loaded message
        before: Cursor,
    },
    /// Page between the newest page and the messages held before it
    Gap {
        /// Oldest message of the previous page
        before: Cursor,
    },
}

impl PageKind {
    /// Exclusive upper bound of the page, `None` for the newest page.
    pub fn before(&self) -> Option<&Cursor> {
        match self {
            Self::Initial => None,
            Self::Older { before } | Self::Gap { before } => Some(before),
        }
    }
}

/// A fetch to execute against persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Request id, echoed back in [`HistoryLoader::complete`]
    pub id: RequestId,
    /// Room to fetch
    pub room_id: RoomId,
    /// Epoch the request belongs to
    pub epoch: Epoch,
    /// Page selector
    pub kind: PageKind,
    /// Maximum messages to return
    pub limit: usize,
}

/// Load status of a room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HistoryStatus {
    /// Nothing requested yet
    #[default]
    Idle,
    /// Initial page in flight
    Loading,
    /// Initial page applied
    Ready,
    /// Last initial load failed
    Unavailable(String),
}

/// Result of completing a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Merge these messages into the store
    Apply {
        /// Target room
        room_id: RoomId,
        /// Page that was fetched
        kind: PageKind,
        /// Messages ascending by `created_at`
        messages: Vec<Message>,
        /// Next gap page to fetch
        next: Option<HistoryRequest>,
    },
    /// Issued under an older epoch, discard
    Stale,
    /// Fetch failed
    Failed {
        /// Target room
        room_id: RoomId,
        /// Page that was fetched
        kind: PageKind,
        /// Failure reported by persistence
        error: CollaboratorError,
    },
}

#[derive(Debug, Clone)]
struct InFlight {
    room_id: RoomId,
    epoch: Epoch,
    kind: PageKind,
}

#[derive(Debug, Clone, Default)]
struct RoomHistory {
    status: HistoryStatus,
    older_in_flight: bool,
    exhausted: bool,
    // Newest message known to be contiguous with the loaded history, until
    // the gap above it is closed
    since: Option<Cursor>,
}

/// History load state machine.
#[derive(Debug, Clone, Default)]
pub struct HistoryLoader {
    config: HistoryConfig,
    next_request: u64,
    in_flight: HashMap<RequestId, InFlight>,
    rooms: HashMap<RoomId, RoomHistory>,
}

impl HistoryLoader {
    /// Create a loader.
    pub fn new(config: HistoryConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Record that messages newer than `newest` may be missing from the room.
    /// An unclosed gap that starts lower is kept.
    pub fn mark_unsynced(&mut self, room_id: &RoomId, newest: Option<Cursor>) {
        let room = self.rooms.entry(room_id.clone()).or_default();
        room.since = match (room.since.take(), newest) {
            (Some(kept), Some(newest)) => Some(kept.min(newest)),
            (kept, newest) => kept.or(newest),
        };
    }

    /// Start the newest-page load for a room activation.
    ///
    /// `held` is the newest confirmed message already in the room.
    pub fn begin_initial(&mut self, room_id: &RoomId, epoch: Epoch, held: Option<Cursor>) -> HistoryRequest {
        self.mark_unsynced(room_id, held);
        let room = self.rooms.entry(room_id.clone()).or_default();
        room.status = HistoryStatus::Loading;
        self.issue(room_id, epoch, PageKind::Initial)
    }

    /// Start an older-page load. `None` if one is already in flight for the
    /// room or the room is exhausted.
    pub fn begin_older(&mut self, room_id: &RoomId, epoch: Epoch, before: Cursor) -> Option<HistoryRequest> {
        let room = self.rooms.entry(room_id.clone()).or_default();
        if room.older_in_flight || room.exhausted {
            return None;
        }
        room.older_in_flight = true;
        Some(self.issue(room_id, epoch, PageKind::Older { before }))
    }

    /// Resolve a request.
    ///
    /// Requests from a previous epoch are stale regardless of their result.
    /// Unknown request ids are stale too.
    pub fn complete(
        &mut self,
        id: RequestId,
        current_epoch: Epoch,
        result: Result<Vec<Message>, CollaboratorError>,
    ) -> HistoryOutcome {
        let Some(request) = self.in_flight.remove(&id) else {
            return HistoryOutcome::Stale;
        };
        let room = self.rooms.entry(request.room_id.clone()).or_default();
        let is_older = matches!(request.kind, PageKind::Older { .. });
        if is_older {
            room.older_in_flight = false;
        }

        if request.epoch != current_epoch {
            tracing::debug!(room = %request.room_id, epoch = %request.epoch, "discarding stale history");
            return HistoryOutcome::Stale;
        }

        let full = result.as_ref().is_ok_and(|messages| messages.len() >= self.config.page_size);
        match result {
            Ok(messages) => {
                let next = match request.kind {
                    PageKind::Older { .. } => {
                        room.exhausted = !full;
                        None
                    },
                    PageKind::Initial => {
                        room.status = HistoryStatus::Ready;
                        // Only a short initial page proves there is nothing older
                        room.exhausted = !full;
                        let next = self.continue_gap(&request.room_id, request.epoch, &messages, full);
                        // A reload still in flight may come back well above this page
                        let reloading = self
                            .in_flight
                            .values()
                            .any(|other| other.room_id == request.room_id && other.kind == PageKind::Initial);
                        if reloading {
                            self.mark_unsynced(&request.room_id, messages.last().and_then(Cursor::of));
                        }
                        next
                    },
                    PageKind::Gap { .. } => self.continue_gap(&request.room_id, request.epoch, &messages, full),
                };
                HistoryOutcome::Apply { room_id: request.room_id, kind: request.kind, messages, next }
            },
            Err(error) => {
                // A failed gap page leaves `since` in place for the retry
                if !is_older {
                    room.status = HistoryStatus::Unavailable(error.to_string());
                }
                HistoryOutcome::Failed { room_id: request.room_id, kind: request.kind, error }
            },
        }
    }

    /// Issue the next gap page if `messages` is full and starts after the
    /// newest message held when the room lost sync.
    fn continue_gap(
        &mut self,
        room_id: &RoomId,
        epoch: Epoch,
        messages: &[Message],
        full: bool,
    ) -> Option<HistoryRequest> {
        let since = self.rooms.get_mut(room_id)?.since.take()?;
        let oldest = messages.first().and_then(Cursor::of)?;
        if !full || oldest <= since {
            return None;
        }

        tracing::debug!(room = %room_id, before = %oldest.id, since = %since.id, "fetching missed history");
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.since = Some(since);
        }
        Some(self.issue(room_id, epoch, PageKind::Gap { before: oldest }))
    }

    /// Load status of a room.
    pub fn status(&self, room_id: &RoomId) -> HistoryStatus {
        self.rooms.get(room_id).map(|r| r.status.clone()).unwrap_or_default()
    }

    /// Whether every older page of the room has been loaded.
    pub fn is_exhausted(&self, room_id: &RoomId) -> bool {
        self.rooms.get(room_id).is_some_and(|r| r.exhausted)
    }

    /// Whether an older-page fetch is in flight.
    pub fn is_loading_older(&self, room_id: &RoomId) -> bool {
        self.rooms.get(room_id).is_some_and(|r| r.older_in_flight)
    }

    /// Whether messages between the newest page and the previously held ones
    /// may still be missing.
    pub fn has_gap(&self, room_id: &RoomId) -> bool {
        self.rooms.get(room_id).is_some_and(|r| r.since.is_some())
    }

    /// Whether a gap is recorded that no reload or gap page of `epoch` is
    /// working on.
    pub fn needs_reload(&self, room_id: &RoomId, epoch: Epoch) -> bool {
        self.has_gap(room_id)
            && !self.in_flight.values().any(|request| {
                request.room_id == *room_id
                    && request.epoch == epoch
                    && !matches!(request.kind, PageKind::Older { .. })
            })
    }

    /// Requests not yet completed.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    fn issue(&mut self, room_id: &RoomId, epoch: Epoch, kind: PageKind) -> HistoryRequest {
        let id = RequestId(self.next_request);
        self.next_request += 1;
        self.in_flight
            .insert(id, InFlight { room_id: room_id.clone(), epoch, kind: kind.clone() });
        HistoryRequest { id, room_id: room_id.clone(), epoch, kind, limit: self.config.page_size }
    }
}

#[cfg(test)]
mod tests {
    use huddle_proto::{MessageId, UserId};

    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::public(id).unwrap()
    }

    fn page(n: usize) -> Vec<Message> {
        page_from(0, n)
    }

    /// `n` messages starting at `created_at == start`.
    fn page_from(start: usize, n: usize) -> Vec<Message> {
        (start..start + n)
            .map(|i| Message {
                id: MessageId::Server(format!("m{i}")),
                room_id: room("general"),
                sender_id: UserId::new("bob").unwrap(),
                text: String::new(),
                created_at: i as u64,
                attachment: None,
                reactions: Vec::new(),
                edited_at: None,
                deleted_at: None,
            })
            .collect()
    }

    fn cursor() -> Cursor {
        cursor_at(0)
    }

    fn cursor_at(i: usize) -> Cursor {
        Cursor { created_at: i as u64, id: format!("m{i}") }
    }

    fn next_of(outcome: HistoryOutcome) -> Option<HistoryRequest> {
        match outcome {
            HistoryOutcome::Apply { next, .. } => next,
            other => panic!("expected a page, got {other:?}"),
        }
    }

    #[test]
    fn initial_load_marks_room_ready() {
        let mut loader = HistoryLoader::default();
        let epoch = Epoch::from(1);
        let request = loader.begin_initial(&room("general"), epoch, None);
        assert_eq!(loader.status(&room("general")), HistoryStatus::Loading);

        let outcome = loader.complete(request.id, epoch, Ok(page(2)));
        assert!(matches!(outcome, HistoryOutcome::Apply { kind: PageKind::Initial, .. }));
        assert_eq!(loader.status(&room("general")), HistoryStatus::Ready);
    }

    #[test]
    fn stale_epoch_is_discarded() {
        let mut loader = HistoryLoader::default();
        let request = loader.begin_initial(&room("general"), Epoch::from(1), None);

        let outcome = loader.complete(request.id, Epoch::from(2), Ok(page(2)));
        assert_eq!(outcome, HistoryOutcome::Stale);
        assert_eq!(loader.pending(), 0);
    }

    #[test]
    fn failure_marks_room_unavailable() {
        let mut loader = HistoryLoader::default();
        let epoch = Epoch::from(1);
        let request = loader.begin_initial(&room("general"), epoch, None);

        let outcome = loader.complete(request.id, epoch, Err(CollaboratorError::Network("down".into())));
        assert!(matches!(outcome, HistoryOutcome::Failed { .. }));
        assert!(matches!(loader.status(&room("general")), HistoryStatus::Unavailable(_)));
    }

    #[test]
    fn one_older_page_in_flight_until_exhausted() {
        let mut loader = HistoryLoader::new(HistoryConfig { page_size: 2 });
        let epoch = Epoch::from(1);
        let general = room("general");

        let first = loader.begin_older(&general, epoch, cursor()).unwrap();
        assert!(loader.begin_older(&general, epoch, cursor()).is_none());

        loader.complete(first.id, epoch, Ok(page(2)));
        let second = loader.begin_older(&general, epoch, cursor()).unwrap();
        loader.complete(second.id, epoch, Ok(page(1)));

        assert!(loader.is_exhausted(&general));
        assert!(loader.begin_older(&general, epoch, cursor()).is_none());
    }

    #[test]
    fn stale_older_page_releases_the_slot() {
        let mut loader = HistoryLoader::default();
        let general = room("general");
        let request = loader.begin_older(&general, Epoch::from(1), cursor()).unwrap();

        assert_eq!(loader.complete(request.id, Epoch::from(2), Ok(page(1))), HistoryOutcome::Stale);
        assert!(!loader.is_loading_older(&general));
        assert!(!loader.is_exhausted(&general));
    }

    #[test]
    fn full_page_after_held_messages_fetches_the_gap() {
        let mut loader = HistoryLoader::new(HistoryConfig { page_size: 2 });
        let epoch = Epoch::from(1);
        let general = room("general");

        // Held up to m2, the newest page is m9..m10
        let initial = loader.begin_initial(&general, epoch, Some(cursor_at(2)));
        let gap = next_of(loader.complete(initial.id, epoch, Ok(page_from(9, 2)))).unwrap();
        assert_eq!(gap.kind, PageKind::Gap { before: cursor_at(9) });
        assert!(loader.has_gap(&general));

        let gap = next_of(loader.complete(gap.id, epoch, Ok(page_from(7, 2)))).unwrap();
        assert_eq!(gap.kind.before(), Some(&cursor_at(7)));

        // m2 is in this page, so the timeline is contiguous again
        assert!(next_of(loader.complete(gap.id, epoch, Ok(page_from(2, 2)))).is_none());
        assert!(!loader.has_gap(&general));
        assert!(!loader.is_exhausted(&general));
        assert_eq!(loader.pending(), 0);
    }

    #[test]
    fn overlapping_or_short_initial_page_needs_no_gap() {
        let mut loader = HistoryLoader::new(HistoryConfig { page_size: 2 });
        let epoch = Epoch::from(1);
        let general = room("general");

        let request = loader.begin_initial(&general, epoch, Some(cursor_at(5)));
        assert!(next_of(loader.complete(request.id, epoch, Ok(page_from(5, 2)))).is_none());

        let request = loader.begin_initial(&general, epoch, Some(cursor_at(1)));
        assert!(next_of(loader.complete(request.id, epoch, Ok(page_from(8, 1)))).is_none());
        assert!(!loader.has_gap(&general));
        assert!(loader.is_exhausted(&general));
    }

    #[test]
    fn failed_gap_page_is_fetched_again_on_retry() {
        let mut loader = HistoryLoader::new(HistoryConfig { page_size: 2 });
        let epoch = Epoch::from(1);
        let general = room("general");

        let initial = loader.begin_initial(&general, epoch, Some(cursor_at(2)));
        let gap = next_of(loader.complete(initial.id, epoch, Ok(page_from(9, 2)))).unwrap();
        let outcome = loader.complete(gap.id, epoch, Err(CollaboratorError::Network("down".into())));
        assert!(matches!(outcome, HistoryOutcome::Failed { kind: PageKind::Gap { .. }, .. }));
        assert!(matches!(loader.status(&general), HistoryStatus::Unavailable(_)));

        // The retry already holds m9..m10, the gap still starts at m2
        assert!(loader.has_gap(&general));
        let retry = loader.begin_initial(&general, epoch, Some(cursor_at(10)));
        let gap = next_of(loader.complete(retry.id, epoch, Ok(page_from(9, 2)))).unwrap();
        assert_eq!(gap.kind, PageKind::Gap { before: cursor_at(9) });
    }

    #[test]
    fn stale_reload_keeps_the_lowest_gap_for_the_next_visit() {
        let mut loader = HistoryLoader::new(HistoryConfig { page_size: 2 });
        let general = room("general");

        let request = loader.begin_initial(&general, Epoch::from(1), Some(cursor_at(2)));
        assert_eq!(loader.complete(request.id, Epoch::from(2), Ok(page_from(9, 2))), HistoryOutcome::Stale);
        assert!(loader.has_gap(&general));

        // Acks landed up to m10 in the meantime; the gap still starts at m2
        loader.mark_unsynced(&general, Some(cursor_at(10)));
        let request = loader.begin_initial(&general, Epoch::from(3), Some(cursor_at(10)));
        let gap = next_of(loader.complete(request.id, Epoch::from(3), Ok(page_from(9, 2)))).unwrap();
        assert_eq!(gap.epoch, Epoch::from(3));
        let gap = next_of(loader.complete(gap.id, Epoch::from(3), Ok(page_from(7, 2)))).unwrap();
        assert_eq!(gap.kind.before(), Some(&cursor_at(7)));
    }

    #[test]
    fn overlapping_reloads_close_the_gap_between_their_pages() {
        let mut loader = HistoryLoader::new(HistoryConfig { page_size: 2 });
        let epoch = Epoch::from(1);
        let general = room("general");

        // First load, then a resync before it came back
        let first = loader.begin_initial(&general, epoch, None);
        let resync = loader.begin_initial(&general, epoch, None);
        assert!(next_of(loader.complete(first.id, epoch, Ok(page_from(1, 2)))).is_none());

        let gap = next_of(loader.complete(resync.id, epoch, Ok(page_from(8, 2)))).unwrap();
        assert_eq!(gap.kind, PageKind::Gap { before: cursor_at(8) });
    }

    #[test]
    fn recorded_gap_needs_a_reload_until_one_is_in_flight() {
        let mut loader = HistoryLoader::new(HistoryConfig { page_size: 2 });
        let epoch = Epoch::from(1);
        let general = room("general");
        assert!(!loader.needs_reload(&general, epoch));

        loader.mark_unsynced(&general, Some(cursor_at(4)));
        assert!(loader.needs_reload(&general, epoch));

        let request = loader.begin_initial(&general, epoch, Some(cursor_at(6)));
        assert!(!loader.needs_reload(&general, epoch));
        assert!(loader.needs_reload(&general, epoch.next()));

        // Short page: nothing left to fetch
        loader.complete(request.id, epoch, Ok(page_from(5, 1)));
        assert!(!loader.needs_reload(&general, epoch));
    }
}
