use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;

use crate::state::session::SessionId;

#[derive(Debug, Default)]
struct Entry {
    dirty: bool,
    last_push: Option<Instant>,
    finalized: bool,
}

/// Coalesces "session changed" signals into at most one refresh per session and window.
///
/// Marking is O(1) and never blocks on the engine. Once a session is finalized its
/// terminal view has been pushed and later marks are ignored.
#[derive(Clone)]
pub struct LiveUpdates {
    entries: Arc<DashMap<SessionId, Entry>>,
    min_spacing: Duration,
}

impl LiveUpdates {
    /// Scheduler refreshing a session at most once per `min_spacing`.
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            min_spacing,
        }
    }

    /// Minimum spacing between two refreshes of one session.
    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Flag `session_id` for the next refresh.
    pub fn mark_dirty(&self, session_id: SessionId) {
        let mut entry = self.entries.entry(session_id).or_default();
        if !entry.finalized {
            entry.dirty = true;
        }
    }

    /// Sessions due for a refresh at `now`; their flags are cleared.
    pub fn take_due(&self, now: Instant) -> Vec<SessionId> {
        let mut due = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if !entry.dirty || entry.finalized {
                continue;
            }
            let spaced = entry
                .last_push
                .is_none_or(|last| now.saturating_duration_since(last) >= self.min_spacing);
            if spaced {
                entry.dirty = false;
                entry.last_push = Some(now);
                due.push(*entry.key());
            }
        }
        due.sort_unstable();
        due
    }

    /// Record that the terminal view of `session_id` was pushed; drops any pending flag.
    pub fn finalize(&self, session_id: SessionId) {
        let mut entry = self.entries.entry(session_id).or_default();
        entry.dirty = false;
        entry.finalized = true;
        entry.last_push = Some(Instant::now());
    }

    /// Whether the final rendering of the session was already queued.
    pub fn is_finalized(&self, session_id: SessionId) -> bool {
        self.entries
            .get(&session_id)
            .is_some_and(|entry| entry.finalized)
    }

    /// Whether a refresh is pending.
    pub fn is_dirty(&self, session_id: SessionId) -> bool {
        self.entries
            .get(&session_id)
            .is_some_and(|entry| entry.dirty)
    }

    /// Forget the bookkeeping of `session_id`.
    pub fn forget(&self, session_id: SessionId) {
        self.entries.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn flood_of_marks_coalesces_into_one_refresh() {
        let live = LiveUpdates::new(Duration::from_secs(5));
        for _ in 0..50 {
            live.mark_dirty(1);
        }
        live.mark_dirty(2);

        assert_eq!(live.take_due(Instant::now()), vec![1, 2]);
        assert!(live.take_due(Instant::now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_is_enforced_per_session() {
        let live = LiveUpdates::new(Duration::from_secs(5));
        live.mark_dirty(1);
        assert_eq!(live.take_due(Instant::now()), vec![1]);

        live.mark_dirty(1);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(live.take_due(Instant::now()).is_empty());
        assert!(live.is_dirty(1));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(live.take_due(Instant::now()), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn finalized_sessions_ignore_stale_marks() {
        let live = LiveUpdates::new(Duration::from_secs(5));
        live.mark_dirty(1);
        live.finalize(1);
        live.mark_dirty(1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(live.take_due(Instant::now()).is_empty());
        assert!(live.is_finalized(1));

        live.forget(1);
        assert!(!live.is_finalized(1));
    }
}
