use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::{debug, trace, warn};

use crate::state::session::{SessionId, TimerConfig};

/// Deadline notifications emitted by [`SessionTimers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    /// Advisory countdown tick, sent at multiples of the update interval before the lock.
    Progress {
        /// Timed session.
        session_id: SessionId,
        /// Time left until the lock deadline.
        remaining: Duration,
    },
    /// The lock deadline passed.
    Lock(SessionId),
    /// The close deadline passed.
    Close(SessionId),
}

/// Longest wait a countdown will arm for.
pub const MAX_HORIZON: Duration = Duration::from_secs(366 * 24 * 60 * 60);

struct Inner {
    tasks: DashMap<SessionId, (u64, JoinHandle<()>)>,
    generation: AtomicU64,
    signals: mpsc::UnboundedSender<TimerSignal>,
}

/// One cancellable countdown per session.
///
/// Timers only know session ids; what a deadline means is decided by whoever drains the
/// signal channel.
#[derive(Clone)]
pub struct SessionTimers {
    inner: Arc<Inner>,
}

impl SessionTimers {
    /// Timers reporting deadlines on `signals`.
    pub fn new(signals: mpsc::UnboundedSender<TimerSignal>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                generation: AtomicU64::new(0),
                signals,
            }),
        }
    }

    /// Arm (or re-arm) the countdown of `session_id`. Overdue deadlines fire immediately.
    ///
    /// Deadlines further away than [`MAX_HORIZON`] are waited for up to the horizon only.
    pub fn schedule(&self, session_id: SessionId, timer: &TimerConfig) {
        let wall_now = SystemTime::now();
        let now = Instant::now();
        let until = |at: SystemTime| {
            let wait = at.duration_since(wall_now).unwrap_or_default();
            if wait > MAX_HORIZON {
                warn!(session_id, wait_secs = wait.as_secs(), "deadline beyond timer horizon; clamped");
            }
            now + wait.min(MAX_HORIZON)
        };

        let lock_at = until(timer.lock_at);
        let close_at = timer.close_at.map(until).map(|close| close.max(lock_at));
        self.spawn(session_id, lock_at, close_at, timer.update_interval);
    }

    /// Stop every pending wait of `session_id`. Safe on fired or unknown timers.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        match self.inner.tasks.remove(&session_id) {
            Some((_, (_, handle))) => {
                let was_running = !handle.is_finished();
                handle.abort();
                debug!(session_id, was_running, "session timer cancelled");
                was_running
            }
            None => false,
        }
    }

    /// Cancel every timer, used on shutdown.
    pub fn cancel_all(&self) {
        let ids: Vec<SessionId> = self.inner.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.cancel(id);
        }
    }

    /// Whether a countdown is still waiting for `session_id`.
    pub fn is_scheduled(&self, session_id: SessionId) -> bool {
        self.inner
            .tasks
            .get(&session_id)
            .is_some_and(|entry| !entry.1.is_finished())
    }

    fn spawn(
        &self,
        session_id: SessionId,
        lock_at: Instant,
        close_at: Option<Instant>,
        update_interval: Duration,
    ) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let until_lock = lock_at.saturating_duration_since(Instant::now());
            for remaining in progress_marks(until_lock, update_interval) {
                sleep_until(lock_at - remaining).await;
                trace!(session_id, remaining_secs = remaining.as_secs(), "timer progress");
                let _ = inner.signals.send(TimerSignal::Progress {
                    session_id,
                    remaining,
                });
            }

            sleep_until(lock_at).await;
            let _ = inner.signals.send(TimerSignal::Lock(session_id));

            if let Some(close_at) = close_at {
                sleep_until(close_at).await;
                let _ = inner.signals.send(TimerSignal::Close(session_id));
            }

            inner
                .tasks
                .remove_if(&session_id, |_, (current, _)| *current == generation);
        });

        if let Some((_, previous)) = self.inner.tasks.insert(session_id, (generation, handle)) {
            previous.abort();
        }
    }
}

/// Multiples of `interval` strictly below `remaining`, largest first, produced lazily.
fn progress_marks(remaining: Duration, interval: Duration) -> impl Iterator<Item = Duration> {
    let steps = if interval.is_zero() || remaining.is_zero() {
        0
    } else {
        let steps = (remaining.as_nanos() - 1) / interval.as_nanos();
        u32::try_from(steps).unwrap_or(u32::MAX)
    };
    (1..=steps).rev().map(move |step| interval * step)
}
