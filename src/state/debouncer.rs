use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, warn};

use crate::state::{ledger::UserId, session::SessionId};

/// What a collapsed reaction burst asks the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentAction {
    /// Place (or move) the user's bet.
    Place {
        /// Contestant backed by the reaction.
        contestant_key: String,
        /// Stake placed.
        amount: u64,
        /// Emoji that triggered the bet.
        reaction_token: Option<String>,
    },
    /// The user removed the reaction identified by `reaction_token`.
    Remove {
        /// Emoji that was removed.
        reaction_token: Option<String>,
    },
}

/// The last raw reaction of one user, waiting for its burst to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionIntent {
    /// Reacting user.
    pub user_id: UserId,
    /// Session of the reacted message.
    pub session_id: SessionId,
    /// Bet to place or cancellation.
    pub action: IntentAction,
    /// Submission counter; only the latest sequence of a user is applied.
    pub sequence: u64,
    /// When the delay fired.
    pub emitted_at: SystemTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delay {
    Primary,
    Backup,
}

#[derive(Default)]
struct Handles {
    primary: Option<JoinHandle<()>>,
    backup: Option<JoinHandle<()>>,
}

impl Handles {
    fn abort(self) {
        for handle in [self.primary, self.backup].into_iter().flatten() {
            if handle.is_finished() {
                debug!("debounce delay already finished when cancelled");
            }
            handle.abort();
        }
    }
}

struct PendingSlot {
    intent: ReactionIntent,
    handles: Handles,
}

struct Inner {
    slots: DashMap<UserId, PendingSlot>,
    sequence: AtomicU64,
    primary: Duration,
    backup: Duration,
    applied: mpsc::UnboundedSender<ReactionIntent>,
}

/// Collapses bursts of reaction events into one intent per user.
///
/// Each submission replaces the user's pending intent and restarts two delays. The primary
/// delay hands the intent over; the backup delay only does so if the primary never ran.
/// A delay consumes the slot only while the slot still carries the sequence it was armed
/// for, so whichever fires second is a no-op. Consumed slots leave nothing behind.
#[derive(Clone)]
pub struct ReactionDebouncer {
    inner: Arc<Inner>,
}

impl ReactionDebouncer {
    /// Debouncer handing collapsed intents to `applied`.
    pub fn new(
        primary: Duration,
        backup: Duration,
        applied: mpsc::UnboundedSender<ReactionIntent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                sequence: AtomicU64::new(0),
                primary,
                backup: backup.max(primary),
                applied,
            }),
        }
    }

    /// Record the newest raw intent of `user_id`, superseding any pending one.
    ///
    /// Returns the sequence number assigned to the intent.
    pub fn submit(&self, user_id: &str, session_id: SessionId, action: IntentAction) -> u64 {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let intent = ReactionIntent {
            user_id: user_id.to_string(),
            session_id,
            action,
            sequence,
            emitted_at: SystemTime::now(),
        };

        let previous = self.inner.slots.insert(
            user_id.to_string(),
            PendingSlot {
                intent,
                handles: Handles::default(),
            },
        );
        if let Some(previous) = previous {
            debug!(
                user_id,
                superseded = previous.intent.sequence,
                sequence,
                "reaction intent superseded"
            );
            previous.handles.abort();
        }

        let primary = self.spawn_delay(user_id, sequence, Delay::Primary);
        let backup = self.spawn_delay(user_id, sequence, Delay::Backup);

        let mut handles = Some(Handles {
            primary: Some(primary),
            backup: Some(backup),
        });
        if let Some(mut slot) = self.inner.slots.get_mut(user_id) {
            if slot.intent.sequence == sequence {
                slot.handles = handles.take().unwrap_or_default();
            }
        }
        if let Some(handles) = handles {
            // a newer submission or a delay already took over the slot
            handles.abort();
        }
        sequence
    }

    /// Drop the pending intent of `user_id`, if any.
    pub fn cancel(&self, user_id: &str) -> bool {
        match self.inner.slots.remove(user_id) {
            Some((_, slot)) => {
                slot.handles.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending intent aimed at `session_id`. Returns how many were dropped.
    pub fn cancel_session(&self, session_id: SessionId) -> usize {
        let users: Vec<UserId> = self
            .inner
            .slots
            .iter()
            .filter(|entry| entry.value().intent.session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut dropped = 0;
        for user in users {
            let removed = self
                .inner
                .slots
                .remove_if(&user, |_, slot| slot.intent.session_id == session_id);
            if let Some((_, slot)) = removed {
                slot.handles.abort();
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(session_id, dropped, "pending reaction intents dropped with their session");
        }
        dropped
    }

    /// Drop every pending intent, used on shutdown.
    pub fn cancel_all(&self) {
        let users: Vec<UserId> = self
            .inner
            .slots
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for user in users {
            self.cancel(&user);
        }
    }

    /// Whether `user_id` still has an unconsumed intent.
    pub fn is_pending(&self, user_id: &str) -> bool {
        self.inner.slots.contains_key(user_id)
    }

    fn spawn_delay(&self, user_id: &str, sequence: u64, delay: Delay) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let user_id = user_id.to_string();
        let wait = match delay {
            Delay::Primary => inner.primary,
            Delay::Backup => inner.backup,
        };
        tokio::spawn(async move {
            sleep(wait).await;
            fire(&inner, &user_id, sequence, delay);
        })
    }
}

fn fire(inner: &Inner, user_id: &str, sequence: u64, delay: Delay) {
    let Some((_, slot)) = inner
        .slots
        .remove_if(user_id, |_, slot| slot.intent.sequence == sequence)
    else {
        return;
    };

    // the task running this code is one of the two handles; abort only the other one
    let PendingSlot { intent, handles } = slot;
    let other = match delay {
        Delay::Primary => handles.backup,
        Delay::Backup => handles.primary,
    };
    if let Some(other) = other {
        other.abort();
    }

    if delay == Delay::Backup {
        warn!(
            user_id,
            sequence, "primary debounce delay never fired; backup applying intent"
        );
    }
    if inner.applied.send(intent).is_err() {
        warn!(user_id, sequence, "reaction applier is gone; intent dropped");
    }
}
