/// Balances plus sessions, mutated as one unit.
pub mod book;
/// Reaction burst collapsing.
pub mod debouncer;
/// User balances.
pub mod ledger;
/// Coalesced session refreshes.
pub mod live_update;
/// Fuzzy contestant name matching.
pub mod matching;
/// Session ids, the active set and the contestant name index.
pub mod registry;
/// One wagering round and its payout rules.
pub mod session;
mod sse;
/// Session status transitions.
pub mod state_machine;
/// Per-session lock and close countdowns.
pub mod timer;

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{error, info};

use crate::{
    config::AppConfig,
    dao::{
        models::SnapshotDocument,
        snapshot_store::SnapshotStore,
        storage::StorageResult,
    },
    error::BetError,
    services::sse_events,
};

pub use self::sse::SseHub;
use self::{
    book::BettingBook,
    debouncer::{ReactionDebouncer, ReactionIntent},
    live_update::LiveUpdates,
    sse::SseState,
    timer::{SessionTimers, TimerSignal},
};

/// State handle shared by the router and the workers.
pub type SharedState = Arc<AppState>;

/// Resolve once shutdown has been requested on `shutdown`.
///
/// The borrowed flag is released before returning, so the future can sit in a `select!`
/// of a spawned worker.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// Receiving ends of the channels feeding the background workers.
pub struct BackgroundChannels {
    /// Deadlines raised by [`SessionTimers`].
    pub timer_signals: mpsc::UnboundedReceiver<TimerSignal>,
    /// Intents released by the [`ReactionDebouncer`].
    pub reaction_intents: mpsc::UnboundedReceiver<ReactionIntent>,
}

/// Central application state: the betting engine, its store and the notification hubs.
pub struct AppState {
    config: AppConfig,
    book: Mutex<BettingBook>,
    store: Arc<dyn SnapshotStore>,
    /// Revision of the last snapshot known to be durable.
    persist_gate: Mutex<u64>,
    degraded: watch::Sender<bool>,
    sse: SseState,
    live: LiveUpdates,
    timers: SessionTimers,
    debouncer: ReactionDebouncer,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// Construct the shared state around an empty engine.
    ///
    /// The returned channels must be handed to the timer dispatcher and reaction applier.
    pub fn new(config: AppConfig, store: Arc<dyn SnapshotStore>) -> (SharedState, BackgroundChannels) {
        let (timer_tx, timer_signals) = mpsc::unbounded_channel();
        let (intent_tx, reaction_intents) = mpsc::unbounded_channel();
        let (degraded, _rx) = watch::channel(false);
        let (shutdown, _rx) = watch::channel(false);

        let state = Arc::new(Self {
            book: Mutex::new(BettingBook::new(config.starting_balance)),
            store,
            persist_gate: Mutex::new(0),
            degraded,
            sse: SseState::new(64, 16),
            live: LiveUpdates::new(config.live_update_interval),
            timers: SessionTimers::new(timer_tx),
            debouncer: ReactionDebouncer::new(
                config.debounce.primary,
                config.debounce.backup,
                intent_tx,
            ),
            shutdown,
            config,
        });

        (
            state,
            BackgroundChannels {
                timer_signals,
                reaction_intents,
            },
        )
    }

    /// Configuration loaded at startup.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Snapshot store backing the engine.
    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Broadcast hub used for the public SSE stream.
    pub fn public_sse(&self) -> &SseHub {
        self.sse.public()
    }

    /// Broadcast hub used for the admin SSE stream.
    pub fn admin_sse(&self) -> &SseHub {
        self.sse.admin()
    }

    /// Refresh scheduler.
    pub fn live(&self) -> &LiveUpdates {
        &self.live
    }

    /// Countdowns of timed sessions.
    pub fn timers(&self) -> &SessionTimers {
        &self.timers
    }

    /// Pending reaction intents.
    pub fn debouncer(&self) -> &ReactionDebouncer {
        &self.debouncer
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Subscribe to the shutdown signal of the background loops.
    pub fn shutdown_watcher(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Stop the background loops and every pending timer or debounce delay.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
        self.timers.cancel_all();
        self.debouncer.cancel_all();
    }

    /// Replace the engine with a restored one.
    ///
    /// `durable` tells whether the restored revision already sits in the primary store.
    pub async fn install_book(&self, book: BettingBook, durable: bool) {
        let revision = book.revision();
        *self.book.lock().await = book;
        *self.persist_gate.lock().await = if durable { revision } else { 0 };
    }

    /// Run a read-only closure against the engine.
    pub async fn read<T>(&self, inspect: impl FnOnce(&BettingBook) -> T) -> T {
        let book = self.book.lock().await;
        inspect(&book)
    }

    /// Run one mutating operation as an indivisible unit and persist its effects.
    ///
    /// The closure runs under the engine lock and must not await. Whatever it changed is
    /// committed even when it fails (a refunded previous bet survives an unaffordable
    /// replacement), then the snapshot is saved after the lock is released.
    pub async fn mutate<T>(
        &self,
        operation: &'static str,
        apply: impl FnOnce(&mut BettingBook) -> Result<T, BetError>,
    ) -> Result<T, BetError> {
        let (result, snapshot) = {
            let mut book = self.book.lock().await;
            let result = apply(&mut book);
            let snapshot = book.commit().map(|commit| {
                for session_id in &commit.sessions {
                    self.live.mark_dirty(*session_id);
                }
                Arc::new(book.to_snapshot())
            });
            (result, snapshot)
        };

        if let Err(err) = &result {
            if err.is_integrity() {
                error!(operation, error = %err, "integrity check failed; operation aborted");
                sse_events::broadcast_integrity_error(self, operation, err);
            }
        }

        if let Some(snapshot) = snapshot {
            // failures flip degraded mode; the supervisor retries from the in-memory state
            let _ = self.persist(snapshot).await;
        }
        result
    }

    /// Save the current engine state if it is newer than the last durable revision.
    pub async fn flush(&self) -> StorageResult<u64> {
        let snapshot = self.read(|book| Arc::new(book.to_snapshot())).await;
        let revision = snapshot.revision;
        self.persist(snapshot).await?;
        Ok(revision)
    }

    /// Revision of the last durable snapshot.
    pub async fn saved_revision(&self) -> u64 {
        *self.persist_gate.lock().await
    }

    async fn persist(&self, snapshot: Arc<SnapshotDocument>) -> StorageResult<()> {
        let mut saved = self.persist_gate.lock().await;
        if snapshot.revision <= *saved && *saved > 0 {
            return Ok(());
        }

        let revision = snapshot.revision;
        match self.store.save(snapshot).await {
            Ok(()) => {
                *saved = revision;
                drop(saved);
                self.set_degraded(false, None);
                Ok(())
            }
            Err(err) => {
                drop(saved);
                error!(
                    revision,
                    store = %self.store.describe(),
                    error = %err,
                    "failed to persist snapshot"
                );
                self.set_degraded(true, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub(crate) fn set_degraded(&self, value: bool, reason: Option<String>) {
        let previous = self.degraded.send_replace(value);
        if previous == value {
            return;
        }
        if value {
            error!(reason = ?reason, "entering degraded mode");
        } else {
            info!("storage recovered; leaving degraded mode");
        }
        sse_events::broadcast_storage_status(self, value, reason);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        dao::snapshot_store::MemorySnapshotStore,
        state::session::{BetSource, Provenance},
    };

    /// State over an in-memory store, with the background channels kept alive.
    pub(crate) fn test_state() -> (SharedState, BackgroundChannels, MemorySnapshotStore) {
        let store = MemorySnapshotStore::new(3);
        let mut config = AppConfig::default();
        config.starting_balance = 1_000;
        let (state, channels) = AppState::new(config, Arc::new(store.clone()));
        (state, channels, store)
    }

    async fn open(state: &SharedState) -> u64 {
        state
            .mutate("open", |book| {
                book.open_session(
                    ["Alice".into(), "Bob".into()],
                    None,
                    Provenance::default(),
                    None,
                )
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn mutations_are_persisted_with_increasing_revisions() {
        let (state, _channels, store) = test_state();
        open(&state).await;
        state
            .mutate("bet", |book| {
                book.place_bet(None, "u1", "alice", 100, BetSource::Manual, None)
            })
            .await
            .unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.current().unwrap().revision, 2);
        assert_eq!(state.saved_revision().await, 2);
    }

    #[tokio::test]
    async fn failed_user_operation_without_effect_saves_nothing() {
        let (state, _channels, store) = test_state();
        open(&state).await;
        let err = state
            .mutate("bet", |book| {
                book.place_bet(None, "u1", "zed", 100, BetSource::Manual, None)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BetError::UnknownContestant { .. }));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn save_failure_enters_degraded_mode_until_flush() {
        let (state, _channels, store) = test_state();
        let mut admin = state.admin_sse().subscribe();
        store.set_failing(true);
        open(&state).await;

        assert!(state.is_degraded());
        assert_eq!(admin.try_recv().unwrap().event.as_deref(), Some("storage.status"));
        assert_eq!(state.saved_revision().await, 0);

        store.set_failing(false);
        assert_eq!(state.flush().await.unwrap(), 1);
        assert!(!state.is_degraded());
        assert_eq!(store.current().unwrap().sessions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_workers_stop_on_shutdown() {
        use crate::services::{
            live_update_service, reaction_service, storage_supervisor, timer_service,
        };

        let (state, channels, _store) = test_state();
        let workers = [
            tokio::spawn(timer_service::run_dispatcher(
                state.clone(),
                channels.timer_signals,
            )),
            tokio::spawn(reaction_service::run_applier(
                state.clone(),
                channels.reaction_intents,
            )),
            tokio::spawn(live_update_service::run(state.clone())),
            tokio::spawn(storage_supervisor::run(state.clone())),
        ];

        tokio::time::sleep(std::time::Duration::from_secs(7)).await;
        state.begin_shutdown();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn committed_sessions_are_marked_dirty() {
        let (state, _channels, _store) = test_state();
        let id = open(&state).await;
        assert!(state.live().is_dirty(id));
    }
}
