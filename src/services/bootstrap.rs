use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    dao::{
        migration::upgrade,
        models::{SnapshotDocument, StoredDocument},
        snapshot_store::SnapshotStore,
        storage::StorageResult,
    },
    state::{AppState, book::BettingBook},
};

/// Reads attempted before an unreachable store aborts startup.
const LOAD_ATTEMPTS: u32 = 4;
const LOAD_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Where the restored state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The primary snapshot.
    Primary,
    /// The newest readable backup.
    Backup,
    /// Nothing usable; started from scratch.
    Empty,
}

/// Summary of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Where the document came from.
    pub source: SnapshotSource,
    /// The snapshot was in the single-session legacy shape.
    pub migrated: bool,
    /// Sessions restored, historical ones included.
    pub sessions: usize,
    /// Sessions still open or locked.
    pub active: usize,
    /// Countdowns re-armed.
    pub timers: usize,
}

/// Load the engine from the store, falling back to the newest backup, then to an empty state.
///
/// Only a missing or corrupt primary triggers the fallback. A store that stays unreachable
/// fails the restore and nothing is written over it.
/// Active sessions get their countdown re-armed; overdue deadlines fire right away.
pub async fn restore(state: &AppState) -> StorageResult<RestoreReport> {
    let (document, source) = load_document(state).await?;
    let migrated = matches!(document, Some(StoredDocument::Legacy(_)));
    let durable = source == SnapshotSource::Primary && !migrated;

    let snapshot = document
        .map(|document| upgrade(document, state.config().timer.update_interval))
        .unwrap_or_else(SnapshotDocument::empty);
    let book = BettingBook::from_snapshot(state.config().starting_balance, snapshot);

    let timers: Vec<_> = book
        .registry
        .active_ids()
        .filter_map(|id| Some((id, *book.session(id)?.timer()?)))
        .collect();
    let active: Vec<_> = book.registry.active_ids().collect();
    let report = RestoreReport {
        source,
        migrated,
        sessions: book.registry.sessions().count(),
        active: active.len(),
        timers: timers.len(),
    };
    if let Some(legacy) = book.registry.legacy_session() {
        info!(session_id = legacy, "legacy compatibility mode enabled");
    }

    // the engine must be in place before a deadline can fire
    state.install_book(book, durable).await;
    if !durable {
        if let Err(err) = state.flush().await {
            warn!(error = %err, "failed to write restored snapshot; running degraded");
        }
    }
    for session_id in active {
        state.live().mark_dirty(session_id);
    }
    for (session_id, timer) in &timers {
        state.timers().schedule(*session_id, timer);
    }

    info!(
        source = ?report.source,
        migrated = report.migrated,
        sessions = report.sessions,
        active = report.active,
        timers = report.timers,
        "betting state restored"
    );
    Ok(report)
}

async fn load_document(
    state: &AppState,
) -> StorageResult<(Option<StoredDocument>, SnapshotSource)> {
    let store = state.store();
    match with_retries(&**store, "primary", |store| store.load()).await {
        Ok(Some(document)) => return Ok((Some(document), SnapshotSource::Primary)),
        Ok(None) => {}
        Err(err) if err.is_corrupt() => warn!(
            store = %store.describe(),
            error = %err,
            "primary snapshot corrupt; trying backups"
        ),
        Err(err) => return Err(err),
    }

    match with_retries(&**store, "backup", |store| store.load_backup()).await {
        Ok(Some(document)) => {
            warn!(store = %store.describe(), "restored from backup snapshot");
            Ok((Some(document), SnapshotSource::Backup))
        }
        Ok(None) => Ok((None, SnapshotSource::Empty)),
        Err(err) if err.is_corrupt() => {
            warn!(error = %err, "no usable backup; starting empty");
            Ok((None, SnapshotSource::Empty))
        }
        Err(err) => Err(err),
    }
}

/// Retry `load` while the store reports itself unavailable.
async fn with_retries<F>(
    store: &dyn SnapshotStore,
    slot: &'static str,
    load: F,
) -> StorageResult<Option<StoredDocument>>
where
    F: Fn(&dyn SnapshotStore) -> BoxFuture<'static, StorageResult<Option<StoredDocument>>>,
{
    let mut attempt = 1;
    loop {
        match load(store).await {
            Err(err) if !err.is_corrupt() && attempt < LOAD_ATTEMPTS => {
                let delay = LOAD_RETRY_DELAY * attempt;
                warn!(slot, attempt, retry_in = ?delay, error = %err, "snapshot store unreachable");
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) if !err.is_corrupt() => {
                error!(
                    slot,
                    attempts = attempt,
                    error = %err,
                    "snapshot store unreachable; refusing to start"
                );
                return Err(err);
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::snapshot_store::MemorySnapshotStore,
        services::timer_service,
        state::{
            session::{BetSource, Provenance},
            state_machine::SessionStatus,
            tests::test_state,
            timer::TimerSignal,
        },
    };

    fn state_over(store: MemorySnapshotStore) -> crate::state::SharedState {
        let mut config = AppConfig::default();
        config.starting_balance = 1_000;
        AppState::new(config, Arc::new(store)).0
    }

    #[tokio::test]
    async fn empty_store_starts_fresh_and_writes_snapshot() {
        let (state, _channels, store) = test_state();
        let report = restore(&state).await.unwrap();
        assert_eq!(report.source, SnapshotSource::Empty);
        assert_eq!(report.sessions, 0);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn saved_state_survives_restart() {
        let (state, _channels, store) = test_state();
        state
            .mutate("seed", |book| {
                let id = book.open_session(
                    ["Alice".into(), "Bob".into()],
                    None,
                    Provenance::default(),
                    None,
                )?;
                book.place_bet(Some(id.into()), "u1", "bob", 75, BetSource::Manual, None)
            })
            .await
            .unwrap();

        let restarted = state_over(store.clone());
        let report = restore(&restarted).await.unwrap();
        assert_eq!(report.source, SnapshotSource::Primary);
        assert_eq!(report.active, 1);
        assert_eq!(store.save_count(), 1);
        let balance = restarted.read(|book| book.ledger.get_balance("u1")).await;
        assert_eq!(balance, 925);
        assert_eq!(restarted.saved_revision().await, 1);
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_empty() {
        let store = MemorySnapshotStore::new(3).with_primary("{ not json");
        let state = state_over(store.clone());
        let report = restore(&state).await.unwrap();
        assert_eq!(report.source, SnapshotSource::Empty);
        assert!(store.current().is_some());
    }

    #[tokio::test]
    async fn corrupt_primary_falls_back_to_backup() {
        let (state, _channels, store) = test_state();
        for user in ["u1", "u2"] {
            state
                .mutate("seed", |book| {
                    book.ledger.set_balance(user, 42);
                    Ok(())
                })
                .await
                .unwrap();
        }
        let store = store.with_primary("{ not json");

        let restarted = state_over(store);
        let report = restore(&restarted).await.unwrap();
        assert_eq!(report.source, SnapshotSource::Backup);
        let balances = restarted
            .read(|book| (book.ledger.get_balance("u1"), book.ledger.get_balance("u2")))
            .await;
        assert_eq!(balances, (42, 1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_store_fails_without_touching_the_primary() {
        let (state, _channels, store) = test_state();
        state
            .mutate("seed", |book| {
                book.ledger.set_balance("u1", 42);
                Ok(())
            })
            .await
            .unwrap();
        store.set_failing(true);

        let restarted = state_over(store.clone());
        let err = restore(&restarted).await.unwrap_err();
        assert!(!err.is_corrupt());
        assert_eq!(store.save_count(), 1);

        store.set_failing(false);
        assert_eq!(store.current().map(|doc| doc.balances["u1"]), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn store_recovering_during_retries_restores_the_primary() {
        let (state, _channels, store) = test_state();
        state
            .mutate("seed", |book| {
                book.ledger.set_balance("u1", 42);
                Ok(())
            })
            .await
            .unwrap();
        store.set_failing(true);

        let restarted = state_over(store.clone());
        let heal = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(LOAD_RETRY_DELAY).await;
                store.set_failing(false);
            })
        };
        let report = restore(&restarted).await.unwrap();
        heal.await.unwrap();
        assert_eq!(report.source, SnapshotSource::Primary);
        assert_eq!(restarted.read(|book| book.ledger.get_balance("u1")).await, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_document_is_migrated_and_overdue_timer_locks() {
        let legacy = r#"{
            "balances": {"u1": 400, "u2": 900},
            "betting": {
                "open": true,
                "locked": false,
                "contestants": {"1": "Alice", "2": "Bob"},
                "bets": {"u1": {"choice": "alice", "amount": 100, "emoji": null}}
            },
            "timer_end_time": 1.0
        }"#;
        let store = MemorySnapshotStore::new(3).with_primary(legacy);
        let mut config = AppConfig::default();
        config.starting_balance = 1_000;
        let (state, mut channels) = AppState::new(config, Arc::new(store.clone()));

        let report = restore(&state).await.unwrap();
        assert!(report.migrated);
        assert_eq!(report.timers, 1);
        assert_eq!(store.current().map(|doc| doc.legacy_session), Some(Some(1)));

        let signal = tokio::time::timeout(Duration::from_secs(1), channels.timer_signals.recv())
            .await
            .unwrap();
        assert_eq!(signal, Some(TimerSignal::Lock(1)));

        timer_service::handle_signal(&state, TimerSignal::Lock(1)).await;
        let (status, resolved) = state
            .read(|book| {
                (
                    book.session(1).map(|session| session.status()),
                    book.resolve(None),
                )
            })
            .await;
        assert_eq!(status, Some(SessionStatus::Locked));
        assert_eq!(resolved, Ok(1));
        assert_eq!(state.read(|book| book.ledger.get_balance("u1")).await, 400);
    }
}
