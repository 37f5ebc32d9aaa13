use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    dao::storage::StorageResult,
    state::{AppState, SharedState, shutdown_requested},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Watch the snapshot store, flushing the latest state once it becomes writable again.
pub async fn run(state: SharedState) {
    let mut shutdown = state.shutdown_watcher();
    let mut degraded = state.degraded_watcher();
    let mut delay = INITIAL_DELAY;

    loop {
        if state.is_degraded() {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = sleep(delay) => {}
            }
            match recover(&state).await {
                Ok(revision) => {
                    info!(revision, "storage reachable again; pending snapshot flushed");
                    delay = INITIAL_DELAY;
                }
                Err(err) => {
                    warn!(error = %err, retry_in = ?delay, "storage still unavailable");
                    delay = (delay * 2).min(MAX_DELAY);
                }
            }
        } else {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = degraded.changed() => {}
                _ = sleep(HEALTH_POLL_INTERVAL) => {
                    if let Err(err) = state.store().health_check().await {
                        warn!(error = %err, "storage health check failed");
                        state.set_degraded(true, Some(err.to_string()));
                    }
                }
            }
        }
    }
    debug!("storage supervisor stopped");
}

/// Probe the store, then persist whatever the engine holds.
pub async fn recover(state: &AppState) -> StorageResult<u64> {
    state.store().health_check().await?;
    let revision = state.flush().await?;
    state.set_degraded(false, None);
    Ok(revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{session::Provenance, tests::test_state};

    #[tokio::test(start_paused = true)]
    async fn supervisor_flushes_after_outage() {
        let (state, _channels, store) = test_state();
        let supervisor = tokio::spawn(run(state.clone()));

        store.set_failing(true);
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
            .unwrap();
        assert!(state.is_degraded());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(state.is_degraded());
        assert_eq!(store.save_count(), 0);

        store.set_failing(false);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!state.is_degraded());
        assert_eq!(store.current().map(|doc| doc.revision), Some(1));

        state.begin_shutdown();
        supervisor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_health_check_enters_degraded_mode() {
        let (state, _channels, store) = test_state();
        let supervisor = tokio::spawn(run(state.clone()));

        store.set_failing(true);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(state.is_degraded());

        store.set_failing(false);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!state.is_degraded());

        state.begin_shutdown();
        supervisor.await.unwrap();
    }
}
