use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, trace};

use crate::{
    services::{betting_service::view_of, sse_events},
    state::{AppState, SharedState, shutdown_requested},
};

const MIN_TICK: Duration = Duration::from_millis(100);

/// Periodically push one refresh per dirty session until shutdown.
pub async fn run(state: SharedState) {
    let mut shutdown = state.shutdown_watcher();
    // interval() rejects a zero period
    let mut ticker = interval(state.live().min_spacing().max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                push_due(&state).await;
            }
        }
    }
    debug!("live update loop stopped");
}

/// Render and push every session due for a refresh. Returns how many were pushed.
///
/// Runs under the engine lock so a terminal push can never be overtaken by a stale view.
pub async fn push_due(state: &AppState) -> usize {
    state
        .read(|book| {
            let due = state.live().take_due(Instant::now());
            let mut pushed = 0;
            for session_id in due {
                match view_of(book, session_id) {
                    Some(view) => {
                        sse_events::broadcast_session_updated(state, &view);
                        pushed += 1;
                    }
                    None => state.live().forget(session_id),
                }
            }
            if pushed > 0 {
                trace!(pushed, "live updates pushed");
            }
            pushed
        })
        .await
}
