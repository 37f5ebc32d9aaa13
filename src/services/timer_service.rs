use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    services::{
        betting_service::{Terminal, publish_terminal},
        sse_events,
    },
    state::{
        AppState, SharedState, session::SessionId, shutdown_requested,
        state_machine::SessionStatus,
        timer::TimerSignal,
    },
};

/// Turn timer deadlines into engine transitions until shutdown.
pub async fn run_dispatcher(state: SharedState, mut signals: mpsc::UnboundedReceiver<TimerSignal>) {
    let mut shutdown = state.shutdown_watcher();
    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            signal = signals.recv() => match signal {
                Some(signal) => handle_signal(&state, signal).await,
                None => break,
            },
        }
    }
    debug!("timer dispatcher stopped");
}

/// Apply one timer signal to the engine.
pub async fn handle_signal(state: &AppState, signal: TimerSignal) {
    match signal {
        TimerSignal::Progress {
            session_id,
            remaining,
        } => {
            let open = state
                .read(|book| {
                    book.session(session_id)
                        .is_some_and(|session| session.status() == SessionStatus::Open)
                })
                .await;
            if open {
                sse_events::broadcast_timer_progress(state, session_id, remaining.as_secs());
            }
        }
        TimerSignal::Lock(session_id) => lock_on_deadline(state, session_id).await,
        TimerSignal::Close(session_id) => expire_on_deadline(state, session_id).await,
    }
}

async fn lock_on_deadline(state: &AppState, session_id: SessionId) {
    let result = state
        .mutate("timer_lock", |book| {
            // an admin may have resolved the session before the deadline
            let terminal = book
                .session(session_id)
                .is_some_and(|session| session.status().is_terminal());
            if terminal {
                return Ok(false);
            }
            let changed = book.lock_resolved(session_id)?;
            if changed {
                sse_events::broadcast_session_locked(state, session_id, true);
            }
            Ok(changed)
        })
        .await;
    match result {
        Ok(true) => info!(session_id, "betting locked by timer"),
        Ok(false) => debug!(session_id, "lock deadline reached; nothing to lock"),
        Err(err) => warn!(session_id, error = %err, "timer lock failed"),
    }
}

async fn expire_on_deadline(state: &AppState, session_id: SessionId) {
    let result = state
        .mutate("timer_close", |book| {
            let report = book.expire_if_locked(session_id)?;
            if let Some(report) = &report {
                publish_terminal(
                    state,
                    book,
                    session_id,
                    Terminal::Expired {
                        report,
                        by_timer: true,
                    },
                );
            }
            Ok(report)
        })
        .await;
    match result {
        Ok(Some(report)) => {
            state.debouncer().cancel_session(session_id);
            info!(
                session_id,
                refunded = report.total_refunded,
                "session expired by timer"
            );
        }
        Ok(None) => debug!(session_id, "close deadline reached; session no longer locked"),
        Err(err) => warn!(session_id, error = %err, "timer close failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dto::{
            admin::{DeclareWinnerRequest, OpenSessionRequest, TimerRequest},
            betting::PlaceBetRequest,
        },
        services::betting_service,
        state::tests::test_state,
    };

    fn timed(lock_after_secs: u64, close_after_secs: Option<u64>) -> OpenSessionRequest {
        OpenSessionRequest {
            contestants: vec!["Alice".into(), "Bob".into()],
            title: None,
            creator_id: None,
            channel_id: None,
            timer: Some(TimerRequest {
                lock_after_secs,
                close_after_secs,
                update_interval_secs: Some(5),
            }),
        }
    }

    async fn status(state: &SharedState, id: SessionId) -> Option<SessionStatus> {
        state
            .read(|book| book.session(id).map(|session| session.status()))
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn deadlines_lock_then_expire() {
        let (state, channels, _store) = test_state();
        let dispatcher = tokio::spawn(run_dispatcher(state.clone(), channels.timer_signals));
        let mut events = state.public_sse().subscribe();

        let id = betting_service::open_session(&state, timed(12, Some(30)))
            .await
            .unwrap()
            .id;
        betting_service::place_bet(
            &state,
            PlaceBetRequest {
                session: None,
                user_id: "u1".into(),
                contestant: "Bob".into(),
                amount: 40,
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(status(&state, id).await, Some(SessionStatus::Locked));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(status(&state, id).await, Some(SessionStatus::Expired));
        assert_eq!(state.read(|book| book.ledger.get_balance("u1")).await, 1_000);

        let names: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| event.event)
            .collect();
        assert_eq!(
            names.iter().filter(|name| *name == "timer.progress").count(),
            2
        );
        assert!(names.contains(&"session.locked".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("session.expired"));

        state.begin_shutdown();
        dispatcher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn close_deadline_spares_resolved_session() {
        let (state, channels, _store) = test_state();
        let dispatcher = tokio::spawn(run_dispatcher(state.clone(), channels.timer_signals));
        let id = betting_service::open_session(&state, timed(5, Some(20)))
            .await
            .unwrap()
            .id;

        tokio::time::sleep(Duration::from_secs(6)).await;
        betting_service::declare_winner(
            &state,
            DeclareWinnerRequest {
                session: Some(id.to_string()),
                contestant: "Alice".into(),
                actor: None,
            },
        )
        .await
        .unwrap();
        assert!(!state.timers().is_scheduled(id));

        // a stale close signal must not touch the resolved session
        handle_signal(&state, TimerSignal::Close(id)).await;
        handle_signal(&state, TimerSignal::Lock(id)).await;
        assert_eq!(status(&state, id).await, Some(SessionStatus::Resolved));

        state.begin_shutdown();
        dispatcher.await.unwrap();
    }
}
