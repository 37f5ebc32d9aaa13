use std::time::{Duration, SystemTime};

use tracing::info;

use crate::{
    config::TimerSettings,
    dto::{
        admin::{
            CloseResponse, DeclareWinnerRequest, LockResponse, OpenSessionRequest,
            SessionActionRequest, TimerRequest,
        },
        betting::{
            BetAllRequest, BetResponse, CancelBetRequest, CancelBetResponse, PlaceBetRequest,
            UserBetView, UserOverview, session_ref,
        },
        session::{SessionQuery, SessionSummary, SessionView},
    },
    error::{BetError, ServiceError},
    services::{settings_service, sse_events},
    state::{
        AppState,
        book::BettingBook,
        session::{
            BetReceipt, BetSource, Provenance, RefundReport, Resolution, SessionId, TimerConfig,
            unix_now,
        },
    },
};

/// How a session reached a terminal state.
pub(crate) enum Terminal<'a> {
    Resolved(&'a Resolution),
    Expired { report: &'a RefundReport, by_timer: bool },
}

/// Push the final rendering of a session. Must run under the engine lock.
///
/// The live-update entry is finalized first so no refresh queued before the transition can
/// follow the final view.
pub(crate) fn publish_terminal(
    state: &AppState,
    book: &BettingBook,
    session_id: SessionId,
    terminal: Terminal<'_>,
) {
    state.live().finalize(session_id);
    if let Some(view) = view_of(book, session_id) {
        sse_events::broadcast_session_updated(state, &view);
    }
    match terminal {
        Terminal::Resolved(resolution) => sse_events::broadcast_session_resolved(state, resolution),
        Terminal::Expired { report, by_timer } => {
            sse_events::broadcast_session_expired(state, report, by_timer)
        }
    }
}

pub(crate) fn view_of(book: &BettingBook, session_id: SessionId) -> Option<SessionView> {
    book.session(session_id).map(|session| {
        SessionView::build(
            session,
            book.registry.legacy_session() == Some(session_id),
        )
    })
}

/// Deadlines of a new session: explicit request first, timer defaults otherwise.
fn timer_for(
    defaults: &TimerSettings,
    request: Option<&TimerRequest>,
    now: SystemTime,
) -> Result<Option<TimerConfig>, ServiceError> {
    let after = |delay: Duration| {
        now.checked_add(delay).ok_or_else(|| {
            ServiceError::InvalidInput(format!("deadline {}s away is out of range", delay.as_secs()))
        })
    };
    let timer = match request {
        Some(timer) => TimerConfig {
            lock_at: after(Duration::from_secs(timer.lock_after_secs))?,
            close_at: timer
                .close_after_secs
                .map(|secs| after(Duration::from_secs(secs)))
                .transpose()?,
            update_interval: timer
                .update_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.update_interval),
        },
        None if defaults.enabled => TimerConfig {
            lock_at: after(defaults.lock_after)?,
            close_at: defaults.close_after.map(after).transpose()?,
            update_interval: defaults.update_interval,
        },
        None => return Ok(None),
    };
    Ok(Some(timer))
}

/// Open a session and arm its timer.
pub async fn open_session(
    state: &AppState,
    request: OpenSessionRequest,
) -> Result<SessionView, ServiceError> {
    let names: [String; 2] = request
        .contestants
        .into_iter()
        .map(|name| name.trim().to_string())
        .collect::<Vec<_>>()
        .try_into()
        .map_err(|_| ServiceError::InvalidInput("exactly two contestants required".into()))?;
    let defaults = settings_service::effective_timer(state).await;
    let timer = timer_for(&defaults, request.timer.as_ref(), unix_now())?;
    let provenance = Provenance {
        creator_id: request.creator_id,
        channel_id: request.channel_id,
    };
    let title = request.title.filter(|title| !title.trim().is_empty());

    let view = state
        .mutate("open_session", |book| {
            let session_id = book.open_session(names, title, provenance, timer)?;
            let view = view_of(book, session_id).ok_or(BetError::SessionNotFound {
                reference: session_id.to_string(),
            })?;
            sse_events::broadcast_session_opened(state, &view);
            Ok(view)
        })
        .await?;

    if let Some(timer) = &timer {
        state.timers().schedule(view.id, timer);
    }
    info!(session_id = view.id, title = %view.title, timed = timer.is_some(), "session opened");
    Ok(view)
}

async fn bet_response(state: &AppState, receipt: BetReceipt) -> BetResponse {
    let name = state
        .read(|book| {
            book.session(receipt.session_id)
                .and_then(|session| session.contestant_name(&receipt.bet.contestant_key))
                .map(str::to_string)
        })
        .await
        .unwrap_or_else(|| receipt.bet.contestant_key.clone());
    BetResponse::from_receipt(receipt, name)
}

/// Place or replace a manual bet.
pub async fn place_bet(
    state: &AppState,
    request: PlaceBetRequest,
) -> Result<BetResponse, ServiceError> {
    let session = session_ref(request.session.as_deref());
    let receipt = state
        .mutate("place_bet", |book| {
            book.place_bet(
                session,
                &request.user_id,
                &request.contestant,
                request.amount,
                BetSource::Manual,
                None,
            )
        })
        .await?;
    info!(
        session_id = receipt.session_id,
        user_id = %receipt.bet.user_id,
        contestant = %receipt.bet.contestant_key,
        amount = receipt.bet.amount,
        "bet placed"
    );
    Ok(bet_response(state, receipt).await)
}

/// Stake the whole available balance.
pub async fn bet_all(state: &AppState, request: BetAllRequest) -> Result<BetResponse, ServiceError> {
    let session = session_ref(request.session.as_deref());
    let receipt = state
        .mutate("bet_all", |book| {
            book.bet_all(session, &request.user_id, &request.contestant)
        })
        .await?;
    info!(
        session_id = receipt.session_id,
        user_id = %receipt.bet.user_id,
        amount = receipt.bet.amount,
        "all-in bet placed"
    );
    Ok(bet_response(state, receipt).await)
}

/// Withdraw a bet while the session is open.
pub async fn cancel_bet(
    state: &AppState,
    request: CancelBetRequest,
) -> Result<CancelBetResponse, ServiceError> {
    let session = session_ref(request.session.as_deref());
    let (session_id, refund) = state
        .mutate("cancel_bet", |book| book.cancel_bet(session, &request.user_id))
        .await?;
    info!(session_id, user_id = %refund.user_id, amount = refund.amount, "bet cancelled");
    Ok(CancelBetResponse { session_id, refund })
}

/// Stop accepting bets. Locking an already locked session succeeds without change.
pub async fn lock(
    state: &AppState,
    request: SessionActionRequest,
) -> Result<LockResponse, ServiceError> {
    let session = session_ref(request.session.as_deref());
    let (session_id, changed) = state
        .mutate("lock", |book| {
            let (session_id, changed) = book.lock(session)?;
            if changed {
                sse_events::broadcast_session_locked(state, session_id, false);
            }
            Ok((session_id, changed))
        })
        .await?;
    if changed {
        info!(session_id, actor = ?request.actor, "betting locked");
    }
    Ok(LockResponse {
        session_id,
        changed,
    })
}

/// Declare the winner of a locked session and pay out.
pub async fn declare_winner(
    state: &AppState,
    request: DeclareWinnerRequest,
) -> Result<Resolution, ServiceError> {
    let session = session_ref(request.session.as_deref());
    let resolution = state
        .mutate("declare_winner", |book| {
            let resolution = book.declare_winner(session, &request.contestant, request.actor)?;
            publish_terminal(
                state,
                book,
                resolution.session_id(),
                Terminal::Resolved(&resolution),
            );
            Ok(resolution)
        })
        .await?;
    finish(state, &resolution);
    Ok(resolution)
}

/// Lock if needed, then declare the winner.
pub async fn close_with_winner(
    state: &AppState,
    request: DeclareWinnerRequest,
) -> Result<CloseResponse, ServiceError> {
    let session = session_ref(request.session.as_deref());
    let (locked, resolution) = state
        .mutate("close_with_winner", |book| {
            let (locked, resolution) =
                book.close_with_winner(session, &request.contestant, request.actor)?;
            if locked {
                sse_events::broadcast_session_locked(state, resolution.session_id(), false);
            }
            publish_terminal(
                state,
                book,
                resolution.session_id(),
                Terminal::Resolved(&resolution),
            );
            Ok((locked, resolution))
        })
        .await?;
    finish(state, &resolution);
    Ok(CloseResponse { locked, resolution })
}

fn finish(state: &AppState, resolution: &Resolution) {
    let session_id = resolution.session_id();
    state.timers().cancel(session_id);
    state.debouncer().cancel_session(session_id);
    match resolution {
        Resolution::NoBets { winner_name, .. } => {
            info!(session_id, winner = %winner_name, "session resolved without bets")
        }
        Resolution::Settled(report) => info!(
            session_id,
            winner = %report.winner_name,
            pot = report.pot,
            paid = report.total_paid(),
            remainder = report.remainder,
            forfeited = report.forfeited,
            "session resolved"
        ),
    }
}

/// Refund every bet and expire the session.
pub async fn force_close(
    state: &AppState,
    request: SessionActionRequest,
) -> Result<RefundReport, ServiceError> {
    let session = session_ref(request.session.as_deref());
    let report = state
        .mutate("force_close", |book| {
            let report = book.force_close(session, request.actor)?;
            publish_terminal(
                state,
                book,
                report.session_id,
                Terminal::Expired {
                    report: &report,
                    by_timer: false,
                },
            );
            Ok(report)
        })
        .await?;
    state.timers().cancel(report.session_id);
    state.debouncer().cancel_session(report.session_id);
    info!(
        session_id = report.session_id,
        refunded = report.total_refunded,
        bets = report.refunds.len(),
        "session force-closed"
    );
    Ok(report)
}

/// Read-only snapshot of one session.
pub async fn session_view(
    state: &AppState,
    query: SessionQuery,
) -> Result<SessionView, ServiceError> {
    let session = session_ref(query.session.as_deref());
    let view = state
        .read(|book| {
            let session_id = book.resolve(session.as_ref())?;
            view_of(book, session_id).ok_or(BetError::SessionNotFound {
                reference: session_id.to_string(),
            })
        })
        .await?;
    Ok(view)
}

/// Every session, most recent first.
pub async fn list_sessions(state: &AppState) -> Vec<SessionSummary> {
    state
        .read(|book| {
            let mut sessions: Vec<SessionSummary> =
                book.registry.sessions().map(SessionSummary::from).collect();
            sessions.reverse();
            sessions
        })
        .await
}

/// Balance and active bets of a user.
pub async fn user_overview(state: &AppState, user_id: &str) -> Result<UserOverview, ServiceError> {
    if user_id.trim().is_empty() {
        return Err(ServiceError::InvalidInput("user id must not be blank".into()));
    }
    let overview = state
        .read(|book| UserOverview {
            user_id: user_id.to_string(),
            balance: book.ledger.get_balance(user_id),
            bets: book
                .user_bets(user_id)
                .into_iter()
                .filter_map(|(session_id, bet)| {
                    let session = book.session(session_id)?;
                    Some(UserBetView {
                        session_id,
                        title: session.title().to_string(),
                        contestant_key: bet.contestant_key.clone(),
                        contestant_name: session
                            .contestant_name(&bet.contestant_key)
                            .unwrap_or(&bet.contestant_key)
                            .to_string(),
                        amount: bet.amount,
                    })
                })
                .collect(),
        })
        .await;
    Ok(overview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::snapshot_store::MemorySnapshotStore,
        dto::settings::TimerSettingsUpdate,
        state::{
            SharedState, debouncer::IntentAction, state_machine::SessionStatus,
            tests::test_state,
        },
    };

    fn open_request(a: &str, b: &str) -> OpenSessionRequest {
        OpenSessionRequest {
            contestants: vec![a.into(), b.into()],
            title: None,
            creator_id: Some("admin".into()),
            channel_id: None,
            timer: None,
        }
    }

    fn bet(user: &str, contestant: &str, amount: i64) -> PlaceBetRequest {
        PlaceBetRequest {
            session: None,
            user_id: user.into(),
            contestant: contestant.into(),
            amount,
        }
    }

    fn winner(contestant: &str) -> DeclareWinnerRequest {
        DeclareWinnerRequest {
            session: None,
            contestant: contestant.into(),
            actor: Some("admin".into()),
        }
    }

    async fn balance(state: &SharedState, user: &str) -> u64 {
        state.read(|book| book.ledger.get_balance(user)).await
    }

    fn persisted_balance(store: &MemorySnapshotStore, user: &str) -> Option<u64> {
        store.current()?.balances.get(user).copied()
    }

    #[test]
    fn out_of_range_deadlines_are_rejected() {
        let defaults = TimerSettings {
            enabled: true,
            lock_after: Duration::MAX,
            close_after: None,
            update_interval: Duration::from_secs(5),
        };
        let err = timer_for(&defaults, None, unix_now()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let request = TimerRequest {
            lock_after_secs: 60,
            close_after_secs: Some(u64::MAX),
            update_interval_secs: None,
        };
        let err = timer_for(&defaults, Some(&request), unix_now()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_timer_defaults_apply_to_new_sessions() {
        let (state, _channels, _store) = test_state();
        let untimed = open_session(&state, open_request("Alice", "Bob")).await.unwrap();
        assert!(untimed.timer.is_none());

        settings_service::update_timer_settings(
            &state,
            TimerSettingsUpdate {
                enabled: Some(true),
                lock_after_secs: Some(30),
            },
        )
        .await
        .unwrap();
        let timed = open_session(&state, open_request("Carol", "Dave")).await.unwrap();
        let timer = timed.timer.unwrap();
        // deadline is computed just before the session is stamped
        assert!((29..=30).contains(&(timer.lock_at - timed.created_at)));
    }

    #[tokio::test]
    async fn sole_bettor_gets_stake_back() {
        let (state, _channels, store) = test_state();
        open_session(&state, open_request("Alice", "Bob")).await.unwrap();

        place_bet(&state, bet("u1", "Alice", 100)).await.unwrap();
        assert_eq!(balance(&state, "u1").await, 900);

        lock(&state, SessionActionRequest::default()).await.unwrap();
        let resolution = declare_winner(&state, winner("Alice")).await.unwrap();
        match resolution {
            Resolution::Settled(report) => {
                assert_eq!(report.pot, 100);
                assert_eq!(report.total_paid(), 100);
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
        assert_eq!(balance(&state, "u1").await, 1_000);
        assert_eq!(persisted_balance(&store, "u1"), Some(1_000));
    }

    #[tokio::test]
    async fn winner_side_takes_whole_pot() {
        let (state, _channels, _store) = test_state();
        open_session(&state, open_request("Alice", "Bob")).await.unwrap();
        place_bet(&state, bet("u1", "Alice", 100)).await.unwrap();
        place_bet(&state, bet("u2", "Bob", 300)).await.unwrap();

        lock(&state, SessionActionRequest::default()).await.unwrap();
        let Resolution::Settled(report) = declare_winner(&state, winner("alice")).await.unwrap()
        else {
            panic!("expected a settled pot");
        };
        assert_eq!(report.pot, 400);
        assert_eq!(report.remainder, 0);
        let u1 = report.payouts.iter().find(|line| line.user_id == "u1").unwrap();
        let u2 = report.payouts.iter().find(|line| line.user_id == "u2").unwrap();
        assert_eq!(u1.payout, 400);
        assert_eq!(u2.payout, 0);
        assert_eq!(balance(&state, "u1").await, 1_300);
        assert_eq!(balance(&state, "u2").await, 700);
    }

    #[tokio::test]
    async fn changing_bet_refunds_previous_stake() {
        let (state, _channels, _store) = test_state();
        state
            .mutate("seed", |book| {
                book.ledger.set_balance("u1", 100);
                Ok(())
            })
            .await
            .unwrap();
        open_session(&state, open_request("Alice", "Bob")).await.unwrap();

        place_bet(&state, bet("u1", "Alice", 100)).await.unwrap();
        assert_eq!(balance(&state, "u1").await, 0);
        let response = place_bet(&state, bet("u1", "Bob", 50)).await.unwrap();
        assert_eq!(response.previous.unwrap().amount, 100);
        assert_eq!(response.balance, 50);

        let overview = user_overview(&state, "u1").await.unwrap();
        assert_eq!(overview.bets.len(), 1);
        assert_eq!(overview.bets[0].contestant_name, "Bob");
        assert_eq!(overview.bets[0].amount, 50);
    }

    #[tokio::test]
    async fn duplicate_contestant_is_rejected() {
        let (state, _channels, _store) = test_state();
        open_session(&state, open_request("Alice", "Bob")).await.unwrap();
        let err = open_session(&state, open_request("alice", "Carol"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Betting(BetError::DuplicateContestant { .. })
        ));
    }

    #[tokio::test]
    async fn force_close_refunds_everyone_and_closes() {
        let (state, _channels, _store) = test_state();
        let view = open_session(&state, open_request("Alice", "Bob")).await.unwrap();
        place_bet(&state, bet("u1", "Alice", 100)).await.unwrap();
        place_bet(&state, bet("u2", "Bob", 250)).await.unwrap();

        let report = force_close(&state, SessionActionRequest::default()).await.unwrap();
        assert_eq!(report.total_refunded, 350);
        assert_eq!(balance(&state, "u1").await, 1_000);
        assert_eq!(balance(&state, "u2").await, 1_000);

        let mut request = bet("u1", "Alice", 10);
        request.session = Some(view.id.to_string());
        let err = place_bet(&state, request).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Betting(BetError::SessionClosed { .. })
        ));

        let status = state
            .read(|book| book.session(view.id).map(|session| session.status()))
            .await;
        assert_eq!(status, Some(SessionStatus::Expired));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_drops_pending_reactions_of_that_session() {
        let (state, _channels, _store) = test_state();
        let first = open_session(&state, open_request("Alice", "Bob")).await.unwrap();
        let second = open_session(&state, open_request("Carol", "Dave")).await.unwrap();
        let intent = |key: &str| IntentAction::Place {
            contestant_key: key.into(),
            amount: 100,
            reaction_token: None,
        };
        state.debouncer().submit("u1", first.id, intent("c1"));
        state.debouncer().submit("u2", second.id, intent("c2"));

        let mut request = SessionActionRequest::default();
        request.session = Some(first.id.to_string());
        force_close(&state, request).await.unwrap();
        assert!(!state.debouncer().is_pending("u1"));
        assert!(state.debouncer().is_pending("u2"));

        declare_after_lock(&state, second.id).await;
        assert!(!state.debouncer().is_pending("u2"));
    }

    async fn declare_after_lock(state: &SharedState, session_id: SessionId) {
        let mut request = winner("Carol");
        request.session = Some(session_id.to_string());
        close_with_winner(state, request).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_push_is_final() {
        let (state, _channels, _store) = test_state();
        let mut events = state.public_sse().subscribe();
        let view = open_session(&state, open_request("Alice", "Bob")).await.unwrap();
        place_bet(&state, bet("u1", "Alice", 100)).await.unwrap();
        close_with_winner(&state, winner("Bob")).await.unwrap();

        assert!(state.live().is_finalized(view.id));
        state.live().mark_dirty(view.id);
        assert!(!state.live().is_dirty(view.id));

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.event.unwrap_or_default());
        }
        assert_eq!(
            names,
            vec![
                "session.opened",
                "session.locked",
                "session.updated",
                "session.resolved"
            ]
        );
    }

    #[tokio::test]
    async fn list_and_view_sessions() {
        let (state, _channels, _store) = test_state();
        open_session(&state, open_request("Alice", "Bob")).await.unwrap();
        open_session(&state, open_request("Carol", "Dave")).await.unwrap();

        let sessions = list_sessions(&state).await;
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].title, "Carol vs Dave");

        let err = session_view(&state, SessionQuery::default()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Betting(BetError::AmbiguousSession { .. })
        ));
        let view = session_view(
            &state,
            SessionQuery {
                session: Some("dave".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(view.title, "Carol vs Dave");
    }
}
