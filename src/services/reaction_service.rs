use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    dto::{
        betting::{ReactionAccepted, ReactionRequest, session_ref},
        sse::ReactionCleanupEvent,
    },
    error::{BetError, ServiceError},
    services::sse_events,
    state::{
        AppState, SharedState,
        shutdown_requested,
        debouncer::{IntentAction, ReactionIntent},
        session::{BetRequest, BetSource},
    },
};

/// Translate a raw reaction into a pending intent.
///
/// Only the target is resolved here; the bet itself is placed once the user's burst settles.
pub async fn submit_reaction(
    state: &AppState,
    request: ReactionRequest,
) -> Result<ReactionAccepted, ServiceError> {
    let session = session_ref(request.session.as_deref());
    let token = request
        .emoji
        .as_deref()
        .map(str::trim)
        .filter(|emoji| !emoji.is_empty())
        .map(str::to_string);

    let (session_id, action) = if request.removed {
        let session_id = state.read(|book| book.resolve(session.as_ref())).await?;
        (
            session_id,
            IntentAction::Remove {
                reaction_token: token,
            },
        )
    } else {
        let (contestant, amount) = match (&request.contestant, &token) {
            (Some(contestant), _) => {
                let amount = request.amount.ok_or_else(|| {
                    ServiceError::InvalidInput("amount is required with a contestant".into())
                })?;
                (contestant.clone(), amount)
            }
            (None, Some(emoji)) => {
                let rule = state.config().reaction(emoji).ok_or_else(|| {
                    ServiceError::InvalidInput(format!("no bet is bound to reaction {emoji}"))
                })?;
                let key = rule.contestant_key().unwrap_or_default().to_string();
                (key, i64::try_from(rule.amount).unwrap_or(i64::MAX))
            }
            (None, None) => {
                return Err(ServiceError::InvalidInput(
                    "either emoji or contestant is required".into(),
                ));
            }
        };
        if amount <= 0 {
            return Err(BetError::InvalidAmount { amount }.into());
        }

        let (session_id, contestant_key) = state
            .read(|book| {
                let session_id = book.resolve(session.as_ref())?;
                let session = book.session(session_id).ok_or(BetError::SessionNotFound {
                    reference: session_id.to_string(),
                })?;
                // table entries address contestants by key, free text goes through matching
                let key = if session.contestants().contains_key(&contestant) {
                    contestant.clone()
                } else {
                    session.match_contestant(&contestant)?
                };
                Ok::<_, BetError>((session_id, key))
            })
            .await?;
        (
            session_id,
            IntentAction::Place {
                contestant_key,
                amount: amount.unsigned_abs(),
                reaction_token: token,
            },
        )
    };

    let sequence = state
        .debouncer()
        .submit(&request.user_id, session_id, action);
    debug!(user_id = %request.user_id, session_id, sequence, "reaction queued");
    Ok(ReactionAccepted {
        session_id,
        sequence,
    })
}

/// Apply intents released by the debouncer until shutdown.
pub async fn run_applier(state: SharedState, mut intents: mpsc::UnboundedReceiver<ReactionIntent>) {
    let mut shutdown = state.shutdown_watcher();
    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            intent = intents.recv() => match intent {
                Some(intent) => apply_intent(&state, intent).await,
                None => break,
            },
        }
    }
    debug!("reaction applier stopped");
}

/// Run one settled intent through the engine and tell the presentation layer what survived.
pub async fn apply_intent(state: &AppState, intent: ReactionIntent) {
    let ReactionIntent {
        user_id,
        session_id,
        action,
        sequence,
        ..
    } = intent;

    let outcome = match action {
        IntentAction::Place {
            contestant_key,
            amount,
            reaction_token,
        } => {
            let request = BetRequest {
                user_id: user_id.clone(),
                contestant_key,
                amount: i64::try_from(amount).unwrap_or(i64::MAX),
                source: BetSource::Reaction,
                reaction_token: reaction_token.clone(),
            };
            state
                .mutate("reaction_bet", |book| book.place_resolved(session_id, request))
                .await
                .map(|receipt| {
                    info!(
                        session_id,
                        user_id = %user_id,
                        sequence,
                        contestant = %receipt.bet.contestant_key,
                        amount = receipt.bet.amount,
                        "reaction bet applied"
                    );
                    reaction_token
                })
        }
        IntentAction::Remove { reaction_token } => state
            .mutate("reaction_remove", |book| {
                let Some(bet) = book.session(session_id).and_then(|s| s.bet_of(&user_id)) else {
                    return Ok(None);
                };
                let placed_by_this_reaction = match &reaction_token {
                    Some(token) => bet.reaction_token.as_ref() == Some(token),
                    None => bet.source == BetSource::Reaction,
                };
                if !placed_by_this_reaction {
                    return Ok(bet.reaction_token.clone());
                }
                let refund = book.cancel_resolved(session_id, &user_id)?;
                info!(
                    session_id,
                    user_id = %user_id,
                    sequence,
                    refunded = refund.amount,
                    "reaction bet removed"
                );
                Ok(None)
            })
            .await,
    };

    let cleanup = match outcome {
        Ok(keep) => ReactionCleanupEvent {
            session_id,
            user_id,
            keep,
            applied: true,
            error: None,
            code: None,
        },
        Err(err) => {
            warn!(session_id, user_id = %user_id, sequence, error = %err, "reaction intent rejected");
            ReactionCleanupEvent {
                session_id,
                user_id,
                keep: None,
                applied: false,
                error: Some(err.to_string()),
                code: Some(err.code().to_string()),
            }
        }
    };
    sse_events::broadcast_reaction_cleanup(state, &cleanup);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dto::admin::{OpenSessionRequest, SessionActionRequest},
        services::betting_service,
        state::{session::SessionId, tests::test_state},
    };

    fn reaction(user: &str, emoji: &str) -> ReactionRequest {
        ReactionRequest {
            session: None,
            user_id: user.into(),
            emoji: Some(emoji.into()),
            contestant: None,
            amount: None,
            removed: false,
        }
    }

    async fn open(state: &SharedState) -> SessionId {
        betting_service::open_session(
            state,
            OpenSessionRequest {
                contestants: vec!["Alice".into(), "Bob".into()],
                title: None,
                creator_id: None,
                channel_id: None,
                timer: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test(start_paused = true)]
    async fn reaction_burst_places_exactly_one_bet() {
        let (state, channels, _store) = test_state();
        let applier = tokio::spawn(run_applier(state.clone(), channels.reaction_intents));
        let id = open(&state).await;

        let mut alice = reaction("u1", "");
        alice.emoji = None;
        alice.contestant = Some("Alice".into());
        alice.amount = Some(100);
        submit_reaction(&state, alice).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        submit_reaction(&state, reaction("u1", "🌟")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        submit_reaction(&state, reaction("u1", "🔥")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let (bets, balance) = state
            .read(|book| (book.user_bets("u1").len(), book.ledger.get_balance("u1")))
            .await;
        assert_eq!(bets, 1);
        assert_eq!(balance, 900);
        let bet_key = state
            .read(|book| {
                book.session(id)
                    .and_then(|session| session.bet_of("u1"))
                    .map(|bet| (bet.contestant_key.clone(), bet.source))
            })
            .await;
        assert_eq!(bet_key, Some(("c1".to_string(), BetSource::Reaction)));

        state.begin_shutdown();
        applier.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn removing_other_reaction_keeps_bet() {
        let (state, channels, _store) = test_state();
        let applier = tokio::spawn(run_applier(state.clone(), channels.reaction_intents));
        let mut events = state.public_sse().subscribe();
        open(&state).await;

        submit_reaction(&state, reaction("u1", "💎")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let mut removal = reaction("u1", "🔥");
        removal.removed = true;
        submit_reaction(&state, removal).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(state.read(|book| book.user_bets("u1").len()).await, 1);

        let mut removal = reaction("u1", "💎");
        removal.removed = true;
        submit_reaction(&state, removal).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(state.read(|book| book.user_bets("u1").len()).await, 0);
        assert_eq!(state.read(|book| book.ledger.get_balance("u1")).await, 1_000);

        let cleanups = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| event.event.as_deref() == Some("reaction.cleanup"))
            .count();
        assert_eq!(cleanups, 3);

        state.begin_shutdown();
        applier.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn intent_landing_after_force_close_is_rejected() {
        let (state, channels, _store) = test_state();
        let applier = tokio::spawn(run_applier(state.clone(), channels.reaction_intents));
        open(&state).await;

        submit_reaction(&state, reaction("u1", "🏆")).await.unwrap();
        betting_service::force_close(&state, SessionActionRequest::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(state.read(|book| book.ledger.get_balance("u1")).await, 1_000);
        state.begin_shutdown();
        applier.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_emoji_is_invalid_input() {
        let (state, _channels, _store) = test_state();
        open(&state).await;
        let err = submit_reaction(&state, reaction("u1", "🦀")).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }
}
