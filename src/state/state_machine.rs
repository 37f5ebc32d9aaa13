use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{error::BetError, state::session::SessionId};

/// Lifecycle of a betting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting bets and cancellations.
    Open,
    /// Betting closed, waiting for a winner or a forced close.
    Locked,
    /// A winner has been declared and payouts credited.
    Resolved,
    /// Closed without a winner; every bet was refunded.
    Expired,
}

impl SessionStatus {
    /// Resolved and expired sessions never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Resolved | SessionStatus::Expired)
    }

    /// Open and locked sessions take part in name lookups.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// Events that drive a session between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Stop accepting bets (manual or timer-driven).
    Lock,
    /// Settle the pot in favour of one contestant.
    DeclareWinner,
    /// Abort the round and refund everyone.
    ForceClose,
}

/// Error returned when an event cannot be applied from the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Status the session was in when the event arrived.
    pub from: SessionStatus,
    /// The rejected event.
    pub event: SessionEvent,
}

impl InvalidTransition {
    /// Map the rejected transition onto the user-facing error for `session_id`.
    pub fn into_bet_error(self, session_id: SessionId) -> BetError {
        match (self.from, self.event) {
            (SessionStatus::Open, SessionEvent::DeclareWinner) => {
                BetError::MustLockFirst { session_id }
            }
            _ => BetError::SessionClosed { session_id },
        }
    }
}

/// Outcome of a valid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status after the event.
    pub to: SessionStatus,
    /// `false` when the event was an idempotent no-op.
    pub changed: bool,
}

/// Compute the status reached by applying `event` on `from`.
pub fn compute_transition(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<Transition, InvalidTransition> {
    let to = match (from, event) {
        (SessionStatus::Open, SessionEvent::Lock) => SessionStatus::Locked,
        (SessionStatus::Locked, SessionEvent::Lock) => {
            return Ok(Transition {
                to: SessionStatus::Locked,
                changed: false,
            });
        }
        (SessionStatus::Locked, SessionEvent::DeclareWinner) => SessionStatus::Resolved,
        (SessionStatus::Open | SessionStatus::Locked, SessionEvent::ForceClose) => {
            SessionStatus::Expired
        }
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(Transition { to, changed: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next(from: SessionStatus, event: SessionEvent) -> SessionStatus {
        compute_transition(from, event).unwrap().to
    }

    #[test]
    fn happy_path_to_resolution() {
        let locked = next(SessionStatus::Open, SessionEvent::Lock);
        assert_eq!(locked, SessionStatus::Locked);
        assert_eq!(
            next(locked, SessionEvent::DeclareWinner),
            SessionStatus::Resolved
        );
    }

    #[test]
    fn locking_twice_is_a_noop() {
        let transition = compute_transition(SessionStatus::Locked, SessionEvent::Lock).unwrap();
        assert_eq!(transition.to, SessionStatus::Locked);
        assert!(!transition.changed);
    }

    #[test]
    fn winner_requires_lock() {
        let err = compute_transition(SessionStatus::Open, SessionEvent::DeclareWinner).unwrap_err();
        assert_eq!(err.into_bet_error(3), BetError::MustLockFirst { session_id: 3 });
    }

    #[test]
    fn force_close_from_open_or_locked() {
        assert_eq!(
            next(SessionStatus::Open, SessionEvent::ForceClose),
            SessionStatus::Expired
        );
        assert_eq!(
            next(SessionStatus::Locked, SessionEvent::ForceClose),
            SessionStatus::Expired
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        for from in [SessionStatus::Resolved, SessionStatus::Expired] {
            for event in [
                SessionEvent::Lock,
                SessionEvent::DeclareWinner,
                SessionEvent::ForceClose,
            ] {
                let err = compute_transition(from, event).unwrap_err();
                assert_eq!(err.into_bet_error(1), BetError::SessionClosed { session_id: 1 });
            }
        }
    }
}
