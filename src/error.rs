use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::session::SessionId};

/// Failures reported back to the user who triggered a betting operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BetError {
    /// The user cannot cover the requested stake.
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        balance: u64,
        requested: u64,
        shortfall: u64,
        /// Stake of a previous bet in the same session that was refunded before the failure.
        refunded_previous: Option<u64>,
    },
    /// Stakes must be strictly positive.
    #[error("invalid amount {amount}: stakes must be positive")]
    InvalidAmount { amount: i64 },
    /// The contestant does not belong to the targeted session.
    #[error("unknown contestant `{input}`")]
    UnknownContestant { input: String, valid: Vec<String> },
    /// More than one contestant matches the given name equally well.
    #[error("contestant `{input}` is ambiguous")]
    AmbiguousContestant {
        input: String,
        candidates: Vec<String>,
    },
    /// The user has no bet in the session.
    #[error("user `{user_id}` has no active bet")]
    NoActiveBet { user_id: String },
    /// The session no longer accepts bets or cancellations.
    #[error("betting is locked for session {session_id}")]
    BettingLocked { session_id: SessionId },
    /// The session reached a terminal state.
    #[error("session {session_id} is closed")]
    SessionClosed { session_id: SessionId },
    /// Winners can only be declared on a locked session.
    #[error("session {session_id} must be locked before declaring a winner")]
    MustLockFirst { session_id: SessionId },
    /// A contestant name is already used by another active session.
    #[error("contestant `{name}` already competes in session {session_id}")]
    DuplicateContestant { name: String, session_id: SessionId },
    /// The session reference could not be narrowed to a single session.
    #[error("several sessions are active; pick one of {active:?}")]
    AmbiguousSession { active: Vec<SessionId> },
    /// No session is active and none was referenced.
    #[error("there is no active betting session")]
    NoActiveSession,
    /// The referenced session does not exist.
    #[error("session `{reference}` not found")]
    SessionNotFound { reference: String },
    /// Contestant names supplied when opening a session are unusable.
    #[error("invalid contestants: {reason}")]
    InvalidContestants { reason: String },
    /// An internal invariant was violated; the operation was aborted.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

impl BetError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BetError::InsufficientFunds { .. } => "insufficient_funds",
            BetError::InvalidAmount { .. } => "invalid_amount",
            BetError::UnknownContestant { .. } => "unknown_contestant",
            BetError::AmbiguousContestant { .. } => "ambiguous_contestant",
            BetError::NoActiveBet { .. } => "no_active_bet",
            BetError::BettingLocked { .. } => "betting_locked",
            BetError::SessionClosed { .. } => "session_closed",
            BetError::MustLockFirst { .. } => "must_lock_first",
            BetError::DuplicateContestant { .. } => "duplicate_contestant",
            BetError::AmbiguousSession { .. } => "ambiguous_session",
            BetError::NoActiveSession => "no_active_session",
            BetError::SessionNotFound { .. } => "session_not_found",
            BetError::InvalidContestants { .. } => "invalid_contestants",
            BetError::Integrity(_) => "integrity_error",
        }
    }

    /// Structured context so callers can render an actionable message without re-querying.
    pub fn details(&self) -> Value {
        match self {
            BetError::InsufficientFunds {
                balance,
                requested,
                shortfall,
                refunded_previous,
            } => json!({
                "balance": balance,
                "requested": requested,
                "shortfall": shortfall,
                "refunded_previous": refunded_previous,
            }),
            BetError::InvalidAmount { amount } => json!({ "amount": amount }),
            BetError::UnknownContestant { input, valid } => {
                json!({ "input": input, "valid": valid })
            }
            BetError::AmbiguousContestant { input, candidates } => {
                json!({ "input": input, "candidates": candidates })
            }
            BetError::NoActiveBet { user_id } => json!({ "user_id": user_id }),
            BetError::BettingLocked { session_id }
            | BetError::SessionClosed { session_id }
            | BetError::MustLockFirst { session_id } => json!({ "session_id": session_id }),
            BetError::DuplicateContestant { name, session_id } => {
                json!({ "name": name, "session_id": session_id })
            }
            BetError::AmbiguousSession { active } => json!({ "active": active }),
            BetError::NoActiveSession => Value::Null,
            BetError::SessionNotFound { reference } => json!({ "reference": reference }),
            BetError::InvalidContestants { reason } => json!({ "reason": reason }),
            BetError::Integrity(_) => Value::Null,
        }
    }

    /// Whether this error signals a broken invariant rather than a user mistake.
    pub fn is_integrity(&self) -> bool {
        matches!(self, BetError::Integrity(_))
    }
}

/// Invariant violations. They abort the current operation before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    /// Payouts plus retained coins do not add up to the pot.
    #[error("payout mismatch in session {session_id}: pot {pot}, paid {paid}, retained {retained}")]
    PayoutMismatch {
        session_id: SessionId,
        pot: u64,
        paid: u64,
        retained: u64,
    },
    /// The coins debited for a session differ from the sum of its bets.
    #[error("escrow mismatch in session {session_id}: escrowed {escrowed}, pot {pot}")]
    EscrowMismatch {
        session_id: SessionId,
        escrowed: u64,
        pot: u64,
    },
    /// A credit would overflow the balance type.
    #[error("balance overflow for `{user_id}`: {balance} + {amount}")]
    BalanceOverflow {
        user_id: String,
        balance: u64,
        amount: u64,
    },
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Betting rule rejected the operation.
    #[error(transparent)]
    Betting(#[from] BetError),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// The snapshot store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A betting rule rejected the request.
    #[error(transparent)]
    Betting(BetError),
    /// Persistence is unavailable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Betting(source) => AppError::Betting(source),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Storage(err) => AppError::Unavailable(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Value::is_null")]
    details: Value,
}

fn betting_status(err: &BetError) -> StatusCode {
    match err {
        BetError::InsufficientFunds { .. }
        | BetError::InvalidAmount { .. }
        | BetError::UnknownContestant { .. }
        | BetError::AmbiguousContestant { .. }
        | BetError::InvalidContestants { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        BetError::NoActiveBet { .. }
        | BetError::NoActiveSession
        | BetError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
        BetError::BettingLocked { .. }
        | BetError::SessionClosed { .. }
        | BetError::MustLockFirst { .. }
        | BetError::DuplicateContestant { .. }
        | BetError::AmbiguousSession { .. } => StatusCode::CONFLICT,
        BetError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, details) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", Value::Null),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized", Value::Null),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", Value::Null),
            AppError::Betting(err) => (betting_status(err), err.code(), err.details()),
            AppError::Unavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                Value::Null,
            ),
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
            code,
            details,
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_contestant_lists_valid_names() {
        let err = BetError::UnknownContestant {
            input: "zed".into(),
            valid: vec!["Alice".into(), "Bob".into()],
        };
        assert_eq!(err.code(), "unknown_contestant");
        assert_eq!(err.details()["valid"], json!(["Alice", "Bob"]));
        assert_eq!(betting_status(&err), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn insufficient_funds_reports_shortfall() {
        let err = BetError::InsufficientFunds {
            balance: 40,
            requested: 100,
            shortfall: 60,
            refunded_previous: Some(30),
        };
        let details = err.details();
        assert_eq!(details["shortfall"], json!(60));
        assert_eq!(details["refunded_previous"], json!(30));
    }

    #[test]
    fn integrity_errors_are_internal() {
        let err: BetError = IntegrityError::EscrowMismatch {
            session_id: 1,
            escrowed: 10,
            pot: 20,
        }
        .into();
        assert!(err.is_integrity());
        assert_eq!(betting_status(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
