use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::state::session::{Resolution, SessionId};

fn validate_contestants(names: &[String]) -> Result<(), ValidationError> {
    if names.len() != 2 {
        let mut err = ValidationError::new("contestant_count");
        err.message = Some(format!("exactly two contestants required (got {})", names.len()).into());
        return Err(err);
    }
    if names.iter().any(|name| name.trim().is_empty()) {
        let mut err = ValidationError::new("contestant_blank");
        err.message = Some("contestant names must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Request to open a new session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct OpenSessionRequest {
    /// Display names of the two contestants.
    #[validate(custom(function = "validate_contestants"))]
    pub contestants: Vec<String>,
    /// Defaults to "A vs B".
    pub title: Option<String>,
    pub creator_id: Option<String>,
    pub channel_id: Option<String>,
    /// Explicit deadlines; falls back to the configured defaults when timers are enabled.
    #[validate(nested)]
    pub timer: Option<TimerRequest>,
}

/// Relative deadlines of a session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct TimerRequest {
    /// Seconds until betting locks, at most one week.
    #[validate(range(min = 1, max = 604800))]
    pub lock_after_secs: u64,
    /// Seconds until a still-locked session is force-closed, at most one week.
    #[validate(range(min = 1, max = 604800))]
    pub close_after_secs: Option<u64>,
    /// Spacing of countdown ticks, at most one hour.
    #[validate(range(min = 1, max = 3600))]
    pub update_interval_secs: Option<u64>,
}

/// Request targeting one session.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct SessionActionRequest {
    /// Session id or contestant name; optional when one session is active.
    pub session: Option<String>,
    /// Operator performing the action, recorded on terminal transitions.
    pub actor: Option<String>,
}

/// Request to declare the winner of a session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct DeclareWinnerRequest {
    pub session: Option<String>,
    /// Winning contestant name.
    #[validate(length(min = 1))]
    pub contestant: String,
    pub actor: Option<String>,
}

/// Outcome of a lock request.
#[derive(Debug, Serialize, ToSchema)]
pub struct LockResponse {
    pub session_id: SessionId,
    /// False when the session was already locked.
    pub changed: bool,
}

/// Outcome of a one-step lock and declare.
#[derive(Debug, Serialize, ToSchema)]
pub struct CloseResponse {
    /// Whether this call locked the session first.
    pub locked: bool,
    pub resolution: Resolution,
}

/// Outcome of a manual snapshot flush.
#[derive(Debug, Serialize, ToSchema)]
pub struct FlushResponse {
    /// Revision now durable.
    pub revision: u64,
}
