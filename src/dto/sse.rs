use serde::Serialize;
use utoipa::ToSchema;

use crate::state::session::{RefundReport, Resolution, SessionId};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream (`public` or `admin`).
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether snapshots are currently failing to persist.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when betting closes on a session.
pub struct SessionLockedEvent {
    pub session_id: SessionId,
    /// True when the lock deadline triggered it.
    pub by_timer: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a winner is declared.
pub struct SessionResolvedEvent {
    pub session_id: SessionId,
    pub resolution: Resolution,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a session is force-closed and refunded.
pub struct SessionExpiredEvent {
    pub session_id: SessionId,
    pub report: RefundReport,
    pub by_timer: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Advisory countdown tick.
pub struct TimerProgressEvent {
    pub session_id: SessionId,
    pub seconds_remaining: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Tells the presentation layer which reaction marker of a user survives.
pub struct ReactionCleanupEvent {
    pub session_id: SessionId,
    pub user_id: String,
    /// Reaction to keep; every other marker of this user can be removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep: Option<String>,
    /// Whether the engine accepted the intent.
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when an administrator changes a balance.
pub struct BalanceChangedEvent {
    pub user_id: String,
    pub balance: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Operator alert raised when an invariant check aborted an operation.
pub struct IntegrityAlert {
    pub operation: String,
    pub message: String,
    pub details: serde_json::Value,
}
