use serde::Serialize;
use tracing::warn;

use crate::{
    dto::{
        session::SessionView,
        sse::{
            BalanceChangedEvent, IntegrityAlert, ReactionCleanupEvent, ServerEvent,
            SessionExpiredEvent, SessionLockedEvent, SessionResolvedEvent, SystemStatus,
            TimerProgressEvent,
        },
    },
    error::BetError,
    state::{
        AppState,
        session::{RefundReport, Resolution, SessionId},
    },
};

/// A session was opened.
pub const EVENT_SESSION_OPENED: &str = "session.opened";
/// Current rendering of a session.
pub const EVENT_SESSION_UPDATED: &str = "session.updated";
/// Betting stopped on a session.
pub const EVENT_SESSION_LOCKED: &str = "session.locked";
/// Winner declared and pot paid out.
pub const EVENT_SESSION_RESOLVED: &str = "session.resolved";
/// Session force-closed with refunds.
pub const EVENT_SESSION_EXPIRED: &str = "session.expired";
/// Countdown tick.
pub const EVENT_TIMER_PROGRESS: &str = "timer.progress";
/// Reaction marker to keep for a user.
pub const EVENT_REACTION_CLEANUP: &str = "reaction.cleanup";
/// Balance of a user changed.
pub const EVENT_BALANCE_CHANGED: &str = "balance.changed";
/// Integrity check failure, admin stream only.
pub const EVENT_INTEGRITY_ERROR: &str = "integrity.error";
/// Degraded mode entered or left.
pub const EVENT_STORAGE_STATUS: &str = "storage.status";

/// Announce a freshly opened session.
pub fn broadcast_session_opened(state: &AppState, view: &SessionView) {
    send_public_event(state, EVENT_SESSION_OPENED, view);
}

/// Push the current rendering of a session.
pub fn broadcast_session_updated(state: &AppState, view: &SessionView) {
    send_public_event(state, EVENT_SESSION_UPDATED, view);
}

/// Announce that betting stopped.
pub fn broadcast_session_locked(state: &AppState, session_id: SessionId, by_timer: bool) {
    let payload = SessionLockedEvent {
        session_id,
        by_timer,
    };
    send_public_event(state, EVENT_SESSION_LOCKED, &payload);
}

/// Announce the winner and payouts.
pub fn broadcast_session_resolved(state: &AppState, resolution: &Resolution) {
    let payload = SessionResolvedEvent {
        session_id: resolution.session_id(),
        resolution: resolution.clone(),
    };
    send_public_event(state, EVENT_SESSION_RESOLVED, &payload);
}

/// Announce a force-close and its refunds.
pub fn broadcast_session_expired(state: &AppState, report: &RefundReport, by_timer: bool) {
    let payload = SessionExpiredEvent {
        session_id: report.session_id,
        report: report.clone(),
        by_timer,
    };
    send_public_event(state, EVENT_SESSION_EXPIRED, &payload);
}

/// Countdown tick for a timed session.
pub fn broadcast_timer_progress(state: &AppState, session_id: SessionId, seconds_remaining: u64) {
    let payload = TimerProgressEvent {
        session_id,
        seconds_remaining,
    };
    send_public_event(state, EVENT_TIMER_PROGRESS, &payload);
}

/// Tell the presentation layer which reaction marker of a user to keep.
pub fn broadcast_reaction_cleanup(state: &AppState, payload: &ReactionCleanupEvent) {
    send_public_event(state, EVENT_REACTION_CLEANUP, payload);
}

/// Announce the new balance of a user.
pub fn broadcast_balance_changed(state: &AppState, user_id: &str, balance: u64) {
    let payload = BalanceChangedEvent {
        user_id: user_id.to_string(),
        balance,
    };
    send_public_event(state, EVENT_BALANCE_CHANGED, &payload);
}

/// Alert operators; integrity failures never reach the public stream.
pub fn broadcast_integrity_error(state: &AppState, operation: &str, err: &BetError) {
    let payload = IntegrityAlert {
        operation: operation.to_string(),
        message: err.to_string(),
        details: err.details(),
    };
    send_admin_event(state, EVENT_INTEGRITY_ERROR, &payload);
}

/// Tell operators whether snapshots are being written.
pub fn broadcast_storage_status(state: &AppState, degraded: bool, reason: Option<String>) {
    let payload = SystemStatus { degraded, reason };
    send_admin_event(state, EVENT_STORAGE_STATUS, &payload);
}

fn send_public_event(state: &AppState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.public_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize public SSE payload"),
    }
}

fn send_admin_event(state: &AppState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.admin_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize admin SSE payload"),
    }
}
