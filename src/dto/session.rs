use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::state::{
    session::{BetSource, Session, SessionId, SessionOutcome},
    state_machine::SessionStatus,
};

/// Seconds since the unix epoch, the resolution every view exposes.
pub fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Query selecting a session by id or contestant name.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SessionQuery {
    /// Session id, or any contestant name of the session. Optional when one session is active.
    pub session: Option<String>,
}

/// Aggregates of one contestant.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ContestantView {
    pub key: String,
    pub name: String,
    /// Coins staked on this contestant.
    pub total: u64,
    /// Number of bettors backing this contestant.
    pub bettors: usize,
}

/// One active bet as shown to viewers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BetView {
    pub user_id: String,
    pub contestant_key: String,
    pub amount: u64,
    pub source: BetSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_token: Option<String>,
}

/// Countdown of a timed session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TimerView {
    pub lock_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_at: Option<i64>,
    pub update_interval_secs: u64,
    /// Seconds until betting locks; zero once the deadline passed.
    pub seconds_remaining: u64,
}

/// Read-only snapshot of a session, used for status commands and live refreshes.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionView {
    pub id: SessionId,
    pub title: String,
    pub status: SessionStatus,
    pub contestants: Vec<ContestantView>,
    pub pot: u64,
    pub bets: Vec<BetView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_key: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
    /// Whether omitting the session targets this one.
    pub legacy: bool,
}

impl SessionView {
    pub fn build(session: &Session, legacy: bool) -> Self {
        let contestants = session
            .contestants()
            .iter()
            .map(|(key, name)| ContestantView {
                key: key.clone(),
                name: name.clone(),
                total: session.pool_of(key),
                bettors: session
                    .bets()
                    .values()
                    .filter(|bet| &bet.contestant_key == key)
                    .count(),
            })
            .collect();

        let timer = session.timer().map(|timer| TimerView {
            lock_at: unix_seconds(timer.lock_at),
            close_at: timer.close_at.map(unix_seconds),
            update_interval_secs: timer.update_interval.as_secs(),
            seconds_remaining: timer
                .lock_at
                .duration_since(SystemTime::now())
                .map(|left| left.as_secs())
                .unwrap_or_default(),
        });

        Self {
            id: session.id(),
            title: session.title().to_string(),
            status: session.status(),
            contestants,
            pot: session.pot(),
            bets: session
                .bets()
                .values()
                .map(|bet| BetView {
                    user_id: bet.user_id.clone(),
                    contestant_key: bet.contestant_key.clone(),
                    amount: bet.amount,
                    source: bet.source,
                    reaction_token: bet.reaction_token.clone(),
                })
                .collect(),
            timer,
            winner_key: session.winner_key().map(str::to_string),
            created_at: unix_seconds(session.created_at()),
            creator_id: session.provenance().creator_id.clone(),
            channel_id: session.provenance().channel_id.clone(),
            closed_at: session.closed_at().map(unix_seconds),
            closed_by: session.closed_by().map(str::to_string),
            outcome: session.outcome().cloned(),
            legacy,
        }
    }
}

/// One row of the session list.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub status: SessionStatus,
    pub pot: u64,
    pub bettors: usize,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id(),
            title: session.title().to_string(),
            status: session.status(),
            pot: session.pot(),
            bettors: session.bets().len(),
        }
    }
}
