use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::TimerSettings,
    state::{
        ledger::UserId,
        session::{Session, SessionId},
    },
};

/// Version written in every snapshot produced by this service.
pub const FORMAT_VERSION: u32 = 2;

/// Durable image of the ledger and every session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotDocument {
    /// Layout version of the document.
    pub format_version: u32,
    /// Monotonic counter bumped on every committed mutation.
    pub revision: u64,
    /// Id handed to the next opened session.
    pub next_session_id: SessionId,
    /// Session targeted by calls without a session id, when running in compatibility mode.
    #[serde(default)]
    pub legacy_session: Option<SessionId>,
    /// Balances of every user seen so far.
    #[serde(default)]
    pub balances: BTreeMap<UserId, u64>,
    /// Every session, open or historical.
    #[serde(default)]
    pub sessions: BTreeMap<SessionId, Session>,
    /// Timer defaults changed by an operator since deployment.
    #[serde(default)]
    pub timer_overrides: TimerOverrides,
}

/// Operator changes to the configured timer defaults. Unset fields keep the configured value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerOverrides {
    /// Whether new sessions get a lock deadline by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Seconds between opening and automatic lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_after_secs: Option<u64>,
}

impl TimerOverrides {
    /// Layer the overrides on top of `defaults`.
    pub fn apply(&self, defaults: TimerSettings) -> TimerSettings {
        TimerSettings {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            lock_after: self
                .lock_after_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_after),
            ..defaults
        }
    }
}

impl SnapshotDocument {
    /// Valid snapshot with no users and no sessions.
    pub fn empty() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            revision: 0,
            next_session_id: 1,
            legacy_session: None,
            balances: BTreeMap::new(),
            sessions: BTreeMap::new(),
            timer_overrides: TimerOverrides::default(),
        }
    }
}

/// Document written by earlier deployments.
///
/// Holds the single `betting` round and, once multi-session mode was switched on, the
/// `betting_sessions` table next to it.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyDocument {
    /// Balances, possibly negative after manual edits.
    #[serde(default)]
    pub balances: BTreeMap<String, i64>,
    /// The single-session round.
    #[serde(default)]
    pub betting: LegacyBetting,
    /// Unix time (fractional seconds) at which betting was due to lock.
    #[serde(default)]
    pub timer_end_time: Option<f64>,
    /// Operator timer settings.
    #[serde(default)]
    pub settings: LegacySettings,
    /// Sessions keyed by their numeric id rendered as a string.
    #[serde(default)]
    pub betting_sessions: BTreeMap<String, LegacySessionRecord>,
    /// Id the next session would have received.
    #[serde(default)]
    pub next_session_id: Option<u64>,
}

/// Round state of a [`LegacyDocument`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyBetting {
    /// Accepting bets.
    #[serde(default)]
    pub open: bool,
    /// Betting closed, awaiting a winner.
    #[serde(default)]
    pub locked: bool,
    /// Bets keyed by user id.
    #[serde(default)]
    pub bets: BTreeMap<String, LegacyBet>,
    /// Contestant names keyed `"1"` and `"2"`.
    #[serde(default)]
    pub contestants: BTreeMap<String, String>,
}

/// Bet of a [`LegacyDocument`]; `choice` is the lowercased contestant name.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyBet {
    /// Contestant backed by the bet.
    pub choice: String,
    /// Coins already debited from the bettor.
    pub amount: i64,
    /// Emoji of a reaction bet.
    #[serde(default)]
    pub emoji: Option<String>,
}

/// `settings` block of a [`LegacyDocument`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacySettings {
    /// Whether new rounds were timed.
    #[serde(default)]
    pub enable_bet_timer: Option<bool>,
    /// Seconds between opening and automatic lock.
    #[serde(default)]
    pub bet_timer_duration: Option<u64>,
}

/// One entry of `betting_sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacySessionRecord {
    #[serde(default)]
    /// Display title; defaults to "A vs B".
    pub title: Option<String>,
    /// `open`, `locked`, `completed` or `closed`.
    #[serde(default)]
    pub status: String,
    /// Contestant names keyed `c1` and `c2`.
    #[serde(default)]
    pub contestants: BTreeMap<String, String>,
    /// Bets keyed by user id.
    #[serde(default)]
    pub bets: BTreeMap<String, LegacyBet>,
    #[serde(default)]
    pub timer_config: Option<LegacyTimerConfig>,
    /// Name of the declared winner, if any.
    #[serde(default)]
    pub winner: Option<String>,
    /// Numeric or string user id.
    #[serde(default)]
    pub creator_id: Option<Value>,
    /// Numeric or string channel id.
    #[serde(default)]
    pub channel_id: Option<Value>,
}

/// Timer block of a [`LegacySessionRecord`]; deadlines are fractional unix seconds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyTimerConfig {
    #[serde(default)]
    /// `false` disables the deadlines below.
    pub enabled: Option<bool>,
    #[serde(default)]
    /// When betting locks.
    pub auto_lock_at: Option<f64>,
    #[serde(default)]
    /// When the round ends; also the lock time when no lock time is set.
    pub auto_close_at: Option<f64>,
    /// Countdown spacing in seconds.
    #[serde(default)]
    pub update_interval: Option<u64>,
}

/// Any document shape found on disk.
#[derive(Debug, Clone)]
pub enum StoredDocument {
    /// Current multi-session layout.
    Current(SnapshotDocument),
    /// Layout of earlier deployments, migrated on load.
    Legacy(LegacyDocument),
}
