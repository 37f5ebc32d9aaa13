use std::{
    collections::{BTreeMap, BTreeSet},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde_json::Value;
use tracing::{info, warn};

use crate::{
    dao::{
        models::{
            FORMAT_VERSION, LegacyBet, LegacyBetting, LegacyDocument, LegacySessionRecord,
            LegacyTimerConfig, SnapshotDocument, StoredDocument, TimerOverrides,
        },
        storage::{StorageError, StorageResult},
    },
    state::{
        ledger::UserId,
        matching::normalize,
        session::{Bet, BetSource, Provenance, Session, SessionId, TimerConfig, unix_now},
    },
};

/// Id given to the session synthesized from the single-session round, when free.
const LEGACY_SESSION_ID: SessionId = 1;
/// Year 9999; later deadlines are treated as garbage.
const MAX_LEGACY_TIMESTAMP: f64 = 253_402_300_799.0;

/// Parse raw bytes into whichever document layout they hold.
pub fn decode_document(bytes: &[u8], location: &str) -> StorageResult<StoredDocument> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| StorageError::corrupt(location, err))?;

    if value.get("format_version").is_some() {
        let document: SnapshotDocument =
            serde_json::from_value(value).map_err(|err| StorageError::corrupt(location, err))?;
        if document.format_version > FORMAT_VERSION {
            warn!(
                location,
                found = document.format_version,
                supported = FORMAT_VERSION,
                "snapshot written by a newer version"
            );
        }
        return Ok(StoredDocument::Current(document));
    }

    if value.get("betting").is_some() || value.get("betting_sessions").is_some() {
        let document: LegacyDocument =
            serde_json::from_value(value).map_err(|err| StorageError::corrupt(location, err))?;
        return Ok(StoredDocument::Legacy(document));
    }

    Err(StorageError::corrupt(
        location,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "neither a snapshot nor a legacy document",
        ),
    ))
}

/// Bring any stored layout to the current snapshot document.
pub fn upgrade(document: StoredDocument, update_interval: Duration) -> SnapshotDocument {
    match document {
        StoredDocument::Current(snapshot) => snapshot,
        StoredDocument::Legacy(legacy) => migrate_legacy(legacy, update_interval),
    }
}

/// Convert a document of an earlier deployment.
///
/// Open and locked rounds become sessions that keep their ids. Every stake that cannot be
/// carried over is refunded, except those of rounds whose payout already happened.
pub fn migrate_legacy(legacy: LegacyDocument, update_interval: Duration) -> SnapshotDocument {
    let mut balances = BTreeMap::new();
    for (user_id, balance) in legacy.balances {
        let clamped = u64::try_from(balance).unwrap_or_else(|_| {
            warn!(user_id = %user_id, balance, "negative legacy balance clamped to zero");
            0
        });
        balances.insert(user_id, clamped);
    }

    let mut snapshot = SnapshotDocument::empty();
    snapshot.timer_overrides = TimerOverrides {
        enabled: legacy.settings.enable_bet_timer,
        lock_after_secs: legacy.settings.bet_timer_duration.filter(|secs| *secs > 0),
    };

    let taken: BTreeSet<SessionId> = legacy
        .betting_sessions
        .keys()
        .filter_map(|key| parse_session_key(key))
        .collect();
    let mut next_id = taken
        .last()
        .map_or(1, |max| max.saturating_add(1))
        .max(legacy.next_session_id.unwrap_or(1))
        .max(1);

    for (key, record) in legacy.betting_sessions {
        let session_id = parse_session_key(&key).unwrap_or_else(|| {
            let id = allocate(&mut next_id);
            warn!(key = %key, session_id = id, "legacy session key is not an id; renumbered");
            id
        });
        if let Some(session) = migrate_record(session_id, record, update_interval, &mut balances) {
            snapshot.sessions.insert(session_id, session);
        }
    }

    if legacy.betting.open || legacy.betting.locked {
        let session_id = if taken.contains(&LEGACY_SESSION_ID) {
            allocate(&mut next_id)
        } else {
            LEGACY_SESSION_ID
        };
        let mut session =
            synthesize_session(session_id, &legacy.betting, legacy.timer_end_time, update_interval);
        restore_bets(session.as_mut(), legacy.betting.bets, &mut balances);
        if let Some(mut session) = session {
            if legacy.betting.locked {
                let _ = session.lock();
            }
            session.take_dirty();
            info!(
                session_id,
                title = session.title(),
                bets = session.bets().len(),
                "migrated legacy betting round"
            );
            snapshot.legacy_session = Some(session_id);
            snapshot.sessions.insert(session_id, session);
        }
    } else {
        restore_bets(None, legacy.betting.bets, &mut balances);
    }

    snapshot.next_session_id = snapshot
        .sessions
        .keys()
        .next_back()
        .map_or(next_id, |max| next_id.max(max.saturating_add(1)));
    snapshot.balances = balances;
    snapshot
}

fn parse_session_key(key: &str) -> Option<SessionId> {
    key.trim().parse().ok().filter(|id| *id > 0)
}

fn allocate(next_id: &mut SessionId) -> SessionId {
    let id = *next_id;
    *next_id = next_id.saturating_add(1);
    id
}

/// Rebuild one `betting_sessions` entry. Terminal rounds are not imported.
fn migrate_record(
    session_id: SessionId,
    record: LegacySessionRecord,
    update_interval: Duration,
    balances: &mut BTreeMap<UserId, u64>,
) -> Option<Session> {
    let status = record.status.trim().to_ascii_lowercase();
    if status == "completed" && record.winner.is_some() {
        info!(
            session_id,
            bets = record.bets.len(),
            "legacy session already paid out; not imported"
        );
        return None;
    }

    let live = matches!(status.as_str(), "open" | "locked");
    let names = record
        .contestants
        .get("c1")
        .cloned()
        .zip(record.contestants.get("c2").cloned());
    let mut session = match (live, names) {
        (true, Some((first, second))) => {
            let provenance = Provenance {
                creator_id: record.creator_id.as_ref().and_then(legacy_id),
                channel_id: record.channel_id.as_ref().and_then(legacy_id),
            };
            let timer = record
                .timer_config
                .as_ref()
                .and_then(|config| record_timer(config, update_interval));
            Some(Session::new(
                session_id,
                [first, second],
                record.title.filter(|title| !title.trim().is_empty()),
                provenance,
                timer,
            ))
        }
        _ => None,
    };
    if session.is_none() && !record.bets.is_empty() {
        warn!(session_id, status = %status, "legacy session not importable; refunding its bets");
    }

    restore_bets(session.as_mut(), record.bets, balances);
    let mut session = session?;
    if status == "locked" {
        let _ = session.lock();
    }
    session.take_dirty();
    info!(
        session_id,
        title = session.title(),
        bets = session.bets().len(),
        "migrated legacy session"
    );
    Some(session)
}

/// Attach `bets` to `session`, refunding every bet it cannot hold.
fn restore_bets(
    mut session: Option<&mut Session>,
    bets: BTreeMap<String, LegacyBet>,
    balances: &mut BTreeMap<UserId, u64>,
) {
    for (user_id, bet) in bets {
        let Ok(amount) = u64::try_from(bet.amount) else {
            warn!(user_id = %user_id, amount = bet.amount, "dropping legacy bet with negative amount");
            continue;
        };
        if amount == 0 {
            continue;
        }

        let key = session
            .as_deref()
            .and_then(|session| legacy_choice_key(session, &bet.choice));
        match (session.as_deref_mut(), key) {
            (Some(session), Some(contestant_key)) => {
                let source = if bet.emoji.is_some() {
                    BetSource::Reaction
                } else {
                    BetSource::Manual
                };
                session.restore_bet(Bet {
                    user_id,
                    contestant_key,
                    amount,
                    source,
                    reaction_token: bet.emoji,
                    placed_at: unix_now(),
                });
            }
            _ => {
                warn!(
                    user_id = %user_id,
                    choice = %bet.choice,
                    amount,
                    "refunding legacy bet"
                );
                let balance = balances.entry(user_id).or_insert(0);
                *balance = balance.saturating_add(amount);
            }
        }
    }
}

fn synthesize_session(
    session_id: SessionId,
    betting: &LegacyBetting,
    timer_end_time: Option<f64>,
    update_interval: Duration,
) -> Option<Session> {
    let first = betting.contestants.get("1")?;
    let second = betting.contestants.get("2")?;

    let timer = timer_end_time
        .filter(|_| !betting.locked)
        .and_then(unix_time)
        .map(|lock_at| TimerConfig {
            lock_at,
            close_at: None,
            update_interval,
        });

    Some(Session::new(
        session_id,
        [first.clone(), second.clone()],
        None,
        Provenance::default(),
        timer,
    ))
}

fn record_timer(config: &LegacyTimerConfig, update_interval: Duration) -> Option<TimerConfig> {
    if config.enabled == Some(false) {
        return None;
    }
    let close_at = config.auto_close_at.and_then(unix_time);
    let lock_at = config.auto_lock_at.and_then(unix_time).or(close_at)?;
    Some(TimerConfig {
        lock_at,
        close_at: close_at.filter(|close_at| *close_at >= lock_at),
        update_interval: config
            .update_interval
            .filter(|secs| *secs > 0)
            .map_or(update_interval, Duration::from_secs),
    })
}

/// Fractional unix seconds, rounded up.
fn unix_time(secs: f64) -> Option<SystemTime> {
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_LEGACY_TIMESTAMP {
        return None;
    }
    UNIX_EPOCH.checked_add(Duration::from_secs(secs.ceil() as u64))
}

fn legacy_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn legacy_choice_key(session: &Session, choice: &str) -> Option<String> {
    let choice = normalize(choice);
    match choice.as_str() {
        "1" | "c1" | "contestant_1" => return Some("c1".into()),
        "2" | "c2" | "contestant_2" => return Some("c2".into()),
        _ => {}
    }
    session
        .contestants()
        .iter()
        .find(|(_, name)| normalize(name) == choice)
        .map(|(key, _)| key.clone())
}
