//! Application-level configuration loading: economy, timers, debounce windows and reactions.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::session::CONTESTANT_KEYS;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "BETBOT_BACK_CONFIG_PATH";

/// Coins granted to a user the first time they are seen.
pub const DEFAULT_STARTING_BALANCE: u64 = 10_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Coins granted to unseen users.
    pub starting_balance: u64,
    /// Primary snapshot file.
    pub data_file: PathBuf,
    /// Directory receiving rotated snapshots.
    pub backup_dir: PathBuf,
    /// Number of backups retained.
    pub backup_keep: usize,
    /// Automatic lock/close defaults for new sessions.
    pub timer: TimerSettings,
    /// Reaction burst collapsing windows.
    pub debounce: DebounceSettings,
    /// Minimum spacing between two refreshes of the same session.
    pub live_update_interval: Duration,
    /// Shared secret expected in the `x-admin-token` header.
    pub admin_token: String,
    /// Emoji to (contestant, amount) table used by reaction bets.
    pub reactions: Vec<ReactionRule>,
}

/// Timer defaults applied when a session is opened without explicit deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// Whether new sessions get a lock deadline by default.
    pub enabled: bool,
    /// Delay between opening and automatic lock.
    pub lock_after: Duration,
    /// Delay between opening and automatic expiry of a still-locked session.
    pub close_after: Option<Duration>,
    /// Spacing of countdown ticks.
    pub update_interval: Duration,
}

/// Delays of the reaction debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceSettings {
    /// Delay after the last raw event before the intent is applied.
    pub primary: Duration,
    /// Failsafe delay applying an intent the primary delay never consumed.
    pub backup: Duration,
}

/// One entry of the reaction table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReactionRule {
    /// Emoji token as delivered by the chat platform.
    pub emoji: String,
    /// Contestant position, 1 or 2.
    pub contestant: u8,
    /// Stake placed by this reaction.
    pub amount: u64,
}

impl ReactionRule {
    /// Contestant key (`c1`/`c2`) this reaction bets on.
    pub fn contestant_key(&self) -> Option<&'static str> {
        CONTESTANT_KEYS
            .get(usize::from(self.contestant).checked_sub(1)?)
            .copied()
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        data_file = %app_config.data_file.display(),
                        reactions = app_config.reactions.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Look up the reaction rule for an emoji token.
    pub fn reaction(&self, emoji: &str) -> Option<&ReactionRule> {
        self.reactions.iter().find(|rule| rule.emoji == emoji)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    starting_balance: Option<u64>,
    data_file: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    backup_keep: Option<usize>,
    timer: RawTimer,
    debounce: RawDebounce,
    live_update: RawLiveUpdate,
    admin_token: Option<String>,
    reactions: Option<Vec<ReactionRule>>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawTimer {
    enabled: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "lock_after_secs")]
    lock_after: Duration,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "close_after_secs")]
    close_after: Option<Duration>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "update_interval_secs")]
    update_interval: Duration,
}

impl Default for RawTimer {
    fn default() -> Self {
        Self {
            enabled: false,
            lock_after: Duration::from_secs(90),
            close_after: None,
            update_interval: Duration::from_secs(5),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawDebounce {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "primary_ms")]
    primary: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "backup_ms")]
    backup: Duration,
}

impl Default for RawDebounce {
    fn default() -> Self {
        Self {
            primary: Duration::from_millis(500),
            backup: Duration::from_millis(2_000),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLiveUpdate {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "interval_ms")]
    interval: Duration,
}

impl Default for RawLiveUpdate {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5_000),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let admin_token = value
            .admin_token
            .filter(|token| !token.trim().is_empty())
            .unwrap_or_else(|| {
                let token = Uuid::new_v4().simple().to_string();
                warn!(token = %token, "no admin token configured; generated one for this process");
                token
            });

        let mut reactions = value.reactions.unwrap_or_else(default_reactions);
        reactions.retain(|rule| {
            let valid = rule.contestant_key().is_some() && rule.amount > 0;
            if !valid {
                warn!(emoji = %rule.emoji, "ignoring invalid reaction rule");
            }
            valid
        });

        // the backup delay only makes sense after the primary one
        let debounce = DebounceSettings {
            primary: value.debounce.primary,
            backup: value.debounce.backup.max(value.debounce.primary),
        };

        Self {
            starting_balance: value
                .starting_balance
                .unwrap_or(DEFAULT_STARTING_BALANCE),
            data_file: value
                .data_file
                .unwrap_or_else(|| PathBuf::from("data/betting.json")),
            backup_dir: value
                .backup_dir
                .unwrap_or_else(|| PathBuf::from("data/backups")),
            backup_keep: value.backup_keep.unwrap_or(5),
            timer: TimerSettings {
                enabled: value.timer.enabled,
                lock_after: value.timer.lock_after,
                close_after: value.timer.close_after,
                update_interval: value.timer.update_interval.max(Duration::from_secs(1)),
            },
            debounce,
            live_update_interval: value.live_update.interval,
            admin_token,
            reactions,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in reaction table: four stakes per contestant.
fn default_reactions() -> Vec<ReactionRule> {
    let table: [(&str, u8, u64); 8] = [
        ("🔥", 1, 100),
        ("⚡", 1, 250),
        ("💪", 1, 500),
        ("🏆", 1, 1_000),
        ("🌟", 2, 100),
        ("💎", 2, 250),
        ("🚀", 2, 500),
        ("👑", 2, 1_000),
    ];
    table
        .into_iter()
        .map(|(emoji, contestant, amount)| ReactionRule {
            emoji: emoji.to_string(),
            contestant,
            amount,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.starting_balance, 10_000);
        assert!(!config.timer.enabled);
        assert_eq!(config.timer.lock_after, Duration::from_secs(90));
        assert_eq!(config.debounce.primary, Duration::from_millis(500));
        assert_eq!(config.debounce.backup, Duration::from_millis(2_000));
        assert_eq!(config.live_update_interval, Duration::from_secs(5));
        assert_eq!(config.reactions.len(), 8);
        assert!(!config.admin_token.is_empty());
    }

    #[test]
    fn reaction_lookup() {
        let config = AppConfig::default();
        let rule = config.reaction("💎").unwrap();
        assert_eq!(rule.contestant_key(), Some("c2"));
        assert_eq!(rule.amount, 250);
        assert!(config.reaction("🦀").is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "starting_balance": 500,
                "timer": {"enabled": true, "lock_after_secs": 30, "close_after_secs": 120},
                "debounce": {"primary_ms": 3000},
                "admin_token": "secret",
                "reactions": [{"emoji": "a", "contestant": 1, "amount": 5},
                              {"emoji": "b", "contestant": 3, "amount": 5}]
            }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.starting_balance, 500);
        assert!(config.timer.enabled);
        assert_eq!(config.timer.close_after, Some(Duration::from_secs(120)));
        assert_eq!(config.timer.update_interval, Duration::from_secs(5));
        assert_eq!(config.debounce.backup, Duration::from_millis(3_000));
        assert_eq!(config.admin_token, "secret");
        assert_eq!(config.reactions.len(), 1);
    }
}
