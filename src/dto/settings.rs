use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{config::TimerSettings, dao::models::TimerOverrides};

/// Partial update of the timer defaults applied to new sessions.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct TimerSettingsUpdate {
    /// Whether new sessions get a lock deadline by default.
    pub enabled: Option<bool>,
    /// Seconds between opening and automatic lock, at most one week.
    #[validate(range(min = 1, max = 604800))]
    pub lock_after_secs: Option<u64>,
}

/// Timer defaults currently applied to new sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TimerSettingsView {
    pub enabled: bool,
    pub lock_after_secs: u64,
    pub close_after_secs: Option<u64>,
    pub update_interval_secs: u64,
    /// An operator changed the configured defaults at runtime.
    pub overridden: bool,
}

impl TimerSettingsView {
    pub fn build(configured: TimerSettings, overrides: TimerOverrides) -> Self {
        let effective = overrides.apply(configured);
        Self {
            enabled: effective.enabled,
            lock_after_secs: effective.lock_after.as_secs(),
            close_after_secs: effective.close_after.map(|after| after.as_secs()),
            update_interval_secs: effective.update_interval.as_secs(),
            overridden: overrides != TimerOverrides::default(),
        }
    }
}
