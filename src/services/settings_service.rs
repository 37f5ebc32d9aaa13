use tracing::info;

use crate::{
    config::TimerSettings,
    dao::models::TimerOverrides,
    dto::settings::{TimerSettingsUpdate, TimerSettingsView},
    error::ServiceError,
    state::AppState,
};

/// Timer defaults for a session opened now.
pub async fn effective_timer(state: &AppState) -> TimerSettings {
    let overrides = state.read(|book| book.timer_overrides()).await;
    overrides.apply(state.config().timer)
}

/// Configured timer defaults with the operator overrides applied.
pub async fn timer_settings(state: &AppState) -> TimerSettingsView {
    let overrides = state.read(|book| book.timer_overrides()).await;
    TimerSettingsView::build(state.config().timer, overrides)
}

/// Change the timer defaults of future sessions. Running countdowns keep their deadlines.
pub async fn update_timer_settings(
    state: &AppState,
    update: TimerSettingsUpdate,
) -> Result<TimerSettingsView, ServiceError> {
    let overrides = state
        .mutate("update_timer_settings", |book| {
            let current = book.timer_overrides();
            let next = TimerOverrides {
                enabled: update.enabled.or(current.enabled),
                lock_after_secs: update.lock_after_secs.or(current.lock_after_secs),
            };
            book.set_timer_overrides(next);
            Ok(next)
        })
        .await?;
    let view = TimerSettingsView::build(state.config().timer, overrides);
    info!(
        enabled = view.enabled,
        lock_after_secs = view.lock_after_secs,
        "timer defaults updated"
    );
    Ok(view)
}

/// Flip whether new sessions are timed.
pub async fn toggle_timer(state: &AppState) -> Result<TimerSettingsView, ServiceError> {
    let configured = state.config().timer;
    let overrides = state
        .mutate("toggle_timer", |book| {
            let current = book.timer_overrides();
            let next = TimerOverrides {
                enabled: Some(!current.apply(configured).enabled),
                ..current
            };
            book.set_timer_overrides(next);
            Ok(next)
        })
        .await?;
    let view = TimerSettingsView::build(configured, overrides);
    info!(enabled = view.enabled, "timer defaults toggled");
    Ok(view)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::snapshot_store::MemorySnapshotStore,
        services::bootstrap,
        state::tests::test_state,
    };

    #[tokio::test]
    async fn toggle_flips_the_configured_default() {
        let (state, _channels, _store) = test_state();
        let initial = timer_settings(&state).await;
        assert!(!initial.overridden);

        let toggled = toggle_timer(&state).await.unwrap();
        assert_eq!(toggled.enabled, !initial.enabled);
        assert!(toggled.overridden);
        assert_eq!(effective_timer(&state).await.enabled, toggled.enabled);

        let back = toggle_timer(&state).await.unwrap();
        assert_eq!(back.enabled, initial.enabled);
    }

    #[tokio::test]
    async fn partial_update_keeps_other_overrides() {
        let (state, _channels, _store) = test_state();
        update_timer_settings(
            &state,
            TimerSettingsUpdate {
                enabled: Some(true),
                lock_after_secs: None,
            },
        )
        .await
        .unwrap();
        let view = update_timer_settings(
            &state,
            TimerSettingsUpdate {
                enabled: None,
                lock_after_secs: Some(42),
            },
        )
        .await
        .unwrap();
        assert!(view.enabled);
        assert_eq!(view.lock_after_secs, 42);

        let effective = effective_timer(&state).await;
        assert_eq!(effective.lock_after, Duration::from_secs(42));
    }

    #[tokio::test]
    async fn overrides_survive_a_restart() {
        let (state, _channels, store) = test_state();
        update_timer_settings(
            &state,
            TimerSettingsUpdate {
                enabled: Some(true),
                lock_after_secs: Some(120),
            },
        )
        .await
        .unwrap();
        assert_eq!(store.save_count(), 1);

        let (restarted, _channels) =
            AppState::new(AppConfig::default(), Arc::new(store.clone()));
        bootstrap::restore(&restarted).await.unwrap();
        let view = timer_settings(&restarted).await;
        assert!(view.enabled);
        assert_eq!(view.lock_after_secs, 120);
    }
}
