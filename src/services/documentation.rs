use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the betting backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::public_stream,
        crate::routes::sse::admin_stream,
        crate::routes::betting::list_sessions,
        crate::routes::betting::view_session,
        crate::routes::betting::place_bet,
        crate::routes::betting::bet_all,
        crate::routes::betting::cancel_bet,
        crate::routes::betting::submit_reaction,
        crate::routes::betting::user_overview,
        crate::routes::admin::open_session,
        crate::routes::admin::lock_session,
        crate::routes::admin::declare_winner,
        crate::routes::admin::close_session,
        crate::routes::admin::force_close,
        crate::routes::admin::give_coins,
        crate::routes::admin::take_coins,
        crate::routes::admin::set_balance,
        crate::routes::admin::timer_settings,
        crate::routes::admin::update_timer_settings,
        crate::routes::admin::toggle_timer,
        crate::routes::admin::flush_storage,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::SessionView,
            crate::dto::session::SessionSummary,
            crate::dto::session::ContestantView,
            crate::dto::session::BetView,
            crate::dto::session::TimerView,
            crate::dto::betting::PlaceBetRequest,
            crate::dto::betting::BetAllRequest,
            crate::dto::betting::CancelBetRequest,
            crate::dto::betting::BetResponse,
            crate::dto::betting::CancelBetResponse,
            crate::dto::betting::ReactionRequest,
            crate::dto::betting::ReactionAccepted,
            crate::dto::betting::UserOverview,
            crate::dto::betting::UserBetView,
            crate::dto::admin::OpenSessionRequest,
            crate::dto::admin::TimerRequest,
            crate::dto::admin::SessionActionRequest,
            crate::dto::admin::DeclareWinnerRequest,
            crate::dto::admin::LockResponse,
            crate::dto::admin::CloseResponse,
            crate::dto::admin::FlushResponse,
            crate::dto::economy::BalanceAdjustment,
            crate::dto::economy::BalanceResponse,
            crate::dto::settings::TimerSettingsUpdate,
            crate::dto::settings::TimerSettingsView,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::SessionLockedEvent,
            crate::dto::sse::SessionResolvedEvent,
            crate::dto::sse::SessionExpiredEvent,
            crate::dto::sse::TimerProgressEvent,
            crate::dto::sse::ReactionCleanupEvent,
            crate::dto::sse::BalanceChangedEvent,
            crate::dto::sse::IntegrityAlert,
            crate::state::state_machine::SessionStatus,
            crate::state::session::BetSource,
            crate::state::session::Refund,
            crate::state::session::RefundReport,
            crate::state::session::PayoutLine,
            crate::state::session::PayoutReport,
            crate::state::session::Resolution,
            crate::state::session::SessionOutcome,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "betting", description = "Bets, reactions and session views for chat users"),
        (name = "admin", description = "Session lifecycle, economy and storage operations"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_betting_and_admin_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/bets",
            "/reactions",
            "/admin/sessions/winner",
            "/admin/settings/timer",
            "/admin/storage/flush",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
