use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::{
        admin::{
            CloseResponse, DeclareWinnerRequest, FlushResponse, LockResponse, OpenSessionRequest,
            SessionActionRequest,
        },
        economy::{BalanceAdjustment, BalanceResponse},
        session::SessionView,
        settings::{TimerSettingsUpdate, TimerSettingsView},
    },
    error::{AppError, ServiceError},
    services::{betting_service, economy_service, settings_service, storage_supervisor},
    state::{
        SharedState,
        session::{RefundReport, Resolution},
    },
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints: session lifecycle, economy overrides and storage control.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/sessions", post(open_session))
        .route("/admin/sessions/lock", post(lock_session))
        .route("/admin/sessions/winner", post(declare_winner))
        .route("/admin/sessions/close", post(close_session))
        .route("/admin/sessions/force-close", post(force_close))
        .route("/admin/economy/give", post(give_coins))
        .route("/admin/economy/take", post(take_coins))
        .route("/admin/economy/set", post(set_balance))
        .route(
            "/admin/settings/timer",
            get(timer_settings).post(update_timer_settings),
        )
        .route("/admin/settings/timer/toggle", post(toggle_timer))
        .route("/admin/storage/flush", post(flush_storage))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

#[utoipa::path(
    post,
    path = "/admin/sessions",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = OpenSessionRequest,
    responses(
        (status = 200, description = "Session opened", body = SessionView),
        (status = 409, description = "A contestant already competes in an active session")
    )
)]
/// Open a session between two contestants.
pub async fn open_session(
    State(state): State<SharedState>,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<Json<SessionView>, AppError> {
    payload.validate()?;
    Ok(Json(betting_service::open_session(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/admin/sessions/lock",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = SessionActionRequest,
    responses((status = 200, description = "Betting locked", body = LockResponse))
)]
/// Stop accepting bets on a session.
pub async fn lock_session(
    State(state): State<SharedState>,
    Json(payload): Json<SessionActionRequest>,
) -> Result<Json<LockResponse>, AppError> {
    payload.validate()?;
    Ok(Json(betting_service::lock(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/admin/sessions/winner",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = DeclareWinnerRequest,
    responses(
        (status = 200, description = "Winner declared and pot paid out", body = Resolution),
        (status = 409, description = "Session must be locked first")
    )
)]
/// Declare the winner of a locked session.
pub async fn declare_winner(
    State(state): State<SharedState>,
    Json(payload): Json<DeclareWinnerRequest>,
) -> Result<Json<Resolution>, AppError> {
    payload.validate()?;
    Ok(Json(betting_service::declare_winner(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/admin/sessions/close",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = DeclareWinnerRequest,
    responses((status = 200, description = "Session locked if needed and resolved", body = CloseResponse))
)]
/// Lock and declare the winner in one step.
pub async fn close_session(
    State(state): State<SharedState>,
    Json(payload): Json<DeclareWinnerRequest>,
) -> Result<Json<CloseResponse>, AppError> {
    payload.validate()?;
    Ok(Json(betting_service::close_with_winner(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/admin/sessions/force-close",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = SessionActionRequest,
    responses((status = 200, description = "Every bet refunded and the session expired", body = RefundReport))
)]
/// Refund every bet and expire a session.
pub async fn force_close(
    State(state): State<SharedState>,
    Json(payload): Json<SessionActionRequest>,
) -> Result<Json<RefundReport>, AppError> {
    payload.validate()?;
    Ok(Json(betting_service::force_close(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/admin/economy/give",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = BalanceAdjustment,
    responses((status = 200, description = "Coins credited", body = BalanceResponse))
)]
/// Credit coins to a user.
pub async fn give_coins(
    State(state): State<SharedState>,
    Json(payload): Json<BalanceAdjustment>,
) -> Result<Json<BalanceResponse>, AppError> {
    payload.validate()?;
    Ok(Json(economy_service::give(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/admin/economy/take",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = BalanceAdjustment,
    responses(
        (status = 200, description = "Coins debited", body = BalanceResponse),
        (status = 422, description = "Balance too low")
    )
)]
/// Debit coins from a user.
pub async fn take_coins(
    State(state): State<SharedState>,
    Json(payload): Json<BalanceAdjustment>,
) -> Result<Json<BalanceResponse>, AppError> {
    payload.validate()?;
    Ok(Json(economy_service::take(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/admin/economy/set",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = BalanceAdjustment,
    responses((status = 200, description = "Balance overridden", body = BalanceResponse))
)]
/// Overwrite the balance of a user.
pub async fn set_balance(
    State(state): State<SharedState>,
    Json(payload): Json<BalanceAdjustment>,
) -> Result<Json<BalanceResponse>, AppError> {
    payload.validate()?;
    Ok(Json(economy_service::set(&state, payload).await?))
}

#[utoipa::path(
    get,
    path = "/admin/settings/timer",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    responses((status = 200, description = "Timer defaults of new sessions", body = TimerSettingsView))
)]
/// Timer defaults applied to new sessions.
pub async fn timer_settings(State(state): State<SharedState>) -> Json<TimerSettingsView> {
    Json(settings_service::timer_settings(&state).await)
}

#[utoipa::path(
    post,
    path = "/admin/settings/timer",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    request_body = TimerSettingsUpdate,
    responses((status = 200, description = "Timer defaults updated", body = TimerSettingsView))
)]
/// Change the timer defaults of sessions opened from now on.
pub async fn update_timer_settings(
    State(state): State<SharedState>,
    Json(payload): Json<TimerSettingsUpdate>,
) -> Result<Json<TimerSettingsView>, AppError> {
    payload.validate()?;
    Ok(Json(
        settings_service::update_timer_settings(&state, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/admin/settings/timer/toggle",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    responses((status = 200, description = "Timer default flipped", body = TimerSettingsView))
)]
/// Flip whether new sessions are timed.
pub async fn toggle_timer(
    State(state): State<SharedState>,
) -> Result<Json<TimerSettingsView>, AppError> {
    Ok(Json(settings_service::toggle_timer(&state).await?))
}

#[utoipa::path(
    post,
    path = "/admin/storage/flush",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    responses(
        (status = 200, description = "Snapshot written; degraded mode cleared", body = FlushResponse),
        (status = 503, description = "Storage still unavailable")
    )
)]
/// Persist the current state now, leaving degraded mode on success.
pub async fn flush_storage(
    State(state): State<SharedState>,
) -> Result<Json<FlushResponse>, AppError> {
    let revision = storage_supervisor::recover(&state)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(FlushResponse { revision }))
}

/// Reject requests that do not carry the configured admin token.
pub(crate) async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    if provided == state.config().admin_token {
        Ok(next.run(req).await)
    } else {
        Err(AppError::Unauthorized("invalid admin token".into()))
    }
}
