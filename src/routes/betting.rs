use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use validator::Validate;

use crate::{
    dto::{
        betting::{
            BetAllRequest, BetResponse, CancelBetRequest, CancelBetResponse, PlaceBetRequest,
            ReactionAccepted, ReactionRequest, UserOverview,
        },
        session::{SessionQuery, SessionSummary, SessionView},
    },
    error::AppError,
    services::{betting_service, reaction_service},
    state::SharedState,
};

/// Endpoints driven by chat users: bets, reactions and read-only views.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/view", get(view_session))
        .route("/bets", post(place_bet))
        .route("/bets/all", post(bet_all))
        .route("/bets/cancel", post(cancel_bet))
        .route("/reactions", post(submit_reaction))
        .route("/users/{user_id}", get(user_overview))
}

#[utoipa::path(
    get,
    path = "/sessions",
    tag = "betting",
    responses((status = 200, description = "Every session, most recent first", body = [SessionSummary]))
)]
/// List open, locked and terminal sessions.
pub async fn list_sessions(State(state): State<SharedState>) -> Json<Vec<SessionSummary>> {
    Json(betting_service::list_sessions(&state).await)
}

#[utoipa::path(
    get,
    path = "/sessions/view",
    tag = "betting",
    params(SessionQuery),
    responses(
        (status = 200, description = "Session details", body = SessionView),
        (status = 404, description = "No matching session"),
        (status = 409, description = "Several sessions are active and none was named")
    )
)]
/// Return one session, resolving the optional reference the same way bets do.
pub async fn view_session(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(betting_service::session_view(&state, query).await?))
}

#[utoipa::path(
    post,
    path = "/bets",
    tag = "betting",
    request_body = PlaceBetRequest,
    responses(
        (status = 200, description = "Bet placed", body = BetResponse),
        (status = 409, description = "Betting is locked or the session is closed"),
        (status = 422, description = "Insufficient funds, bad amount or unknown contestant")
    )
)]
/// Place or replace a bet.
pub async fn place_bet(
    State(state): State<SharedState>,
    Json(payload): Json<PlaceBetRequest>,
) -> Result<Json<BetResponse>, AppError> {
    payload.validate()?;
    Ok(Json(betting_service::place_bet(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/bets/all",
    tag = "betting",
    request_body = BetAllRequest,
    responses((status = 200, description = "Whole balance staked", body = BetResponse))
)]
/// Stake everything the user holds, including a bet being replaced.
pub async fn bet_all(
    State(state): State<SharedState>,
    Json(payload): Json<BetAllRequest>,
) -> Result<Json<BetResponse>, AppError> {
    payload.validate()?;
    Ok(Json(betting_service::bet_all(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/bets/cancel",
    tag = "betting",
    request_body = CancelBetRequest,
    responses(
        (status = 200, description = "Bet withdrawn and refunded", body = CancelBetResponse),
        (status = 404, description = "The user has no bet in the session")
    )
)]
/// Withdraw a bet while the session is still open.
pub async fn cancel_bet(
    State(state): State<SharedState>,
    Json(payload): Json<CancelBetRequest>,
) -> Result<Json<CancelBetResponse>, AppError> {
    payload.validate()?;
    Ok(Json(betting_service::cancel_bet(&state, payload).await?))
}

#[utoipa::path(
    post,
    path = "/reactions",
    tag = "betting",
    request_body = ReactionRequest,
    responses(
        (status = 202, description = "Reaction queued; the outcome is pushed as reaction.cleanup", body = ReactionAccepted),
        (status = 400, description = "Reaction is not bound to a bet")
    )
)]
/// Queue a reaction bet; bursts from the same user collapse into the last one.
pub async fn submit_reaction(
    State(state): State<SharedState>,
    Json(payload): Json<ReactionRequest>,
) -> Result<(StatusCode, Json<ReactionAccepted>), AppError> {
    payload.validate()?;
    let accepted = reaction_service::submit_reaction(&state, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "betting",
    params(("user_id" = String, Path, description = "Chat platform user identifier")),
    responses((status = 200, description = "Balance and active bets", body = UserOverview))
)]
/// Return a user's balance and active bets. Unseen users report the starting balance.
pub async fn user_overview(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserOverview>, AppError> {
    Ok(Json(betting_service::user_overview(&state, &user_id).await?))
}
