use std::convert::Infallible;

use axum::{Router, extract::State, middleware, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{
    routes::admin::require_admin_token,
    services::sse_service::{self, StreamKind},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/public",
    tag = "sse",
    responses((status = 200, description = "Public SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream session lifecycle, countdown and reaction events to presentation clients.
pub async fn public_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe_public(&state);
    info!("New public SSE connection");
    sse_service::broadcast_handshake(state.public_sse(), StreamKind::Public, state.is_degraded());
    sse_service::to_sse_stream(receiver, StreamKind::Public)
}

#[utoipa::path(
    get,
    path = "/sse/admin",
    tag = "sse",
    params(("X-Admin-Token" = String, Header, description = "Configured admin token")),
    responses(
        (status = 200, description = "Admin SSE stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Missing or invalid admin token")
    )
)]
/// Stream operator alerts: integrity errors and storage status changes.
pub async fn admin_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe_admin(&state);
    info!("New admin SSE connection");
    sse_service::broadcast_handshake(state.admin_sse(), StreamKind::Admin, state.is_degraded());
    sse_service::to_sse_stream(receiver, StreamKind::Admin)
}

/// Configure the SSE endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    let admin = Router::<SharedState>::new()
        .route("/sse/admin", get(admin_stream))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token));

    Router::<SharedState>::new()
        .route("/sse/public", get(public_stream))
        .merge(admin)
}
