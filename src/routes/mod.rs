use axum::Router;

use crate::state::SharedState;

/// Operator endpoints behind the admin token.
pub mod admin;
/// Bets, reactions and session views.
pub mod betting;
/// OpenAPI document and Swagger UI.
pub mod docs;
/// Liveness endpoint.
pub mod health;
/// Public and admin event streams.
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router(state.clone()))
        .merge(betting::router())
        .merge(admin::router(state.clone()));

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
