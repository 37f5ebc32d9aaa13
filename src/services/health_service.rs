use tracing::warn;

use crate::{dto::health::HealthResponse, state::AppState};

/// Report health, probing the snapshot store on the way.
pub async fn health_status(state: &AppState) -> HealthResponse {
    if let Err(err) = state.store().health_check().await {
        warn!(error = %err, store = %state.store().describe(), "storage health check failed");
        return HealthResponse::degraded();
    }

    if state.is_degraded() {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}
