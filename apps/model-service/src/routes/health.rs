use axum::{extract::State, Json};
use serde::Serialize;

use crate::manager::ModelStatus;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_status: ModelStatus,
}

/// GET /health
/// Unhealthy only while the last load has failed and nothing replaced it.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_status = state.manager.get_status();
    let status = if model_status.is_healthy() {
        "healthy"
    } else {
        "unhealthy"
    };
    Json(HealthResponse {
        status,
        model_status,
    })
}
