use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{AvailableModels, InferenceMode};
use crate::errors::AppError;
use crate::manager::{ModelStatus, SWAP_ETA_SECONDS};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SwapRequest {
    pub model_name: String,
    #[serde(default)]
    pub inference_mode: InferenceMode,
}

#[derive(Debug, Serialize)]
pub struct SwapResponse {
    pub status: &'static str,
    pub target_model: String,
    pub inference_mode: InferenceMode,
    pub eta_seconds: u64,
}

/// GET /status
pub async fn handle_status(State(state): State<AppState>) -> Json<ModelStatus> {
    Json(state.manager.get_status())
}

/// POST /swap
/// Starts the swap in the background and answers immediately. Poll `/status`
/// to see it finish.
pub async fn handle_swap(
    State(state): State<AppState>,
    Json(req): Json<SwapRequest>,
) -> Result<Json<SwapResponse>, AppError> {
    info!(
        "Swap requested: {} ({} mode)",
        req.model_name, req.inference_mode
    );
    state
        .manager
        .spawn_swap(req.model_name.clone(), req.inference_mode)
        .map_err(AppError::from_swap)?;

    Ok(Json(SwapResponse {
        status: "swapping",
        target_model: req.model_name,
        inference_mode: req.inference_mode,
        eta_seconds: SWAP_ETA_SECONDS,
    }))
}

/// GET /models/available
pub async fn handle_available_models(State(state): State<AppState>) -> Json<AvailableModels> {
    Json(state.manager.available_models())
}
