use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::manager::ManagerError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A swap is underway. Retry once `/status` reports idle.
    #[error("Model is swapping, please try again later")]
    ModelBusy,

    #[error("No model loaded")]
    NoModelLoaded,

    /// A second `/swap` while one is already running.
    #[error("Swap already in progress")]
    SwapInProgress,

    #[error("Model load failed: {0}")]
    LoadFailed(String),
}

impl AppError {
    /// Maps a manager error on the swap path, where a held gate is a conflict
    /// rather than a busy inference slot.
    pub fn from_swap(err: ManagerError) -> Self {
        match err {
            ManagerError::SwapInProgress => AppError::SwapInProgress,
            other => other.into(),
        }
    }
}

impl From<ManagerError> for AppError {
    fn from(err: ManagerError) -> Self {
        if err.is_busy() {
            tracing::debug!("Request refused while the model is unavailable: {err}");
        }
        match err {
            ManagerError::ModelNotFound(name) => {
                AppError::NotFound(format!("Model '{name}' not found in configuration"))
            }
            ManagerError::SwapInProgress => AppError::ModelBusy,
            ManagerError::NoModelLoaded => AppError::NoModelLoaded,
            e @ ManagerError::LoadFailed { .. } => AppError::LoadFailed(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::ModelBusy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "MODEL_BUSY",
                self.to_string(),
            ),
            AppError::NoModelLoaded => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_MODEL_LOADED",
                self.to_string(),
            ),
            AppError::SwapInProgress => (
                StatusCode::CONFLICT,
                "SWAP_IN_PROGRESS",
                self.to_string(),
            ),
            AppError::LoadFailed(msg) => {
                tracing::error!("Model load failed: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "MODEL_LOAD_FAILED",
                    "The model could not be loaded".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_manager_errors_map_to_503() {
        let busy = AppError::from(ManagerError::SwapInProgress).into_response();
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);

        let empty = AppError::from(ManagerError::NoModelLoaded).into_response();
        assert_eq!(empty.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_swap_path_maps_held_gate_to_conflict() {
        let response = AppError::from_swap(ManagerError::SwapInProgress).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response =
            AppError::from_swap(ManagerError::ModelNotFound("x".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
