pub mod health;
pub mod inference;
pub mod models;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/status", get(models::handle_status))
        .route("/swap", post(models::handle_swap))
        .route("/models/available", get(models::handle_available_models))
        .route("/inference", post(inference::handle_inference))
        .with_state(state)
}
