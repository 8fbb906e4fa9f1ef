use std::sync::Arc;

use crate::manager::ModelManager;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Sole owner of the live engine. Every route goes through it.
    pub manager: Arc<ModelManager>,
}
