use serde::Serialize;

use crate::catalog::InferenceMode;

/// Where the manager is in its load cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// No model yet, or the last load succeeded.
    #[default]
    Idle,
    Loading,
    /// The last load failed. Cleared only by a later successful load.
    Error,
}

/// Point-in-time view served by `GET /status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub current_model: Option<String>,
    pub inference_mode: InferenceMode,
    pub status: LifecycleStatus,
}

impl ModelStatus {
    pub fn is_healthy(&self) -> bool {
        self.status != LifecycleStatus::Error
    }
}
