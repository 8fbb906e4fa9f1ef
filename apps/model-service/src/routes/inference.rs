use axum::{extract::State, Json};
use serde::Deserialize;

use crate::analysis::InferenceResult;
use crate::engine::PageImage;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InferenceBody {
    /// Résumé pages in order, base64-encoded PNG/JPEG/WebP.
    pub images_b64: Vec<String>,
    pub job_description: String,
}

/// POST /inference
/// Screens one résumé. Busy conditions come back as 503; anything that goes
/// wrong inside the model comes back as a 200 with `outcome = "Failed"`.
pub async fn handle_inference(
    State(state): State<AppState>,
    Json(body): Json<InferenceBody>,
) -> Result<Json<InferenceResult>, AppError> {
    if body.images_b64.is_empty() {
        return Err(AppError::Validation(
            "images_b64 must contain at least one page".to_string(),
        ));
    }

    let images = body
        .images_b64
        .iter()
        .enumerate()
        .map(|(i, encoded)| {
            PageImage::from_base64(encoded)
                .map_err(|e| AppError::Validation(format!("images_b64[{i}] is not valid base64: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let result = state
        .manager
        .inference(images, body.job_description)
        .await?;
    Ok(Json(result))
}
