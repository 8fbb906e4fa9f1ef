//! Inference Request Pipeline: prompt → one constrained engine call → verdict.
//!
//! Nothing fails out of this module. `analyze` returns an `Analysis`, whose
//! `Failed` branch still converts into an `InferenceResult` with
//! `outcome = Failed`, so a bad generation never interrupts the caller's loop.

use tracing::{debug, error, info};

use crate::catalog::SamplingDefaults;
use crate::engine::{Engine, GenerationRequest, PageImage, SamplingParams};

pub mod prompts;
pub mod schema;

pub use schema::{InferenceResult, Outcome};

pub const MAX_RESPONSE_TOKENS: u32 = 1500;
pub const MIN_RESPONSE_TOKENS: u32 = 512;
/// Tokens of the context window kept free for the prompt itself.
pub const PROMPT_HEADROOM_TOKENS: u32 = 500;

pub const PARSE_FAILURE_REASON: &str = "error parsing AI response";
pub const UNEXPECTED_FAILURE_REASON: &str = "unexpected error during analysis";

/// How much raw engine output to keep in the log when it fails to parse.
const RAW_SAMPLE_CHARS: usize = 500;

/// One screening request. Pages are moved in and only read.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub images: Vec<PageImage>,
    pub job_description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Output was not JSON or did not match the result schema.
    SchemaParse,
    /// The engine call itself failed.
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisFailure {
    pub kind: FailureKind,
    /// Internal detail. Logged, never returned to callers.
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Analysis {
    Completed(InferenceResult),
    Failed(AnalysisFailure),
}

impl Analysis {
    pub fn into_result(self) -> InferenceResult {
        match self {
            Analysis::Completed(result) => result,
            Analysis::Failed(failure) => {
                debug!("Analysis failed ({:?}): {}", failure.kind, failure.detail);
                InferenceResult::failed(match failure.kind {
                    FailureKind::SchemaParse => PARSE_FAILURE_REASON,
                    FailureKind::Unexpected => UNEXPECTED_FAILURE_REASON,
                })
            }
        }
    }
}

/// Output token budget: at most 1500, at least 512, and never more than the
/// context window minus the prompt headroom (unless that drops below 512).
pub fn response_budget(max_model_len: u32) -> u32 {
    max_model_len
        .saturating_sub(PROMPT_HEADROOM_TOKENS)
        .max(MIN_RESPONSE_TOKENS)
        .min(MAX_RESPONSE_TOKENS)
}

/// Runs one screening request against `engine`.
pub async fn analyze(
    engine: &dyn Engine,
    sampling: SamplingDefaults,
    request: InferenceRequest,
) -> Analysis {
    let max_tokens = response_budget(engine.max_model_len());
    let page_count = request.images.len();

    let generation = GenerationRequest {
        prompt: prompts::build_prompt(page_count, &request.job_description),
        images: request.images,
        sampling: SamplingParams {
            temperature: sampling.temperature,
            repetition_penalty: sampling.repetition_penalty,
            max_tokens,
            guided_json: schema::result_schema(),
        },
    };

    info!("Generating response with {page_count} images and max_tokens={max_tokens}");

    let raw = match engine.generate(&generation).await {
        Ok(raw) => raw,
        Err(e) => {
            error!("Unexpected error during engine inference: {e:?}");
            return Analysis::Failed(AnalysisFailure {
                kind: FailureKind::Unexpected,
                detail: e.to_string(),
            });
        }
    };

    match parse_response(&raw) {
        Ok(result) => Analysis::Completed(result),
        Err(e) => {
            error!("Error parsing JSON from engine response: {e}");
            error!(
                "Raw response: {}...",
                raw.chars().take(RAW_SAMPLE_CHARS).collect::<String>()
            );
            Analysis::Failed(AnalysisFailure {
                kind: FailureKind::SchemaParse,
                detail: e.to_string(),
            })
        }
    }
}

/// Parses and validates engine output against the result shape.
pub fn parse_response(raw: &str) -> Result<InferenceResult, serde_json::Error> {
    serde_json::from_str(strip_json_fences(raw))
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
