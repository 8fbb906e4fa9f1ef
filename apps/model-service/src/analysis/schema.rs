//! The screening verdict and the JSON schema the engine is constrained to.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Screening outcome. Serialized names are a contract with downstream services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Shortlisted,
    Rejected,
    #[serde(rename = "Needs Review")]
    NeedsReview,
    Invalid,
    Failed,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Shortlisted,
        Outcome::Rejected,
        Outcome::NeedsReview,
        Outcome::Invalid,
        Outcome::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Shortlisted => "Shortlisted",
            Outcome::Rejected => "Rejected",
            Outcome::NeedsReview => "Needs Review",
            Outcome::Invalid => "Invalid",
            Outcome::Failed => "Failed",
        }
    }
}

/// Structured verdict for one résumé against one job description.
///
/// `Failed` and `Invalid` are ordinary values: callers record them as the
/// application outcome instead of dropping the résumé.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferenceResult {
    pub name: String,
    pub email: String,
    pub outcome: Outcome,
    pub reason: String,
}

impl InferenceResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            outcome: Outcome::Failed,
            reason: reason.into(),
        }
    }
}

/// JSON schema for `InferenceResult`, passed to the engine for guided decoding.
pub fn result_schema() -> Value {
    let outcomes: Vec<&str> = Outcome::ALL.iter().map(Outcome::as_str).collect();
    json!({
        "title": "InferenceResult",
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "email": { "type": "string" },
            "outcome": { "type": "string", "enum": outcomes },
            "reason": { "type": "string" }
        },
        "required": ["name", "email", "outcome", "reason"],
        "additionalProperties": false
    })
}
