//! Engine abstraction: the heavy, memory-resident model runtime.
//!
//! `EngineBackend` constructs engines and reclaims accelerator memory;
//! `Engine` is the live handle. Only `ModelManager` ever holds an `Engine`.

use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

pub mod params;
pub mod vllm;

#[cfg(test)]
pub mod testing;

pub use params::EngineParams;
pub use vllm::VllmBackend;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to launch engine process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Engine exited during startup ({0})")]
    ExitedDuringStartup(String),

    #[error("Engine did not become ready within {0} seconds")]
    StartupTimeout(u64),

    #[error("Engine parameters are missing '{0}'")]
    MissingParam(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Engine API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Engine returned empty content")]
    EmptyContent,

    #[error("Engine failure: {0}")]
    Other(String),
}

/// One rendered résumé page, as encoded image bytes (PNG or JPEG).
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage(Bytes);

impl PageImage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        let data = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self(Bytes::from(data)))
    }

    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn mime_type(&self) -> &'static str {
        if self.0.starts_with(&[0xFF, 0xD8, 0xFF]) {
            "image/jpeg"
        } else if self.0.starts_with(b"RIFF") && self.0.get(8..12) == Some(b"WEBP".as_slice()) {
            "image/webp"
        } else {
            "image/png"
        }
    }

    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.0);
        format!("data:{};base64,{}", self.mime_type(), encoded)
    }
}

/// Sampling settings for a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub repetition_penalty: f64,
    pub max_tokens: u32,
    /// JSON schema the output is constrained to.
    pub guided_json: Value,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub images: Vec<PageImage>,
    pub sampling: SamplingParams,
}

/// Free and total accelerator memory after a reclamation pass, in MiB.
/// Both are `None` when the backend cannot observe the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryHeadroom {
    pub free_mib: Option<u64>,
    pub total_mib: Option<u64>,
}

/// A live engine instance.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Context window the engine was built with.
    fn max_model_len(&self) -> u32;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, EngineError>;

    /// Tears the engine down and waits until it is gone.
    async fn release(self: Box<Self>) -> Result<(), EngineError>;
}

#[async_trait]
pub trait EngineBackend: Send + Sync {
    async fn construct(&self, params: &EngineParams) -> Result<Box<dyn Engine>, EngineError>;

    /// Forces deferred memory reclamation and returns once the device has
    /// actually given the memory back.
    async fn reclaim_memory(&self) -> Result<MemoryHeadroom, EngineError>;
}
