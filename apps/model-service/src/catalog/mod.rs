//! Model Catalog: the YAML tree of model descriptors the service may load.
//!
//! Models are grouped into three categories. Lookup by name walks the
//! categories in a fixed order (direct → parser → reasoning) and the first
//! match wins. Category-wide settings (`vllm_common_inference_args`) are
//! layered under every descriptor when it is resolved.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::families::ModelFamily;

pub mod available;

pub use available::{AvailableModels, InferenceMode};

/// Sampling temperature used when neither the descriptor nor the common args set one.
pub const DEFAULT_TEMPERATURE: f64 = 0.0;
/// Repetition penalty used when neither the descriptor nor the common args set one.
pub const DEFAULT_REPETITION_PENALTY: f64 = 1.0;
/// Context window assumed when a descriptor omits `max_model_len`.
pub const DEFAULT_MAX_MODEL_LEN: u32 = 8192;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Model '{0}' not found in configuration")]
    ModelNotFound(String),

    #[error("Default model '{0}' is not present in any catalog category")]
    DefaultModelMissing(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Catalog schema
// ────────────────────────────────────────────────────────────────────────────

/// Settings that may appear both in `vllm_common_inference_args` and on a
/// single descriptor. Every field is optional so the two layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub max_model_len: Option<u32>,
    pub gpu_memory_utilization: Option<f64>,
    pub enforce_eager: Option<bool>,
    pub tensor_parallel_size: Option<u32>,
    pub trust_remote_code: Option<bool>,
    pub max_num_seqs: Option<u32>,
    pub block_size: Option<u32>,
    pub served_model_name: Option<String>,
    pub temperature: Option<f64>,
    pub repetition_penalty: Option<f64>,
    pub max_images_per_prompt: Option<u32>,
}

impl ModelSettings {
    /// Returns `self` with every unset field filled from `base`.
    pub fn layered_over(&self, base: &ModelSettings) -> ModelSettings {
        ModelSettings {
            max_model_len: self.max_model_len.or(base.max_model_len),
            gpu_memory_utilization: self.gpu_memory_utilization.or(base.gpu_memory_utilization),
            enforce_eager: self.enforce_eager.or(base.enforce_eager),
            tensor_parallel_size: self.tensor_parallel_size.or(base.tensor_parallel_size),
            trust_remote_code: self.trust_remote_code.or(base.trust_remote_code),
            max_num_seqs: self.max_num_seqs.or(base.max_num_seqs),
            block_size: self.block_size.or(base.block_size),
            served_model_name: self
                .served_model_name
                .clone()
                .or_else(|| base.served_model_name.clone()),
            temperature: self.temperature.or(base.temperature),
            repetition_penalty: self.repetition_penalty.or(base.repetition_penalty),
            max_images_per_prompt: self.max_images_per_prompt.or(base.max_images_per_prompt),
        }
    }
}

/// One entry under `models.<category>` in the catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(default)]
    pub enabled: bool,
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub model_type: Option<String>,
    #[serde(flatten)]
    pub settings: ModelSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCategories {
    #[serde(default)]
    pub direct: BTreeMap<String, ModelEntry>,
    #[serde(default)]
    pub parser: BTreeMap<String, ModelEntry>,
    #[serde(default)]
    pub reasoning: BTreeMap<String, ModelEntry>,
}

/// Display metadata for one inference mode, shown by `/models/available`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeInfo {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub hover_text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceModesInfo {
    #[serde(default)]
    pub direct: ModeInfo,
    #[serde(default)]
    pub combined: ModeInfo,
}

/// The full catalog file. Read once at startup and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub default_model: String,
    #[serde(default)]
    pub vllm_common_inference_args: ModelSettings,
    /// Environment applied to the engine process before it is launched.
    #[serde(default)]
    pub env_vars: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub inference_modes: InferenceModesInfo,
    #[serde(default)]
    pub models: ModelCategories,
}

/// Catalog categories, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Direct,
    Parser,
    Reasoning,
}

impl Category {
    pub const SEARCH_ORDER: [Category; 3] = [Category::Direct, Category::Parser, Category::Reasoning];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Direct => "direct",
            Category::Parser => "parser",
            Category::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Resolved descriptor
// ────────────────────────────────────────────────────────────────────────────

/// A catalog entry resolved by name, with common settings merged underneath.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub name: String,
    pub family: ModelFamily,
    pub category: Category,
    pub settings: ModelSettings,
}

/// Sampling values handed to the engine on every inference call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    pub temperature: f64,
    pub repetition_penalty: f64,
}

impl ModelDescriptor {
    pub fn sampling(&self) -> SamplingDefaults {
        SamplingDefaults {
            temperature: self.settings.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            repetition_penalty: self
                .settings
                .repetition_penalty
                .unwrap_or(DEFAULT_REPETITION_PENALTY),
        }
    }

    pub fn max_model_len(&self) -> u32 {
        self.settings.max_model_len.unwrap_or(DEFAULT_MAX_MODEL_LEN)
    }
}

impl Catalog {
    /// Reads and validates the catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog = serde_yaml::from_str(content)?;
        if catalog.find(&catalog.default_model).is_none() {
            return Err(CatalogError::DefaultModelMissing(catalog.default_model));
        }
        Ok(catalog)
    }

    fn category(&self, category: Category) -> &BTreeMap<String, ModelEntry> {
        match category {
            Category::Direct => &self.models.direct,
            Category::Parser => &self.models.parser,
            Category::Reasoning => &self.models.reasoning,
        }
    }

    /// Finds a raw entry by name. Categories are searched in `SEARCH_ORDER`.
    pub fn find(&self, name: &str) -> Option<(Category, &ModelEntry)> {
        Category::SEARCH_ORDER
            .iter()
            .find_map(|&category| self.category(category).get(name).map(|e| (category, e)))
    }

    /// Resolves `name` into a descriptor with common settings merged in.
    pub fn resolve(&self, name: &str) -> Result<ModelDescriptor, CatalogError> {
        let (category, entry) = self
            .find(name)
            .ok_or_else(|| CatalogError::ModelNotFound(name.to_string()))?;

        Ok(ModelDescriptor {
            name: name.to_string(),
            family: ModelFamily::detect(name),
            category,
            settings: entry.settings.layered_over(&self.vllm_common_inference_args),
        })
    }

    /// `env_vars` rendered as strings, ready for a child process environment.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env_vars
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Null => return None,
                    other => serde_yaml::to_string(other).ok()?.trim().to_string(),
                };
                Some((key.clone(), rendered))
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_CATALOG: &str = r#"
default_model: Qwen/Qwen2.5-VL-7B-Instruct
vllm_common_inference_args:
  temperature: 0.1
  repetition_penalty: 1.05
  block_size: 32
  max_num_seqs: 2
  enforce_eager: false
env_vars:
  CUDA_VISIBLE_DEVICES: 0
  VLLM_WORKER_MULTIPROC_METHOD: spawn
models:
  direct:
    Qwen/Qwen2.5-VL-7B-Instruct:
      enabled: true
      display_name: Qwen 2.5 VL 7B
      type: multimodal
      max_model_len: 10000
      gpu_memory_utilization: 0.85
      tensor_parallel_size: 1
      trust_remote_code: true
    zai-org/GLM-4.1V-9B-Thinking:
      enabled: true
      display_name: GLM 4.1V
      type: multimodal
      max_model_len: 600
      gpu_memory_utilization: 0.9
      tensor_parallel_size: 1
      trust_remote_code: true
      served_model_name: glm-4v
      temperature: 0.6
    shared/overlap-model:
      enabled: false
      display_name: Overlap (direct)
      max_model_len: 4096
  parser:
    ds4sd/SmolDocling-256M-preview:
      enabled: true
      display_name: SmolDocling
      type: vision_ocr
      max_model_len: 8192
      gpu_memory_utilization: 0.3
    shared/overlap-model:
      enabled: true
      display_name: Overlap (parser)
      max_model_len: 2048
  reasoning:
    nvidia/Nemotron-Mini-4B-Instruct:
      enabled: true
      display_name: Nemotron Mini
      type: text_reasoning
      max_model_len: 4096
      gpu_memory_utilization: 0.5
    microsoft/phi-4:
      enabled: true
      display_name: Phi 4
      max_model_len: 16384
"#;

    pub(crate) fn sample_catalog() -> Catalog {
        Catalog::from_yaml(SAMPLE_CATALOG).unwrap()
    }

    #[test]
    fn test_resolve_merges_common_args_under_descriptor() {
        let catalog = sample_catalog();
        let glm = catalog.resolve("zai-org/GLM-4.1V-9B-Thinking").unwrap();

        assert_eq!(glm.category, Category::Direct);
        assert_eq!(glm.family, ModelFamily::Glm);
        // descriptor wins
        assert_eq!(glm.settings.temperature, Some(0.6));
        // common fills the gaps
        assert_eq!(glm.settings.repetition_penalty, Some(1.05));
        assert_eq!(glm.settings.block_size, Some(32));
        assert_eq!(glm.settings.max_num_seqs, Some(2));
        assert_eq!(glm.settings.served_model_name.as_deref(), Some("glm-4v"));
    }

    #[test]
    fn test_lookup_order_first_category_wins() {
        let catalog = sample_catalog();
        let (category, entry) = catalog.find("shared/overlap-model").unwrap();
        assert_eq!(category, Category::Direct);
        assert_eq!(entry.settings.max_model_len, Some(4096));
    }

    #[test]
    fn test_resolve_unknown_model_is_not_found() {
        let catalog = sample_catalog();
        let err = catalog.resolve("unknown-model").unwrap_err();
        assert!(matches!(err, CatalogError::ModelNotFound(name) if name == "unknown-model"));
    }

    #[test]
    fn test_default_model_must_exist() {
        let yaml = SAMPLE_CATALOG.replace(
            "default_model: Qwen/Qwen2.5-VL-7B-Instruct",
            "default_model: missing/model",
        );
        let err = Catalog::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, CatalogError::DefaultModelMissing(_)));
    }

    #[test]
    fn test_sampling_defaults_when_unset() {
        let catalog = Catalog::from_yaml(
            "default_model: m\nmodels:\n  direct:\n    m:\n      enabled: true\n",
        )
        .unwrap();
        let descriptor = catalog.resolve("m").unwrap();
        let sampling = descriptor.sampling();
        assert_eq!(sampling.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(sampling.repetition_penalty, DEFAULT_REPETITION_PENALTY);
        assert_eq!(descriptor.max_model_len(), DEFAULT_MAX_MODEL_LEN);
        assert_eq!(descriptor.family, ModelFamily::Default);
    }

    #[test]
    fn test_env_pairs_render_scalars_as_strings() {
        let catalog = sample_catalog();
        let pairs = catalog.env_pairs();
        assert!(pairs.contains(&("CUDA_VISIBLE_DEVICES".to_string(), "0".to_string())));
        assert!(pairs.contains(&(
            "VLLM_WORKER_MULTIPROC_METHOD".to_string(),
            "spawn".to_string()
        )));
    }

    #[test]
    fn test_load_reads_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        std::fs::write(&path, SAMPLE_CATALOG).unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.default_model, "Qwen/Qwen2.5-VL-7B-Instruct");
        assert_eq!(catalog.models.reasoning.len(), 2);
    }
}
