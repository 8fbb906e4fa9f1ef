//! Model Family Handlers: turn a resolved descriptor into engine parameters.
//!
//! Each recognized model family contributes its own defaults (KV block size,
//! images per prompt, served-name aliasing). Names that match no family get
//! the `Default` handler. Handlers are pure: no I/O, no shared state.

use std::fmt;

use serde::Serialize;
use serde_json::json;

use crate::catalog::ModelDescriptor;
use crate::engine::EngineParams;

/// `max_num_seqs` when neither the descriptor nor the common args set it.
pub const DEFAULT_MAX_NUM_SEQS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Qwen,
    Glm,
    Nvidia,
    Smol,
    Default,
}

impl ModelFamily {
    /// Case-insensitive substring match on the model name.
    pub fn detect(model_name: &str) -> Self {
        let name = model_name.to_lowercase();
        if name.contains("qwen") {
            ModelFamily::Qwen
        } else if name.contains("glm") {
            ModelFamily::Glm
        } else if name.contains("nvidia") || name.contains("nemotron") {
            ModelFamily::Nvidia
        } else if name.contains("smol") || name.contains("docling") {
            ModelFamily::Smol
        } else {
            ModelFamily::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Qwen => "qwen",
            ModelFamily::Glm => "glm",
            ModelFamily::Nvidia => "nvidia",
            ModelFamily::Smol => "smol",
            ModelFamily::Default => "default",
        }
    }

    pub fn handler(&self) -> &'static dyn FamilyHandler {
        match self {
            ModelFamily::Qwen => &QwenHandler,
            ModelFamily::Glm => &GlmHandler,
            ModelFamily::Nvidia => &NvidiaHandler,
            ModelFamily::Smol => &SmolHandler,
            ModelFamily::Default => &DefaultHandler,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared interface of every family handler.
pub trait FamilyHandler: Send + Sync {
    fn family(&self) -> ModelFamily;

    /// Short type name, logged when a model is loaded.
    fn handler_name(&self) -> &'static str;

    fn produce_config(&self, descriptor: &ModelDescriptor) -> EngineParams;
}

/// Picks the handler for a model name.
pub fn handler_for(model_name: &str) -> &'static dyn FamilyHandler {
    ModelFamily::detect(model_name).handler()
}

/// Parameters every family starts from.
fn base_params(descriptor: &ModelDescriptor) -> EngineParams {
    let s = &descriptor.settings;
    let mut params = EngineParams::new();
    params
        .set("model", descriptor.name.as_str())
        .set_opt("gpu_memory_utilization", s.gpu_memory_utilization)
        .set_opt("max_model_len", s.max_model_len)
        .set_opt("enforce_eager", s.enforce_eager)
        .set_opt("tensor_parallel_size", s.tensor_parallel_size)
        .set_opt("trust_remote_code", s.trust_remote_code)
        .set("disable_custom_all_reduce", true)
        .set("max_num_seqs", s.max_num_seqs.unwrap_or(DEFAULT_MAX_NUM_SEQS));
    params
}

/// Applies a family's block size and image limit on top of the base set.
/// A descriptor's own `block_size` / `max_images_per_prompt` always win.
fn tuned_params(
    descriptor: &ModelDescriptor,
    default_block_size: Option<u32>,
    default_images: u32,
) -> EngineParams {
    let s = &descriptor.settings;
    let mut params = base_params(descriptor);
    params
        .set_opt("block_size", s.block_size.or(default_block_size))
        .set(
            "limit_mm_per_prompt",
            json!({ "image": s.max_images_per_prompt.unwrap_or(default_images) }),
        );
    params
}

pub struct QwenHandler;

impl FamilyHandler for QwenHandler {
    fn family(&self) -> ModelFamily {
        ModelFamily::Qwen
    }

    fn handler_name(&self) -> &'static str {
        "QwenHandler"
    }

    fn produce_config(&self, descriptor: &ModelDescriptor) -> EngineParams {
        tuned_params(descriptor, Some(16), 10)
    }
}

/// GLM runs with smaller KV blocks, fewer images, and may be served under an alias.
pub struct GlmHandler;

impl FamilyHandler for GlmHandler {
    fn family(&self) -> ModelFamily {
        ModelFamily::Glm
    }

    fn handler_name(&self) -> &'static str {
        "GlmHandler"
    }

    fn produce_config(&self, descriptor: &ModelDescriptor) -> EngineParams {
        let mut params = tuned_params(descriptor, Some(8), 5);
        params.set_opt(
            "served_model_name",
            descriptor.settings.served_model_name.as_deref(),
        );
        params
    }
}

pub struct NvidiaHandler;

impl FamilyHandler for NvidiaHandler {
    fn family(&self) -> ModelFamily {
        ModelFamily::Nvidia
    }

    fn handler_name(&self) -> &'static str {
        "NvidiaHandler"
    }

    fn produce_config(&self, descriptor: &ModelDescriptor) -> EngineParams {
        tuned_params(descriptor, Some(16), 6)
    }
}

/// Small document models (SmolDocling and friends) fit more pages per prompt.
pub struct SmolHandler;

impl FamilyHandler for SmolHandler {
    fn family(&self) -> ModelFamily {
        ModelFamily::Smol
    }

    fn handler_name(&self) -> &'static str {
        "SmolHandler"
    }

    fn produce_config(&self, descriptor: &ModelDescriptor) -> EngineParams {
        tuned_params(descriptor, Some(8), 12)
    }
}

pub struct DefaultHandler;

impl FamilyHandler for DefaultHandler {
    fn family(&self) -> ModelFamily {
        ModelFamily::Default
    }

    fn handler_name(&self) -> &'static str {
        "DefaultHandler"
    }

    fn produce_config(&self, descriptor: &ModelDescriptor) -> EngineParams {
        // block size comes from the merged common args, if anywhere
        tuned_params(descriptor, None, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::catalog::{Category, ModelSettings};


    fn bare_descriptor(name: &str) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            family: ModelFamily::detect(name),
            category: Category::Direct,
            settings: ModelSettings::default(),
        }
    }

    #[test]
    fn test_detect_is_case_insensitive_substring() {
        assert_eq!(ModelFamily::detect("Qwen/Qwen2.5-VL-7B"), ModelFamily::Qwen);
        assert_eq!(ModelFamily::detect("zai-org/glm-4v"), ModelFamily::Glm);
        assert_eq!(ModelFamily::detect("NVIDIA/Llama-Nemotron"), ModelFamily::Nvidia);
        assert_eq!(ModelFamily::detect("org/Nemotron-Nano"), ModelFamily::Nvidia);
        assert_eq!(ModelFamily::detect("ds4sd/SmolDocling"), ModelFamily::Smol);
        assert_eq!(ModelFamily::detect("microsoft/phi-4"), ModelFamily::Default);
    }

    #[test]
    fn test_handler_for_matches_family() {
        assert_eq!(handler_for("Qwen/x").family(), ModelFamily::Qwen);
        assert_eq!(handler_for("unknown").handler_name(), "DefaultHandler");
    }

    #[test]
    fn test_family_defaults_applied() {
        let qwen = handler_for("Qwen/x").produce_config(&bare_descriptor("Qwen/x"));
        assert_eq!(qwen.get("block_size"), Some(&json!(16)));
        assert_eq!(qwen.get("limit_mm_per_prompt"), Some(&json!({"image": 10})));
        assert_eq!(qwen.get("max_num_seqs"), Some(&json!(DEFAULT_MAX_NUM_SEQS)));
        assert_eq!(qwen.get("disable_custom_all_reduce"), Some(&json!(true)));

        let glm = handler_for("glm").produce_config(&bare_descriptor("glm"));
        assert_eq!(glm.get("block_size"), Some(&json!(8)));
        assert_eq!(glm.get("limit_mm_per_prompt"), Some(&json!({"image": 5})));

        let nvidia = handler_for("nvidia/x").produce_config(&bare_descriptor("nvidia/x"));
        assert_eq!(nvidia.get("limit_mm_per_prompt"), Some(&json!({"image": 6})));

        let smol = handler_for("SmolVLM").produce_config(&bare_descriptor("SmolVLM"));
        assert_eq!(smol.get("limit_mm_per_prompt"), Some(&json!({"image": 12})));
    }

    #[test]
    fn test_default_handler_omits_unset_block_size() {
        let params = handler_for("phi").produce_config(&bare_descriptor("phi"));
        assert!(params.get("block_size").is_none());
        assert_eq!(params.get("limit_mm_per_prompt"), Some(&json!({"image": 8})));
    }

    #[test]
    fn test_descriptor_overrides_family_defaults() {
        let mut descriptor = bare_descriptor("Qwen/x");
        descriptor.settings.block_size = Some(64);
        descriptor.settings.max_images_per_prompt = Some(3);
        let params = handler_for("Qwen/x").produce_config(&descriptor);
        assert_eq!(params.get("block_size"), Some(&json!(64)));
        assert_eq!(params.get("limit_mm_per_prompt"), Some(&json!({"image": 3})));
    }

    #[test]
    fn test_only_glm_aliases_served_name() {
        let mut descriptor = bare_descriptor("Qwen/x");
        descriptor.settings.served_model_name = Some("alias".to_string());
        let params = handler_for("Qwen/x").produce_config(&descriptor);
        assert!(params.get("served_model_name").is_none());

        let catalog = sample_catalog();
        let glm = catalog.resolve("zai-org/GLM-4.1V-9B-Thinking").unwrap();
        let params = glm.family.handler().produce_config(&glm);
        assert_eq!(params.served_name(), Some("glm-4v"));
    }

    #[test]
    fn test_no_handler_output_contains_empty_values() {
        let catalog = sample_catalog();
        let mut names: Vec<String> = Vec::new();
        names.extend(catalog.models.direct.keys().cloned());
        names.extend(catalog.models.parser.keys().cloned());
        names.extend(catalog.models.reasoning.keys().cloned());
        names.push("unlisted/bare-model".to_string());

        for name in names {
            let descriptor = catalog
                .resolve(&name)
                .unwrap_or_else(|_| bare_descriptor(&name));
            let params = descriptor.family.handler().produce_config(&descriptor);
            for (key, value) in params.iter() {
                assert!(!value.is_null(), "{name}: key {key} is null");
                assert_ne!(value, &json!(""), "{name}: key {key} is empty");
            }
            assert_eq!(params.model(), Some(name.as_str()));
        }
    }
}
