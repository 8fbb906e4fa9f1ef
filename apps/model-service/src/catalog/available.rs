//! Reshapes the catalog into the listing served by `GET /models/available`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Catalog, ModeInfo, ModelEntry};

/// How résumé pages reach a verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    /// A single multimodal model reads the page images directly.
    #[default]
    Direct,
    /// A vision parser extracts the text, a reasoning model judges it.
    Combined,
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceMode::Direct => f.write_str("direct"),
            InferenceMode::Combined => f.write_str("combined"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelListing {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_model_len: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeListing {
    pub display_name: String,
    pub description: String,
    pub hover_text: String,
    pub models: BTreeMap<String, ModelListing>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeListings {
    pub direct: ModeListing,
    pub combined: ModeListing,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableModels {
    pub inference_modes: ModeListings,
    pub current_mode: InferenceMode,
    pub current_model: Option<String>,
}

fn enabled_listings(
    entries: &BTreeMap<String, ModelEntry>,
    fallback_type: &str,
) -> BTreeMap<String, ModelListing> {
    entries
        .iter()
        .filter(|(_, entry)| entry.enabled)
        .map(|(name, entry)| {
            let listing = ModelListing {
                name: name.clone(),
                display_name: entry.display_name.clone().unwrap_or_else(|| name.clone()),
                model_type: entry
                    .model_type
                    .clone()
                    .unwrap_or_else(|| fallback_type.to_string()),
                max_model_len: entry.settings.max_model_len,
                vision_model: None,
                reasoning_model: None,
            };
            (name.clone(), listing)
        })
        .collect()
}

fn mode_listing(
    info: &ModeInfo,
    display_name: &str,
    description: &str,
    hover_text: &str,
    models: BTreeMap<String, ModelListing>,
) -> ModeListing {
    ModeListing {
        display_name: info
            .display_name
            .clone()
            .unwrap_or_else(|| display_name.to_string()),
        description: info
            .description
            .clone()
            .unwrap_or_else(|| description.to_string()),
        hover_text: info
            .hover_text
            .clone()
            .unwrap_or_else(|| hover_text.to_string()),
        models,
    }
}

impl Catalog {
    /// Builds the availability listing. Only enabled models are listed;
    /// combined entries pair every parser with every reasoning model.
    pub fn available_models(
        &self,
        current_mode: InferenceMode,
        current_model: Option<String>,
    ) -> AvailableModels {
        let direct = enabled_listings(&self.models.direct, "multimodal");
        let parsers = enabled_listings(&self.models.parser, "vision_ocr");
        let reasoners = enabled_listings(&self.models.reasoning, "text_reasoning");

        let mut combined = BTreeMap::new();
        for parser in parsers.values() {
            for reasoner in reasoners.values() {
                let combo_name = format!("{} + {}", parser.display_name, reasoner.display_name);
                combined.insert(
                    combo_name.clone(),
                    ModelListing {
                        name: combo_name.clone(),
                        display_name: combo_name,
                        model_type: "hybrid_combination".to_string(),
                        max_model_len: None,
                        vision_model: Some(parser.name.clone()),
                        reasoning_model: Some(reasoner.name.clone()),
                    },
                );
            }
        }

        AvailableModels {
            inference_modes: ModeListings {
                direct: mode_listing(
                    &self.inference_modes.direct,
                    "Direct",
                    "Single multimodal model processes images directly",
                    "Single multimodal model that directly processes résumé page images",
                    direct,
                ),
                combined: mode_listing(
                    &self.inference_modes.combined,
                    "Combined",
                    "Two-stage: vision extraction + text reasoning",
                    "Two-stage pipeline using a vision parser and a reasoning model",
                    combined,
                ),
            },
            current_mode,
            current_model,
        }
    }
}
