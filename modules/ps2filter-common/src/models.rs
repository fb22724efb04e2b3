use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::GenerationError;

/// Model used when `CURRENT_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "face-to-many";

/// Restoration-only model callers can fall back to.
pub const FALLBACK_MODEL: &str = "gfpgan";

/// A Replicate model pinned to one version with its default input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub version: String,
    /// Input key that receives the source image URL.
    pub image_field: String,
    pub default_input: Map<String, Value>,
}

impl ModelDescriptor {
    /// Whether the model's input template declares `field`.
    pub fn accepts(&self, field: &str) -> bool {
        self.default_input.contains_key(field)
    }
}

/// Static lookup of supported models. Built once at startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn builtin() -> Self {
        let mut models = HashMap::new();

        models.insert(
            "gfpgan".to_string(),
            ModelDescriptor {
                name: "gfpgan".to_string(),
                version: "9283608cc6b7be6b65a8e44983db012355fde4132009bf99d976b2f0896856a3"
                    .to_string(),
                image_field: "img".to_string(),
                default_input: template([
                    ("img", json!("")),
                    ("version", json!("v1.4")),
                    ("scale", json!(2)),
                ]),
            },
        );

        models.insert(
            "face-to-many".to_string(),
            ModelDescriptor {
                name: "face-to-many".to_string(),
                version: "a07f252abbbd832009640b27f063ea52d87d7a23a185ca165bec23b5adc8deaf"
                    .to_string(),
                image_field: "image".to_string(),
                default_input: template([
                    ("image", json!("")),
                    ("prompt", json!("")),
                    ("style", json!("Video game")),
                    ("prompt_strength", json!(4.5)),
                    ("denoising_strength", json!(0.65)),
                    ("instant_id_strength", json!(0.8)),
                    ("negative_prompt", json!("")),
                ]),
            },
        );

        Self { models }
    }

    /// Look up a model by name. Never substitutes a default.
    pub fn get(&self, name: &str) -> Result<&ModelDescriptor, GenerationError> {
        self.models
            .get(name)
            .ok_or_else(|| GenerationError::UnknownModel(name.to_string()))
    }

    /// The configured model name, or [`DEFAULT_MODEL`] when unset or blank.
    pub fn default_model_name(configured: Option<&str>) -> String {
        configured
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn template<const N: usize>(fields: [(&str, Value); N]) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
