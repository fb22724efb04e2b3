//! Builds the provider input for one request.
//!
//! Request fields are overlaid onto the model's default input. Only keys the
//! model's template declares are written, plus its image field. Prompt and
//! negative prompt always end with the fixed PS2 style suffixes.

use ps2filter_common::{GenerationRequest, ModelDescriptor};
use serde_json::{json, Map, Value};

/// Provider input payload, parameter name → value.
pub type ModelInput = Map<String, Value>;

pub const PS2_PROMPT_SUFFIX: &str = "PS2 era video game character, low-poly 3D model, \
480p resolution, early 2000s video game graphics, jagged edges, limited texture detail, \
flat shading, pixelated textures, visible polygons, matte finish, simple lighting, \
basic shadow rendering";

pub const PS2_NEGATIVE_SUFFIX: &str = "high resolution, smooth textures, modern graphics, \
ray tracing, 4K, HDR, photorealistic, detailed textures, normal mapping, specular highlights, \
ambient occlusion, anti-aliasing, motion blur, depth of field, volumetric lighting";

pub fn build_model_input(model: &ModelDescriptor, request: &GenerationRequest) -> ModelInput {
    let mut input = model.default_input.clone();

    input.insert(
        model.image_field.clone(),
        json!(request.source_image.as_str()),
    );

    let prompt = augment(user_prompt(request).as_deref(), PS2_PROMPT_SUFFIX);
    let negative_prompt = augment(
        request.user_negative_prompt.as_deref(),
        PS2_NEGATIVE_SUFFIX,
    );

    let fields = [
        ("style", json!(request.style)),
        ("prompt", json!(prompt)),
        ("negative_prompt", json!(negative_prompt)),
        ("prompt_strength", json!(request.prompt_strength)),
        ("denoising_strength", json!(request.denoising_strength)),
        ("instant_id_strength", json!(request.identity_strength)),
    ];
    for (key, value) in fields {
        if model.accepts(key) {
            input.insert(key.to_string(), value);
        }
    }

    input
}

/// User text followed by the fixed suffix. The suffix alone when there is no user text.
pub fn augment(user_text: Option<&str>, suffix: &str) -> String {
    match user_text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => format!("{text} {suffix}"),
        None => suffix.to_string(),
    }
}

/// The caller's own prompt, prefixed with the preset's prompt when one was chosen.
fn user_prompt(request: &GenerationRequest) -> Option<String> {
    let custom = request
        .user_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    match (request.preset, custom) {
        (Some(preset), Some(custom)) => Some(format!("{}, {custom}", preset.prompt())),
        (Some(preset), None) => Some(preset.prompt()),
        (None, Some(custom)) => Some(custom.to_string()),
        (None, None) => None,
    }
}
