use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use url::Url;

use crate::error::GenerationError;

pub const DEFAULT_STYLE: &str = "Video game";
pub const DEFAULT_PROMPT_STRENGTH: f64 = 4.5;
pub const DEFAULT_DENOISING_STRENGTH: f64 = 0.65;
pub const DEFAULT_IDENTITY_STRENGTH: f64 = 0.8;

const MAX_PROMPT_STRENGTH: f64 = 20.0;
const MAX_PROMPT_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// Style presets
// ---------------------------------------------------------------------------

const PRESET_BASE_PROMPT: &str =
    "PS2 era video game character, low-poly 3D model, 480p resolution, early 2000s graphics";

/// Named PS2 looks offered by the front-end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StylePreset {
    #[default]
    General,
    Gta,
    FinalFantasy,
    MetalGear,
    ResidentEvil,
}

impl StylePreset {
    fn fragment(self) -> &'static str {
        match self {
            StylePreset::General => "generic PS2 game character",
            StylePreset::Gta => "Grand Theft Auto style, urban setting, satirical",
            StylePreset::FinalFantasy => "Final Fantasy style, JRPG character, fantastical",
            StylePreset::MetalGear => "Metal Gear Solid style, stealth action, military",
            StylePreset::ResidentEvil => "Resident Evil style, survival horror, zombies",
        }
    }

    pub fn prompt(self) -> String {
        format!("{PRESET_BASE_PROMPT}, {}", self.fragment())
    }
}

// ---------------------------------------------------------------------------
// GenerationRequest
// ---------------------------------------------------------------------------

/// One inbound generation call, with provider defaults filled in.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct GenerationRequest {
    pub source_image: Url,
    #[builder(default)]
    pub user_prompt: Option<String>,
    #[builder(default = DEFAULT_STYLE.to_string(), setter(into))]
    pub style: String,
    #[builder(default = DEFAULT_PROMPT_STRENGTH)]
    pub prompt_strength: f64,
    #[builder(default = DEFAULT_DENOISING_STRENGTH)]
    pub denoising_strength: f64,
    /// Sent to the provider as `instant_id_strength`.
    #[builder(default = DEFAULT_IDENTITY_STRENGTH)]
    pub identity_strength: f64,
    #[builder(default)]
    pub user_negative_prompt: Option<String>,
    #[builder(default)]
    pub preset: Option<StylePreset>,
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if !matches!(self.source_image.scheme(), "http" | "https") {
            return Err(GenerationError::InvalidRequest(format!(
                "image URL must use http or https, got {}",
                self.source_image.scheme()
            )));
        }

        check_range("prompt_strength", self.prompt_strength, MAX_PROMPT_STRENGTH)?;
        check_range("denoising_strength", self.denoising_strength, 1.0)?;
        check_range("instant_id_strength", self.identity_strength, 1.0)?;

        for (field, text) in [
            ("prompt", &self.user_prompt),
            ("negative_prompt", &self.user_negative_prompt),
        ] {
            if text.as_ref().is_some_and(|t| t.chars().count() > MAX_PROMPT_CHARS) {
                return Err(GenerationError::InvalidRequest(format!(
                    "{field} exceeds {MAX_PROMPT_CHARS} characters"
                )));
            }
        }

        if self.style.trim().is_empty() {
            return Err(GenerationError::InvalidRequest("style must not be empty".into()));
        }

        Ok(())
    }
}

fn check_range(field: &str, value: f64, max: f64) -> Result<(), GenerationError> {
    if value.is_finite() && (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(GenerationError::InvalidRequest(format!(
            "{field} must be between 0 and {max}, got {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Caller's network identity, used as the rate-limit key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window closes.
    pub reset: DateTime<Utc>,
}
