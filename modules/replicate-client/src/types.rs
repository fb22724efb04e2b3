use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Model input payload: parameter name → value.
pub type PredictionInput = Map<String, Value>;

/// Body for `POST /predictions`.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePrediction<'a> {
    pub version: &'a str,
    pub input: &'a PredictionInput,
}

/// Lifecycle status reported by Replicate. Anything the API adds later
/// lands in `Unknown` instead of failing deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Links returned with every prediction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionUrls {
    pub get: Option<String>,
    pub cancel: Option<String>,
}

/// A prediction as returned by create and get calls.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub status: PredictionStatus,
    /// A single URI or a list of URIs, depending on the model.
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub urls: Option<PredictionUrls>,
}

impl Prediction {
    pub fn poll_url(&self) -> Option<&str> {
        self.urls
            .as_ref()
            .and_then(|u| u.get.as_deref())
            .filter(|u| !u.is_empty())
    }

    /// Provider error message, whether it arrived as a string or a structured value.
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
