pub mod config;
pub mod error;
pub mod models;
pub mod types;

pub use config::{
    attempt_deadline_for, server_wait_for, Config, PredictionMode, RateLimitStoreKind,
    WAIT_HEADROOM,
};
pub use error::GenerationError;
pub use models::{ModelDescriptor, ModelRegistry, DEFAULT_MODEL, FALLBACK_MODEL};
pub use types::*;
