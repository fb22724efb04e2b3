pub mod orchestrator;
pub mod prediction;
pub mod prompt;
pub mod ratelimit;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use orchestrator::{GeneratedImage, GenerationOrchestrator, GenerationOutcome};
pub use prediction::strategy::{
    strategy_for, BlockingStrategy, PollBudget, PollingStrategy, PredictionStrategy, RetryPolicy,
};
pub use prediction::{JobState, PredictionClient, PredictionJob};
pub use prompt::{build_model_input, ModelInput};
pub use ratelimit::{MemoryCounterStore, RateLimiter};
pub use traits::{CounterStore, PredictionApi};
