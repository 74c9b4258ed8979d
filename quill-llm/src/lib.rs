//! QUILL LLM - Resilient Correction Path
//!
//! Everything between a cache miss and a correction:
//! - [`breaker`]: per-dependency circuit breakers and their registry
//! - [`retry`]: exponential backoff with jitter for transient failures
//! - [`providers`]: OpenAI, Anthropic and Mixtral clients
//! - [`fallback`]: the local misspelling dictionary
//! - [`orchestrator`]: ties them together behind [`quill_core::Corrector`]

pub mod breaker;
pub mod fallback;
pub mod orchestrator;
pub mod providers;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerRegistry};
pub use fallback::LocalDictionary;
pub use orchestrator::{CorrectionOrchestrator, ProviderRoute};
pub use providers::build_provider;
pub use retry::RetryPolicy;
