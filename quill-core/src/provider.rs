//! Correction seams
//!
//! Two traits separate the layers of the pipeline:
//!
//! - [`CorrectionProvider`] is one external capability (an HTTP model API).
//!   Errors are returned as-is so the caller can retry or trip a breaker.
//! - [`Corrector`] is what the scheduler dispatches to. The orchestrator
//!   implements it by layering cache, retries, breaker and local fallback
//!   over a provider.

use crate::{Correction, QuillResult};
use async_trait::async_trait;

/// An external correction capability.
///
/// Implementations must be thread-safe (Send + Sync).
///
/// # Example
/// ```ignore
/// struct EchoProvider;
///
/// #[async_trait]
/// impl CorrectionProvider for EchoProvider {
///     fn provider_id(&self) -> &str { "echo" }
///     async fn correct(&self, word: &str, _context: &str) -> QuillResult<Correction> {
///         Ok(Correction::unchanged(word))
///     }
/// }
/// ```
#[async_trait]
pub trait CorrectionProvider: Send + Sync {
    /// Stable identifier, also used as the circuit breaker name.
    fn provider_id(&self) -> &str;

    /// Correct one word given its surrounding text.
    ///
    /// # Returns
    /// * `Ok(Correction)` - The suggestion; `was_corrected` reflects whether it differs
    /// * `Err(QuillError::Provider)` - Transport, status or response-shape failures
    async fn correct(&self, word: &str, context: &str) -> QuillResult<Correction>;
}

/// The operation the scheduler dispatches for each distinct word of a group.
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn correct(&self, word: &str, context: &str) -> QuillResult<Correction>;
}
