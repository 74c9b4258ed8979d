//! QUILL Test Utilities
//!
//! Shared test infrastructure for the QUILL workspace:
//! - Scripted providers and correctors with call counting
//! - A callback recorder for scheduler tests
//! - Temporary cache fixtures and fast configs
//! - Proptest generators

pub use quill_cache::SecureCache;
pub use quill_core::{
    CacheConfig, Correction, CorrectionProvider, Corrector, ProviderError, QuillConfig,
    QuillError, QuillResult, RetryConfig, SchedulerConfig,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// MOCK PROVIDERS
// ============================================================================

fn transient_failure(provider: &str) -> QuillError {
    ProviderError::RequestFailed {
        provider: provider.to_string(),
        status: 503,
        message: "scripted failure".to_string(),
    }
    .into()
}

/// Provider that fails with a transient error a fixed number of times, then
/// answers from its correction table (identity for unknown words).
#[derive(Debug)]
pub struct ScriptedProvider {
    id: String,
    failures_remaining: AtomicU32,
    corrections: HashMap<String, String>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            failures_remaining: AtomicU32::new(0),
            corrections: HashMap::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn fail_first(self, failures: u32) -> Self {
        self.failures_remaining.store(failures, Ordering::SeqCst);
        self
    }

    pub fn with_correction(mut self, word: impl Into<String>, correction: impl Into<String>) -> Self {
        self.corrections.insert(word.into(), correction.into());
        self
    }

    /// Number of `correct` calls so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CorrectionProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn correct(&self, word: &str, _context: &str) -> QuillResult<Correction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(transient_failure(&self.id));
        }
        let suggestion = self.corrections.get(word).map(String::as_str).unwrap_or(word);
        Ok(Correction::from_suggestion(word, suggestion))
    }
}

/// Provider that always fails with the given error.
#[derive(Debug)]
pub struct FailingProvider {
    id: String,
    error: ProviderError,
    calls: AtomicU32,
}

impl FailingProvider {
    /// Always fails with a retryable 503.
    pub fn transient(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            error: ProviderError::RequestFailed {
                provider: id.clone(),
                status: 503,
                message: "service unavailable".to_string(),
            },
            id,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_error(id: impl Into<String>, error: ProviderError) -> Self {
        Self {
            id: id.into(),
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CorrectionProvider for FailingProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn correct(&self, _word: &str, _context: &str) -> QuillResult<Correction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone().into())
    }
}

// ============================================================================
// MOCK CORRECTORS
// ============================================================================

/// Corrector answering from a fixed table, recording every call.
#[derive(Debug, Default)]
pub struct StaticCorrector {
    corrections: HashMap<String, String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl StaticCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correction(mut self, word: impl Into<String>, correction: impl Into<String>) -> Self {
        self.corrections.insert(word.into(), correction.into());
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(word, context)` pairs received, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Corrector for StaticCorrector {
    async fn correct(&self, word: &str, context: &str) -> QuillResult<Correction> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((word.to_string(), context.to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let suggestion = self.corrections.get(word).map(String::as_str).unwrap_or(word);
        Ok(Correction::from_suggestion(word, suggestion))
    }
}

/// Corrector that fails (or panics) for selected words and otherwise
/// answers from its correction table (identity for unknown words).
#[derive(Debug, Default)]
pub struct FailingCorrector {
    fail_words: Vec<String>,
    panic_words: Vec<String>,
    fail_all: bool,
    corrections: HashMap<String, String>,
}

impl FailingCorrector {
    pub fn always() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn failing_on(words: &[&str]) -> Self {
        Self {
            fail_words: words.iter().map(|w| w.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn panicking_on(words: &[&str]) -> Self {
        Self {
            panic_words: words.iter().map(|w| w.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_correction(mut self, word: impl Into<String>, correction: impl Into<String>) -> Self {
        self.corrections.insert(word.into(), correction.into());
        self
    }
}

#[async_trait]
impl Corrector for FailingCorrector {
    async fn correct(&self, word: &str, _context: &str) -> QuillResult<Correction> {
        if self.panic_words.iter().any(|w| w == word) {
            panic!("scripted panic for {}", word);
        }
        if self.fail_all || self.fail_words.iter().any(|w| w == word) {
            return Err(QuillError::GroupFailed {
                reason: format!("scripted failure for {}", word),
            });
        }
        let suggestion = self.corrections.get(word).map(String::as_str).unwrap_or(word);
        Ok(Correction::from_suggestion(word, suggestion))
    }
}

// ============================================================================
// CALLBACK RECORDER
// ============================================================================

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: String,
    pub correction: String,
    pub was_corrected: bool,
}

/// Collects scheduler callbacks for assertions.
#[derive(Debug, Clone, Default)]
pub struct CallbackRecorder {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl CallbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback that records its result under `tag`.
    pub fn callback(&self, tag: impl Into<String>) -> impl FnOnce(String, bool) + Send + 'static {
        let tag = tag.into();
        let deliveries = Arc::clone(&self.deliveries);
        move |correction, was_corrected| {
            if let Ok(mut d) = deliveries.lock() {
                d.push(Delivery {
                    tag,
                    correction,
                    was_corrected,
                });
            }
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.deliveries.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Result delivered under `tag`, if any.
    pub fn get(&self, tag: &str) -> Option<(String, bool)> {
        self.deliveries()
            .into_iter()
            .find(|d| d.tag == tag)
            .map(|d| (d.correction, d.was_corrected))
    }

    /// Wait until at least `count` callbacks fired. Returns false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for QUILL inputs.

    use proptest::prelude::*;

    /// A lowercase word.
    pub fn arb_word() -> impl Strategy<Value = String> {
        "[a-záéíóúñ]{1,12}"
    }

    /// A word that may start with an uppercase letter.
    pub fn arb_cased_word() -> impl Strategy<Value = String> {
        "[A-Za-z][a-z]{0,11}"
    }

    /// A short sentence of words.
    pub fn arb_context() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_word(), 1..8).prop_map(|words| words.join(" "))
    }

    /// A priority, possibly outside the accepted range.
    pub fn arb_priority() -> impl Strategy<Value = u8> {
        0u8..=8
    }

    /// A sequence of (priority, word) submissions.
    pub fn arb_submissions(max: usize) -> impl Strategy<Value = Vec<(u8, String)>> {
        prop::collection::vec((arb_priority(), arb_word()), 0..max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configs and temporary caches.

    use super::*;
    use tempfile::TempDir;

    /// Cache config rooted in `dir` with a cheap key derivation.
    pub fn temp_cache_config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            kdf_iterations: 1_000,
            ..CacheConfig::in_dir(dir.path())
        }
    }

    /// A fresh cache in a temporary directory. Keep the `TempDir` alive for
    /// as long as the cache is used.
    pub fn temp_cache() -> (Arc<SecureCache>, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let cache = SecureCache::open(temp_cache_config(&dir)).expect("open temp cache");
        (Arc::new(cache), dir)
    }

    /// Retry config with millisecond delays and no jitter.
    pub fn fast_retry_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_millis(20),
        }
    }

    /// Scheduler config with short waits.
    pub fn fast_scheduler_config() -> SchedulerConfig {
        SchedulerConfig {
            max_delay: Duration::from_millis(20),
            idle_wait: Duration::from_millis(10),
            error_pause: Duration::from_millis(20),
            ..SchedulerConfig::default()
        }
    }

    /// Local-dictionary-only pipeline config with a temporary cache.
    pub fn local_only_config(dir: &TempDir) -> QuillConfig {
        QuillConfig {
            scheduler: fast_scheduler_config(),
            cache: temp_cache_config(dir),
            retry: fast_retry_config(1),
            ..QuillConfig::default()
        }
    }
}
