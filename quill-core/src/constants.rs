//! Constants for QUILL
//!
//! Default values for every tunable in the pipeline. Centralizing them keeps
//! `Default` impls and env overrides in agreement.

// ============================================================================
// SCHEDULER
// ============================================================================

/// Maximum number of tasks drained into one batch
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Age of the oldest collected task after which a minimum batch is dispatched
pub const DEFAULT_MAX_DELAY_MS: u64 = 200;

/// Minimum number of tasks that makes a batch worth dispatching early
pub const DEFAULT_MIN_BATCH_ITEMS: usize = 3;

/// Bounded idle wait of the worker when the queue is empty
pub const DEFAULT_IDLE_WAIT_MS: u64 = 100;

/// Pause after an unexpected worker loop error
pub const DEFAULT_ERROR_PAUSE_MS: u64 = 1_000;

/// Number of leading context tokens used as the grouping key
pub const DEFAULT_GROUP_KEY_TOKENS: usize = 3;

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Failures within the window that open the circuit
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Seconds an open circuit waits before probing
pub const DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS: u64 = 60;

/// Seconds a recorded failure counts towards the threshold
pub const DEFAULT_CIRCUIT_FAILURE_WINDOW_SECS: u64 = 120;

/// Half-open successes needed to close the circuit
pub const DEFAULT_CIRCUIT_SUCCESS_THRESHOLD: u32 = 2;

// ============================================================================
// RETRY
// ============================================================================

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_RETRY_JITTER: f64 = 0.1;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

// ============================================================================
// SECURE CACHE
// ============================================================================

pub const DEFAULT_CACHE_DIR: &str = ".quill";
pub const DEFAULT_CACHE_FILE: &str = "secure_cache.dat";
pub const DEFAULT_CACHE_MAX_SIZE: usize = 1_000;

/// Entry time-to-live (30 days)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30 * 24 * 3600;

/// Key rotation interval (7 days)
pub const DEFAULT_KEY_ROTATION_SECS: u64 = 7 * 24 * 3600;

/// PBKDF2-HMAC-SHA256 iteration count
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Writes between two automatic cleanup passes
pub const DEFAULT_CLEANUP_EVERY: u32 = 100;

/// Cache usage above which health reports degraded
pub const CACHE_DEGRADED_USAGE_PERCENT: f64 = 90.0;

// ============================================================================
// PROVIDERS
// ============================================================================

pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-opus-20240229";
pub const DEFAULT_MIXTRAL_MODEL: &str = "mistralai/Mixtral-8x7B-Instruct-v0.1";

/// Completion budget for a single-word correction
pub const CORRECTION_MAX_TOKENS: i32 = 50;
pub const CORRECTION_TEMPERATURE: f32 = 0.1;

// ============================================================================
// STARTUP PROBE
// ============================================================================

pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
pub const PROBE_WORD: &str = "prueba";
pub const PROBE_CONTEXT: &str = "Esto es una prueba";
