//! QUILL Core - Shared Types
//!
//! Pure data structures, error taxonomy and configuration shared by every
//! crate in the correction pipeline. This crate contains no scheduling,
//! caching or network logic; the seam traits implemented elsewhere live in
//! [`provider`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod constants;
pub mod error;
pub mod health;
pub mod provider;

pub use config::{
    CacheConfig, CircuitBreakerConfig, ContextGrouping, FallbackConfig, ProbeConfig,
    ProviderConfig, ProviderKind, QuillConfig, RetryConfig, SchedulerConfig,
};
pub use error::{ConfigError, ProviderError, QuillError, QuillResult, StorageError};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use provider::{CorrectionProvider, Corrector};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Lowest accepted task priority.
pub const PRIORITY_MIN: u8 = 1;

/// Highest accepted task priority (used by the startup probe).
pub const PRIORITY_MAX: u8 = 5;

/// Clamp a caller-supplied priority into `PRIORITY_MIN..=PRIORITY_MAX`.
pub fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(PRIORITY_MIN, PRIORITY_MAX)
}

// ============================================================================
// CORRECTION RESULT
// ============================================================================

/// Outcome of correcting a single word.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correction {
    /// The corrected text (the original word when nothing changed)
    pub text: String,
    /// Whether `text` differs from the submitted word
    pub was_corrected: bool,
}

impl Correction {
    pub fn new(text: impl Into<String>, was_corrected: bool) -> Self {
        Self {
            text: text.into(),
            was_corrected,
        }
    }

    /// The identity correction: the word itself, not corrected.
    ///
    /// This is the worst-case result every caller can receive.
    pub fn unchanged(word: impl Into<String>) -> Self {
        Self {
            text: word.into(),
            was_corrected: false,
        }
    }

    /// Build a correction from provider output, deriving `was_corrected`
    /// by comparison with the submitted word.
    pub fn from_suggestion(word: &str, suggestion: impl Into<String>) -> Self {
        let text = suggestion.into();
        let was_corrected = text != word;
        Self {
            text,
            was_corrected,
        }
    }

    /// Split into the `(correction, was_corrected)` pair handed to callbacks.
    pub fn into_parts(self) -> (String, bool) {
        (self.text, self.was_corrected)
    }
}

// ============================================================================
// CIRCUIT STATE
// ============================================================================

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, probing whether the dependency recovered
    HalfOpen,
}

impl CircuitState {
    /// State name as exposed by the introspection surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    /// Parse a state name produced by [`CircuitState::as_str`].
    pub fn parse(s: &str) -> Result<Self, CircuitStateParseError> {
        match s {
            "CLOSED" => Ok(Self::Closed),
            "OPEN" => Ok(Self::Open),
            "HALF_OPEN" => Ok(Self::HalfOpen),
            _ => Err(CircuitStateParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing CircuitState from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStateParseError(pub String);

impl std::fmt::Display for CircuitStateParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid circuit state: {}", self.0)
    }
}

impl std::error::Error for CircuitStateParseError {}

// ============================================================================
// TESTS
// ============================================================================
