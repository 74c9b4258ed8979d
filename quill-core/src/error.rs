//! Error types for QUILL operations

use thiserror::Error;

/// External correction provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Request to {provider} timed out")]
    Timeout { provider: String },
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    ///
    /// Status 0 marks a transport failure (no HTTP response at all).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::RequestFailed { status, .. } => {
                *status == 0 || *status == 408 || *status == 429 || *status >= 500
            }
            Self::InvalidResponse { .. } => false,
        }
    }
}

/// Cache persistence and encryption errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Master error type for all QUILL errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuillError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Service '{service}' unavailable: circuit open and no fallback configured")]
    ServiceUnavailable { service: String },

    #[error("Integrity violation for cached entry '{word}'")]
    IntegrityViolation { word: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler is shutting down; submission rejected")]
    ShutdownInProgress,

    #[error("Correction group failed: {reason}")]
    GroupFailed { reason: String },
}

impl QuillError {
    /// Whether the retry loop should attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for QUILL operations.
pub type QuillResult<T> = Result<T, QuillError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display_rate_limited() {
        let err = ProviderError::RateLimited {
            provider: "openai".to_string(),
            retry_after_ms: 1500,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Rate limited"));
        assert!(msg.contains("openai"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_transient_classification() {
        let transport = ProviderError::RequestFailed {
            provider: "mixtral".to_string(),
            status: 0,
            message: "connection reset".to_string(),
        };
        let server = ProviderError::RequestFailed {
            provider: "mixtral".to_string(),
            status: 503,
            message: "overloaded".to_string(),
        };
        let auth = ProviderError::RequestFailed {
            provider: "mixtral".to_string(),
            status: 401,
            message: "bad key".to_string(),
        };
        assert!(transport.is_transient());
        assert!(server.is_transient());
        assert!(!auth.is_transient());
        assert!(!ProviderError::InvalidResponse {
            provider: "openai".to_string(),
            reason: "empty choices".to_string(),
        }
        .is_transient());
        assert!(ProviderError::Timeout {
            provider: "openai".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_only_transient_provider_errors_are_retryable() {
        let transient = QuillError::from(ProviderError::Timeout {
            provider: "anthropic".to_string(),
        });
        assert!(transient.is_retryable());

        let open = QuillError::ServiceUnavailable {
            service: "anthropic".to_string(),
        };
        assert!(!open.is_retryable());
        assert!(!QuillError::ShutdownInProgress.is_retryable());
        assert!(!QuillError::from(StorageError::LockPoisoned).is_retryable());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::invalid("scheduler.batch_size", 0, "must be > 0");
        let msg = format!("{}", err);
        assert!(msg.contains("scheduler.batch_size"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_quill_error_from_variants() {
        let storage = QuillError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, QuillError::Storage(_)));

        let provider = QuillError::from(ProviderError::Timeout {
            provider: "mixtral".to_string(),
        });
        assert!(matches!(provider, QuillError::Provider(_)));

        let config = QuillError::from(ConfigError::ProviderNotSupported {
            provider: "eliza".to_string(),
        });
        assert!(matches!(config, QuillError::Config(_)));
    }

    #[test]
    fn test_storage_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StorageError::io(std::path::Path::new("/tmp/cache.dat"), &io);
        let msg = err.to_string();
        assert!(msg.contains("/tmp/cache.dat"));
        assert!(msg.contains("denied"));
    }
}
