//! Configuration types
//!
//! Every section deserializes from TOML with per-field defaults, and can be
//! overridden from `QUILL_*` environment variables. Durations are written as
//! integer `*_ms` / `*_secs` fields in files.

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "QUILL_CONFIG";

// ============================================================================
// SCHEDULER
// ============================================================================

/// How the scheduler groups the tasks of one batch before dispatch.
///
/// Grouping is independent from cache matching, which always uses the exact
/// (word, context) digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ContextGrouping {
    /// Group by the first `count` whitespace-separated tokens of the context
    LeadingTokens { count: usize },
    /// Group only tasks with byte-identical contexts
    Exact,
    /// Never group; every task is its own group
    PerTask,
}

impl Default for ContextGrouping {
    fn default() -> Self {
        Self::LeadingTokens {
            count: DEFAULT_GROUP_KEY_TOKENS,
        }
    }
}

/// Configuration for the priority batch scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub min_batch_items: usize,
    #[serde(rename = "idle_wait_ms", with = "duration_ms")]
    pub idle_wait: Duration,
    #[serde(rename = "error_pause_ms", with = "duration_ms")]
    pub error_pause: Duration,
    pub grouping: ContextGrouping,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            min_batch_items: DEFAULT_MIN_BATCH_ITEMS,
            idle_wait: Duration::from_millis(DEFAULT_IDLE_WAIT_MS),
            error_pause: Duration::from_millis(DEFAULT_ERROR_PAUSE_MS),
            grouping: ContextGrouping::default(),
        }
    }
}

impl SchedulerConfig {
    /// Create SchedulerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `QUILL_BATCH_SIZE`: Maximum tasks per batch (default: 10)
    /// - `QUILL_MAX_DELAY_MS`: Early-dispatch age of the oldest task (default: 200)
    /// - `QUILL_MIN_BATCH_ITEMS`: Minimum viable batch (default: 3)
    /// - `QUILL_IDLE_WAIT_MS`: Worker idle wait on an empty queue (default: 100)
    /// - `QUILL_GROUP_KEY_TOKENS`: Leading context tokens used for grouping (default: 3)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(&process_env);
        config
    }

    pub fn apply_overrides(&mut self, vars: &dyn Fn(&str) -> Option<String>) {
        if let Some(v) = parse_var(vars, "QUILL_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = parse_var(vars, "QUILL_MAX_DELAY_MS") {
            self.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(vars, "QUILL_MIN_BATCH_ITEMS") {
            self.min_batch_items = v;
        }
        if let Some(v) = parse_var(vars, "QUILL_IDLE_WAIT_MS") {
            self.idle_wait = Duration::from_millis(v);
        }
        if let Some(count) = parse_var(vars, "QUILL_GROUP_KEY_TOKENS") {
            self.grouping = ContextGrouping::LeadingTokens { count };
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid(
                "scheduler.batch_size",
                self.batch_size,
                "must be > 0",
            ));
        }
        if self.min_batch_items == 0 || self.min_batch_items > self.batch_size {
            return Err(ConfigError::invalid(
                "scheduler.min_batch_items",
                self.min_batch_items,
                "must be in 1..=batch_size",
            ));
        }
        if self.idle_wait.is_zero() {
            return Err(ConfigError::invalid(
                "scheduler.idle_wait_ms",
                0,
                "must be > 0",
            ));
        }
        if let ContextGrouping::LeadingTokens { count: 0 } = self.grouping {
            return Err(ConfigError::invalid(
                "scheduler.grouping.count",
                0,
                "must be > 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(rename = "reset_timeout_secs", with = "duration_secs")]
    pub reset_timeout: Duration,
    #[serde(rename = "failure_window_secs", with = "duration_secs")]
    pub failure_window: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            reset_timeout: Duration::from_secs(DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS),
            failure_window: Duration::from_secs(DEFAULT_CIRCUIT_FAILURE_WINDOW_SECS),
            success_threshold: DEFAULT_CIRCUIT_SUCCESS_THRESHOLD,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `QUILL_CIRCUIT_FAILURE_THRESHOLD`: Failures before opening (default: 5)
    /// - `QUILL_CIRCUIT_RESET_TIMEOUT_SECS`: How long the circuit stays open (default: 60)
    /// - `QUILL_CIRCUIT_FAILURE_WINDOW_SECS`: Failure counting window (default: 120)
    /// - `QUILL_CIRCUIT_SUCCESS_THRESHOLD`: Half-open successes needed to close (default: 2)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(&process_env);
        config
    }

    pub fn apply_overrides(&mut self, vars: &dyn Fn(&str) -> Option<String>) {
        if let Some(v) = parse_var(vars, "QUILL_CIRCUIT_FAILURE_THRESHOLD") {
            self.failure_threshold = v;
        }
        if let Some(v) = parse_var(vars, "QUILL_CIRCUIT_RESET_TIMEOUT_SECS") {
            self.reset_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(vars, "QUILL_CIRCUIT_FAILURE_WINDOW_SECS") {
            self.failure_window = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(vars, "QUILL_CIRCUIT_SUCCESS_THRESHOLD") {
            self.success_threshold = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "breaker.failure_threshold",
                0,
                "must be > 0",
            ));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid(
                "breaker.success_threshold",
                0,
                "must be > 0",
            ));
        }
        if self.failure_window.is_zero() {
            return Err(ConfigError::invalid(
                "breaker.failure_window_secs",
                0,
                "must be > 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Retry configuration for provider calls.
///
/// Attempt `n` (0-based) waits `initial_delay * backoff_factor^n * (1 ± jitter)`,
/// capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: f64,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_INITIAL_DELAY_MS),
            backoff_factor: DEFAULT_RETRY_BACKOFF_FACTOR,
            jitter: DEFAULT_RETRY_JITTER,
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryConfig {
    pub fn apply_overrides(&mut self, vars: &dyn Fn(&str) -> Option<String>) {
        if let Some(v) = parse_var(vars, "QUILL_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = parse_var(vars, "QUILL_RETRY_INITIAL_DELAY_MS") {
            self.initial_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var(vars, "QUILL_RETRY_BACKOFF_FACTOR") {
            self.backoff_factor = v;
        }
        if let Some(v) = parse_var(vars, "QUILL_RETRY_JITTER") {
            self.jitter = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_factor",
                self.backoff_factor,
                "must be >= 1.0",
            ));
        }
        if !self.jitter.is_finite() || !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid(
                "retry.jitter",
                self.jitter,
                "must be in [0.0, 1.0)",
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                self.max_delay.as_millis(),
                "must be >= initial_delay_ms",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECURE CACHE
// ============================================================================

/// Configuration for the encrypted correction cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the blob, key and salt files
    pub directory: PathBuf,
    /// Blob file name; key and salt files share its stem
    pub file_name: String,
    pub max_size: usize,
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
    #[serde(rename = "rotation_interval_secs", with = "duration_secs")]
    pub rotation_interval: Duration,
    pub kdf_iterations: u32,
    /// Writes between two automatic cleanup passes
    pub cleanup_every: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_CACHE_DIR),
            file_name: DEFAULT_CACHE_FILE.to_string(),
            max_size: DEFAULT_CACHE_MAX_SIZE,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            rotation_interval: Duration::from_secs(DEFAULT_KEY_ROTATION_SECS),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            cleanup_every: DEFAULT_CLEANUP_EVERY,
        }
    }
}

impl CacheConfig {
    /// Cache configuration rooted at `directory` with defaults elsewhere.
    pub fn in_dir(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Path of the encrypted blob.
    pub fn blob_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    pub fn apply_overrides(&mut self, vars: &dyn Fn(&str) -> Option<String>) {
        if let Some(dir) = vars("QUILL_CACHE_DIR") {
            self.directory = PathBuf::from(dir);
        }
        if let Some(v) = parse_var(vars, "QUILL_CACHE_MAX_SIZE") {
            self.max_size = v;
        }
        if let Some(v) = parse_var(vars, "QUILL_CACHE_TTL_SECS") {
            self.ttl = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(vars, "QUILL_KEY_ROTATION_SECS") {
            self.rotation_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(vars, "QUILL_KDF_ITERATIONS") {
            self.kdf_iterations = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::invalid("cache.max_size", 0, "must be > 0"));
        }
        if self.file_name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "cache.file_name".to_string(),
            });
        }
        if self.kdf_iterations == 0 {
            return Err(ConfigError::invalid(
                "cache.kdf_iterations",
                0,
                "must be > 0",
            ));
        }
        if self.cleanup_every == 0 {
            return Err(ConfigError::invalid(
                "cache.cleanup_every",
                0,
                "must be > 0",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// PROVIDER
// ============================================================================

/// The closed set of external correction capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Mixtral,
    /// No external provider: local dictionary only
    #[default]
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Mixtral => "mixtral",
            Self::Local => "local",
        }
    }

    /// Whether this provider calls a remote API.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "mixtral" | "together" => Ok(Self::Mixtral),
            "local" | "none" | "fallback" => Ok(Self::Local),
            _ => Err(ConfigError::ProviderNotSupported {
                provider: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External provider configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    /// Model override; each provider has its own default
    pub model: Option<String>,
    /// Base URL override (testing, proxies)
    pub base_url: Option<String>,
    pub requests_per_minute: u32,
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Local,
            api_key: None,
            model: None,
            base_url: None,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl ProviderConfig {
    /// Local-only configuration (no external calls).
    pub fn local() -> Self {
        Self::default()
    }

    pub fn apply_overrides(
        &mut self,
        vars: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(kind) = vars("QUILL_PROVIDER") {
            self.kind = kind.parse()?;
        }
        if let Some(key) = vars("QUILL_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = vars("QUILL_MODEL") {
            self.model = Some(model);
        }
        if let Some(url) = vars("QUILL_PROVIDER_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(v) = parse_var(vars, "QUILL_REQUESTS_PER_MINUTE") {
            self.requests_per_minute = v;
        }
        if let Some(v) = parse_var(vars, "QUILL_REQUEST_TIMEOUT_MS") {
            self.request_timeout = Duration::from_millis(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind.is_remote() {
            let has_key = self
                .api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false);
            if !has_key {
                return Err(ConfigError::MissingRequired {
                    field: "provider.api_key".to_string(),
                });
            }
            if self.requests_per_minute == 0 {
                return Err(ConfigError::invalid(
                    "provider.requests_per_minute",
                    0,
                    "must be > 0",
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// ============================================================================
// FALLBACK / PROBE
// ============================================================================

/// Local dictionary configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Extra lowercase misspelling -> correction pairs, merged over the built-in table
    pub extra_corrections: BTreeMap<String, String>,
}

/// Startup connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub enabled: bool,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub provider: ProviderConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub fallback: FallbackConfig,
    pub probe: ProbeConfig,
}

impl QuillConfig {
    /// Resolve the effective configuration.
    ///
    /// The file comes from `--config <path>`, else `QUILL_CONFIG`, else the
    /// defaults are used. Environment overrides are applied on top and the
    /// result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let mut config = match path {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(&process_env)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(&process_env)?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    pub fn apply_overrides(
        &mut self,
        vars: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        self.provider.apply_overrides(vars)?;
        self.scheduler.apply_overrides(vars);
        self.cache.apply_overrides(vars);
        self.breaker.apply_overrides(vars);
        self.retry.apply_overrides(vars);
        if let Some(v) = parse_var(vars, "QUILL_PROBE_TIMEOUT_MS") {
            self.probe.timeout = Duration::from_millis(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider.validate()?;
        self.scheduler.validate()?;
        self.cache.validate()?;
        self.breaker.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_var<T: FromStr>(vars: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    vars(name).and_then(|s| s.trim().parse().ok())
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// ============================================================================
// TESTS
// ============================================================================
