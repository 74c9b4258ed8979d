//! Circuit breaker and registry
//!
//! A breaker tracks recent failures of one dependency:
//! - `CLOSED`: requests flow; failures inside `failure_window` are counted
//!   and reaching `failure_threshold` opens the circuit.
//! - `OPEN`: requests are rejected until `reset_timeout` has elapsed since
//!   the last failure, then one probe moves the circuit to `HALF_OPEN`.
//! - `HALF_OPEN`: up to `success_threshold` requests pass; that many
//!   successes close the circuit, any failure re-opens it.

use quill_core::{CircuitBreakerConfig, CircuitState, QuillError, QuillResult};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    half_open_successes: u32,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            last_failure: None,
            half_open_successes: 0,
        }
    }
}

/// Failure-tracking state machine guarding one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures currently inside the window.
    pub fn failure_count(&self) -> usize {
        let mut inner = self.lock();
        self.prune(&mut inner, Instant::now());
        inner.failures.len()
    }

    /// Whether a request may be attempted now.
    ///
    /// An open circuit whose reset timeout has passed moves to `HALF_OPEN`
    /// and admits the calling request as a probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    tracing::info!(breaker = %self.name, "Circuit half-open, probing");
                }
                cooled
            }
            CircuitState::HalfOpen => inner.half_open_successes < self.config.success_threshold,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failures.clear();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.half_open_successes = 0;
                tracing::info!(breaker = %self.name, "Circuit closed");
            }
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.failures.push_back(now);
        inner.last_failure = Some(now);
        self.prune(&mut inner, now);

        let state = inner.state;
        let trips = match state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures.len() >= self.config.failure_threshold as usize,
            CircuitState::Open => false,
        };
        if trips {
            inner.state = CircuitState::Open;
            inner.half_open_successes = 0;
            tracing::warn!(
                breaker = %self.name,
                failures = inner.failures.len(),
                reset_timeout_secs = self.config.reset_timeout.as_secs(),
                "Circuit opened"
            );
        }
    }

    /// Back to `CLOSED` with no history.
    pub fn reset(&self) {
        *self.lock() = BreakerInner::new();
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        while let Some(oldest) = inner.failures.front() {
            if now.duration_since(*oldest) > self.config.failure_window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Run `op` under the breaker.
    ///
    /// # Returns
    /// * `Err(QuillError::ServiceUnavailable)` - The circuit denied the request
    /// * otherwise the result of `op`, recorded as a success or failure
    pub async fn call<T, F, Fut>(&self, op: F) -> QuillResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QuillResult<T>>,
    {
        if !self.allow_request() {
            tracing::debug!(breaker = %self.name, "Request rejected by open circuit");
            return Err(QuillError::ServiceUnavailable {
                service: self.name.clone(),
            });
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Like [`CircuitBreaker::call`], but any denial or failure is handed to
    /// `fallback` instead of being returned.
    pub async fn call_with_fallback<T, F, Fut, FB>(&self, op: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = QuillResult<T>>,
        FB: FnOnce(QuillError) -> T,
    {
        match self.call(op).await {
            Ok(value) => value,
            Err(e) => fallback(e),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failures", &inner.failures.len())
            .field("half_open_successes", &inner.half_open_successes)
            .finish()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Name-keyed breakers, created on first lookup with the registry defaults.
///
/// Constructed once at the composition root and shared by reference.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// The breaker for `name`, created on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(breaker) = breakers.get(name) {
                return Arc::clone(breaker);
            }
        }
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(breaker = %name, "Created circuit breaker");
            Arc::new(CircuitBreaker::new(name, self.defaults.clone()))
        });
        Arc::clone(breaker)
    }

    /// Drop every breaker. Later lookups create fresh ones.
    pub fn clear(&self) {
        self.breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Current state of every known breaker.
    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        // Registry lock released before any breaker lock is taken
        breakers
            .into_iter()
            .map(|b| (b.name().to_string(), b.state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
