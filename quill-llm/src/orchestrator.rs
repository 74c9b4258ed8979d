//! Correction orchestrator
//!
//! Resolution order for one word:
//! 1. cache hit
//! 2. remote provider, guarded by its circuit breaker and retried with backoff
//! 3. local dictionary
//!
//! `correct` never fails; the worst case is the word itself.
//!
//! Cache writes re-encrypt and rewrite the cache file, so they run on the
//! blocking pool. Lookups stay inline; a lookup can wait behind a write
//! that holds the cache lock.

use crate::breaker::{CircuitBreaker, CircuitBreakerRegistry};
use crate::fallback::LocalDictionary;
use crate::providers::build_provider;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use quill_cache::SecureCache;
use quill_core::{Correction, CorrectionProvider, Corrector, QuillConfig, QuillResult};
use std::sync::Arc;

/// The provider path chosen once at construction.
pub enum ProviderRoute {
    Remote {
        provider: Arc<dyn CorrectionProvider>,
        breaker: Arc<CircuitBreaker>,
    },
    LocalOnly,
}

impl ProviderRoute {
    /// Remote route using the registry's breaker for the provider's id.
    pub fn remote(provider: Arc<dyn CorrectionProvider>, registry: &CircuitBreakerRegistry) -> Self {
        let breaker = registry.get(provider.provider_id());
        Self::Remote { provider, breaker }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Remote { provider, .. } => provider.provider_id(),
            Self::LocalOnly => "local",
        }
    }
}

impl std::fmt::Debug for ProviderRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote { breaker, .. } => f
                .debug_struct("Remote")
                .field("provider", &self.name())
                .field("breaker", breaker)
                .finish(),
            Self::LocalOnly => f.write_str("LocalOnly"),
        }
    }
}

/// Cache, breaker-guarded retries and the local dictionary over one provider.
#[derive(Debug)]
pub struct CorrectionOrchestrator {
    route: ProviderRoute,
    cache: Arc<SecureCache>,
    retry: RetryPolicy,
    dictionary: LocalDictionary,
}

impl CorrectionOrchestrator {
    pub fn new(
        route: ProviderRoute,
        cache: Arc<SecureCache>,
        retry: RetryPolicy,
        dictionary: LocalDictionary,
    ) -> Self {
        Self {
            route,
            cache,
            retry,
            dictionary,
        }
    }

    /// Build the provider route from `config.provider`.
    pub fn from_config(
        config: &QuillConfig,
        cache: Arc<SecureCache>,
        registry: &CircuitBreakerRegistry,
    ) -> QuillResult<Self> {
        let route = match build_provider(&config.provider)? {
            Some(provider) => ProviderRoute::remote(provider, registry),
            None => ProviderRoute::LocalOnly,
        };
        Ok(Self::new(
            route,
            cache,
            RetryPolicy::new(config.retry.clone()),
            LocalDictionary::new(&config.fallback.extra_corrections),
        ))
    }

    pub fn route(&self) -> &ProviderRoute {
        &self.route
    }

    pub fn cache(&self) -> &Arc<SecureCache> {
        &self.cache
    }

    /// Breaker of the remote route, if any.
    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        match &self.route {
            ProviderRoute::Remote { breaker, .. } => Some(breaker),
            ProviderRoute::LocalOnly => None,
        }
    }

    pub async fn correct(&self, word: &str, context: &str) -> Correction {
        if let Some(hit) = self.cache.get(word, context) {
            tracing::trace!(word = %word, "Cache hit");
            return hit;
        }

        match &self.route {
            ProviderRoute::LocalOnly => {
                let correction = self.dictionary.correct(word);
                if correction.was_corrected {
                    self.store(word, context, &correction).await;
                }
                correction
            }
            ProviderRoute::Remote { provider, breaker } => {
                let outcome = self
                    .retry
                    .run(provider.provider_id(), move || {
                        breaker.call(move || provider.correct(word, context))
                    })
                    .await;
                match outcome {
                    Ok(correction) => {
                        self.store(word, context, &correction).await;
                        correction
                    }
                    Err(e) => {
                        tracing::warn!(
                            provider = %provider.provider_id(),
                            word = %word,
                            error = %e,
                            "Remote correction unavailable, using local dictionary"
                        );
                        self.dictionary.correct(word)
                    }
                }
            }
        }
    }

    async fn store(&self, word: &str, context: &str, correction: &Correction) {
        let cache = Arc::clone(&self.cache);
        let (owned_word, owned_context) = (word.to_string(), context.to_string());
        let text = correction.text.clone();
        let was_corrected = correction.was_corrected;

        let written = tokio::task::spawn_blocking(move || {
            cache.add(&owned_word, &owned_context, &text, was_corrected)
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(word = %word, error = %e, "Failed to cache correction"),
            Err(e) => tracing::error!(word = %word, error = %e, "Cache write task failed"),
        }
    }
}

#[async_trait]
impl Corrector for CorrectionOrchestrator {
    async fn correct(&self, word: &str, context: &str) -> QuillResult<Correction> {
        Ok(CorrectionOrchestrator::correct(self, word, context).await)
    }
}
