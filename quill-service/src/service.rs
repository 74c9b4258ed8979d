//! The assembled correction pipeline

use futures_util::future::join_all;
use quill_batch::{BatchScheduler, SchedulerStats, TaskHandle};
use quill_cache::SecureCache;
use quill_core::constants::{CACHE_DEGRADED_USAGE_PERCENT, PROBE_CONTEXT, PROBE_WORD};
use quill_core::{
    CircuitState, Correction, CorrectionProvider, HealthCheck, HealthReport, QuillConfig,
    QuillError, QuillResult, PRIORITY_MAX, PRIORITY_MIN,
};
use quill_llm::{
    build_provider, CircuitBreakerRegistry, CorrectionOrchestrator, LocalDictionary,
    ProviderRoute, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Cache, breakers, orchestrator and scheduler built from one config.
///
/// Must be started and shut down inside a tokio runtime.
pub struct CorrectionService {
    instance_id: Uuid,
    config: QuillConfig,
    cache: Arc<SecureCache>,
    breakers: Arc<CircuitBreakerRegistry>,
    orchestrator: Arc<CorrectionOrchestrator>,
    scheduler: BatchScheduler,
}

impl CorrectionService {
    /// Validate `config`, build the provider it names and start the
    /// scheduler worker.
    pub fn start(config: QuillConfig) -> QuillResult<Self> {
        config.validate()?;
        let provider = build_provider(&config.provider)?;
        Self::start_with_provider(config, provider)
    }

    /// Start with an explicit provider; `None` runs on the local
    /// dictionary only.
    pub fn start_with_provider(
        config: QuillConfig,
        provider: Option<Arc<dyn CorrectionProvider>>,
    ) -> QuillResult<Self> {
        let instance_id = Uuid::now_v7();
        let cache = Arc::new(SecureCache::open(config.cache.clone())?);
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
        let route = match provider {
            Some(provider) => ProviderRoute::remote(provider, &breakers),
            None => ProviderRoute::LocalOnly,
        };
        let orchestrator = Arc::new(CorrectionOrchestrator::new(
            route,
            Arc::clone(&cache),
            RetryPolicy::new(config.retry.clone()),
            LocalDictionary::new(&config.fallback.extra_corrections),
        ));
        let scheduler = BatchScheduler::start(config.scheduler.clone(), orchestrator.clone());

        tracing::info!(
            instance_id = %instance_id,
            provider = %orchestrator.route().name(),
            cache_entries = cache.len(),
            "Correction service started"
        );
        Ok(Self {
            instance_id,
            config,
            cache,
            breakers,
            orchestrator,
            scheduler,
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn config(&self) -> &QuillConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SecureCache> {
        &self.cache
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn orchestrator(&self) -> &Arc<CorrectionOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Queue one word; see [`BatchScheduler::submit`].
    pub fn submit<F>(
        &self,
        word: impl Into<String>,
        context: impl Into<String>,
        callback: F,
        priority: u8,
    ) -> QuillResult<TaskHandle>
    where
        F: FnOnce(String, bool) + Send + 'static,
    {
        self.scheduler.submit(word, context, callback, priority)
    }

    /// Submit one word and wait for its callback.
    pub async fn correct_now(
        &self,
        word: impl Into<String>,
        context: impl Into<String>,
        priority: u8,
    ) -> QuillResult<Correction> {
        let (tx, rx) = oneshot::channel();
        self.submit(
            word,
            context,
            move |text, was_corrected| {
                let _ = tx.send(Correction::new(text, was_corrected));
            },
            priority,
        )?;
        rx.await.map_err(|_| QuillError::ShutdownInProgress)
    }

    /// Correct every whitespace-separated token of `line`, using the whole
    /// line as context, and rejoin the results with single spaces.
    pub async fn correct_line(&self, line: &str) -> QuillResult<String> {
        let pending = line
            .split_whitespace()
            .map(|word| self.correct_now(word, line, PRIORITY_MIN))
            .collect::<Vec<_>>();
        let words = join_all(pending)
            .await
            .into_iter()
            .map(|result| result.map(|c| c.text))
            .collect::<QuillResult<Vec<_>>>()?;
        Ok(words.join(" "))
    }

    /// Push one highest-priority synthetic request through the pipeline.
    ///
    /// Returns true if its result arrives within `timeout`.
    pub async fn probe_connection(&self, timeout: Duration) -> bool {
        let probe = self.correct_now(PROBE_WORD, PROBE_CONTEXT, PRIORITY_MAX);
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(correction)) => {
                tracing::info!(
                    provider = %self.orchestrator.route().name(),
                    result = %correction.text,
                    "Connection probe succeeded"
                );
                true
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Connection probe failed");
                false
            }
            Err(_) => {
                tracing::error!(timeout_ms = timeout.as_millis() as u64, "Connection probe timed out");
                false
            }
        }
    }

    /// Health of the scheduler, every circuit breaker and the cache.
    pub fn health(&self) -> HealthReport {
        let mut checks = vec![self.scheduler_health()];
        checks.extend(self.breakers.states().into_iter().map(|(name, state)| {
            let component = format!("breaker:{}", name);
            let check = match state {
                CircuitState::Closed => HealthCheck::healthy(component),
                CircuitState::HalfOpen => {
                    HealthCheck::degraded(component, "circuit half-open, probing recovery")
                }
                CircuitState::Open => HealthCheck::unhealthy(component, "circuit open"),
            };
            check.with_detail("state", state.as_str())
        }));
        checks.push(self.cache_health());
        HealthReport::from_checks(checks)
    }

    fn scheduler_health(&self) -> HealthCheck {
        let stats = self.scheduler.stats();
        let check = if stats.is_running {
            HealthCheck::healthy("scheduler")
        } else {
            HealthCheck::unhealthy("scheduler", "scheduler stopped")
        };
        check
            .with_detail("instance_id", self.instance_id.to_string())
            .with_detail("pending_tasks", stats.pending_tasks)
            .with_detail("batches_processed", stats.batches_processed)
            .with_detail("tasks_delivered", stats.tasks_delivered)
            .with_detail("group_failures", stats.group_failures)
    }

    fn cache_health(&self) -> HealthCheck {
        match self.cache.stats() {
            Ok(stats) => {
                let check = if stats.usage_percent > CACHE_DEGRADED_USAGE_PERCENT {
                    HealthCheck::degraded(
                        "cache",
                        format!("cache {:.1}% full", stats.usage_percent),
                    )
                } else {
                    HealthCheck::healthy("cache")
                };
                check
                    .with_detail("entry_count", stats.entry_count)
                    .with_detail("max_size", stats.max_size)
                    .with_detail("usage_percent", stats.usage_percent)
                    .with_detail("last_rotation", stats.last_rotation.to_rfc3339())
            }
            Err(e) => HealthCheck::unhealthy("cache", e.to_string()),
        }
    }

    /// Stop accepting work and deliver every queued task.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        tracing::info!(
            instance_id = %self.instance_id,
            tasks_delivered = self.scheduler.stats().tasks_delivered,
            "Correction service stopped"
        );
    }
}

impl std::fmt::Debug for CorrectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionService")
            .field("instance_id", &self.instance_id)
            .field("route", self.orchestrator.route())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::HealthStatus;
    use quill_test_utils::fixtures::local_only_config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_only_health_is_healthy() {
        let dir = TempDir::new().unwrap();
        let service = CorrectionService::start(local_only_config(&dir)).unwrap();

        let report = service.health();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.component("scheduler").is_some());
        assert!(report.component("cache").is_some());
        assert!(service.breakers().is_empty());

        service.shutdown().await;
        let report = service.health();
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(
            report.component("scheduler").map(|c| c.status),
            Some(HealthStatus::Unhealthy)
        );
    }

    #[tokio::test]
    async fn test_cache_near_capacity_is_degraded() {
        let dir = TempDir::new().unwrap();
        let mut config = local_only_config(&dir);
        config.cache.max_size = 10;
        let service = CorrectionService::start(config).unwrap();

        for i in 0..10 {
            service
                .cache()
                .add(&format!("w{i}"), "ctx", "x", true)
                .unwrap();
        }
        let cache = service.health().component("cache").cloned().unwrap();
        assert_eq!(cache.status, HealthStatus::Degraded);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = local_only_config(&dir);
        config.scheduler.batch_size = 0;
        assert!(matches!(
            CorrectionService::start(config),
            Err(QuillError::Config(_))
        ));
    }
}
