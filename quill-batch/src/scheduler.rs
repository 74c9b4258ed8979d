//! Batch scheduler and its worker loop
//!
//! One background worker drains the priority queue into batches, splits
//! each batch into context groups and asks the [`Corrector`] for every
//! distinct word of a group. Batches are dispatched one at a time, in the
//! order they were created.

use crate::batch::{Batch, ContextGroup};
use crate::queue::TaskQueue;
use crate::task::{CorrectionTask, TaskHandle};
use futures_util::FutureExt;
use quill_core::{
    clamp_priority, Correction, Corrector, QuillError, QuillResult, SchedulerConfig,
};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub pending_tasks: usize,
    pub batches_processed: u64,
    pub is_running: bool,
    pub tasks_delivered: u64,
    pub group_failures: u64,
}

struct QueueState {
    queue: TaskQueue,
    running: bool,
}

enum Step {
    Dispatch(Batch),
    Wait(Duration),
    Exit,
}

// ============================================================================
// SHARED STATE
// ============================================================================

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    corrector: Arc<dyn Corrector>,
    config: SchedulerConfig,
    batches_processed: AtomicU64,
    tasks_delivered: AtomicU64,
    group_failures: AtomicU64,
}

impl Shared {
    fn new(config: SchedulerConfig, corrector: Arc<dyn Corrector>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: TaskQueue::new(),
                running: true,
            }),
            notify: Notify::new(),
            corrector,
            config,
            batches_processed: AtomicU64::new(0),
            tasks_delivered: AtomicU64::new(0),
            group_failures: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self, state: &mut QueueState, now: Instant) -> Option<Batch> {
        state.queue.drain_batch(
            self.config.batch_size,
            self.config.min_batch_items,
            self.config.max_delay,
            now,
        )
    }

    fn next_step(&self, now: Instant) -> Step {
        let mut state = self.lock();
        let Some(age) = state.queue.oldest_pending_age(now) else {
            return if state.running {
                Step::Wait(self.config.idle_wait)
            } else {
                Step::Exit
            };
        };

        let ready = !state.running
            || state.queue.len() >= self.config.min_batch_items
            || age >= self.config.max_delay;
        if !ready {
            return Step::Wait(self.config.max_delay.saturating_sub(age));
        }
        match self.drain(&mut state, now) {
            Some(batch) => Step::Dispatch(batch),
            None => Step::Wait(self.config.idle_wait),
        }
    }

    fn drain_now(&self) -> Option<Batch> {
        let mut state = self.lock();
        self.drain(&mut state, Instant::now())
    }

    async fn dispatch(&self, batch: Batch) {
        let batch_id = batch.id();
        let size = batch.len();
        let groups = batch.into_groups(&self.config.grouping);
        tracing::debug!(batch_id, size, groups = groups.len(), "Dispatching batch");

        for group in groups {
            self.dispatch_group(batch_id, group).await;
        }
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    async fn dispatch_group(&self, batch_id: u64, group: ContextGroup) {
        let context = group.combined_context();
        let words = group.pending_words();

        let outcome = AssertUnwindSafe(correct_words(self.corrector.as_ref(), &words, &context))
            .catch_unwind()
            .await;
        let results = match outcome {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                tracing::warn!(batch_id, group = %group.key, error = %e, "Group correction failed, returning original words");
                self.group_failures.fetch_add(1, Ordering::Relaxed);
                HashMap::new()
            }
            Err(payload) => {
                tracing::error!(
                    batch_id,
                    group = %group.key,
                    panic = %panic_message(payload.as_ref()),
                    "Group correction panicked, returning original words"
                );
                self.group_failures.fetch_add(1, Ordering::Relaxed);
                HashMap::new()
            }
        };

        for task in group.tasks {
            let correction = results
                .get(&task.word)
                .cloned()
                .unwrap_or_else(|| Correction::unchanged(task.word.clone()));
            task.complete(correction);
            self.tasks_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

async fn correct_words(
    corrector: &dyn Corrector,
    words: &[String],
    context: &str,
) -> QuillResult<HashMap<String, Correction>> {
    let mut results = HashMap::with_capacity(words.len());
    for word in words {
        let correction = corrector.correct(word, context).await?;
        results.insert(word.clone(), correction);
    }
    Ok(results)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// WORKER LOOP
// ============================================================================

async fn worker_loop(shared: Arc<Shared>) {
    tracing::debug!("Batch worker started");
    loop {
        match shared.next_step(Instant::now()) {
            Step::Exit => break,
            Step::Wait(wait) => {
                let _ = tokio::time::timeout(wait, shared.notify.notified()).await;
            }
            Step::Dispatch(batch) => {
                let batch_id = batch.id();
                if let Err(payload) = AssertUnwindSafe(shared.dispatch(batch))
                    .catch_unwind()
                    .await
                {
                    tracing::error!(
                        batch_id,
                        panic = %panic_message(payload.as_ref()),
                        "Batch dispatch panicked, pausing worker"
                    );
                    tokio::time::sleep(shared.config.error_pause).await;
                }
            }
        }
    }
    tracing::debug!("Batch worker stopped");
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Priority batch scheduler.
///
/// Every accepted task gets exactly one callback invocation: the
/// corrector's answer, or the original word when its group failed, the
/// task was cancelled, or the scheduler was dropped with it pending.
pub struct BatchScheduler {
    shared: Arc<Shared>,
    /// Held for the whole of `stop`, so concurrent stops finish together.
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    /// Start the scheduler and spawn its worker on the current tokio
    /// runtime.
    pub fn start(config: SchedulerConfig, corrector: Arc<dyn Corrector>) -> Self {
        let shared = Arc::new(Shared::new(config, corrector));
        let worker = tokio::spawn(worker_loop(Arc::clone(&shared)));
        tracing::info!(
            batch_size = shared.config.batch_size,
            max_delay_ms = shared.config.max_delay.as_millis() as u64,
            "Batch scheduler started"
        );
        Self {
            shared,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Queue `word` for correction. `priority` is clamped into
    /// `PRIORITY_MIN..=PRIORITY_MAX`.
    ///
    /// # Errors
    /// Returns [`QuillError::ShutdownInProgress`] once [`stop`](Self::stop)
    /// has begun; the callback is then never invoked.
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
        let handle = {
            let mut state = self.shared.lock();
            if !state.running {
                return Err(QuillError::ShutdownInProgress);
            }
            let seq = state.queue.next_seq();
            let task = CorrectionTask::new(
                word.into(),
                context.into(),
                clamp_priority(priority),
                seq,
                Instant::now(),
                Box::new(callback),
            );
            let handle = task.handle();
            state.queue.push(task);
            handle
        };
        self.shared.notify.notify_one();
        Ok(handle)
    }

    /// Pop the next batch without dispatching it.
    pub fn drain_batch(&self) -> Option<Batch> {
        self.shared.drain_now()
    }

    /// Dispatch a batch on the caller's task.
    pub async fn dispatch(&self, batch: Batch) {
        self.shared.dispatch(batch).await;
    }

    /// Stop accepting tasks, wait for the worker and deliver everything
    /// still queued.
    ///
    /// A second concurrent call returns only after the first has delivered
    /// every queued task.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.lock();
            state.running = false;
        }
        self.shared.notify.notify_one();

        let mut worker = self.worker.lock().await;
        if let Some(worker) = worker.take() {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Batch worker terminated abnormally");
            }
        }

        while let Some(batch) = self.shared.drain_now() {
            self.shared.dispatch(batch).await;
        }
        tracing::info!(
            batches_processed = self.shared.batches_processed.load(Ordering::Relaxed),
            "Batch scheduler stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.lock();
        SchedulerStats {
            pending_tasks: state.queue.len(),
            batches_processed: self.shared.batches_processed.load(Ordering::Relaxed),
            is_running: state.running,
            tasks_delivered: self.shared.tasks_delivered.load(Ordering::Relaxed),
            group_failures: self.shared.group_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.shared.lock().running = false;
        self.shared.notify.notify_one();
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}
