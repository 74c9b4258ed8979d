//! Correction tasks and cancellation handles

use quill_core::Correction;
use std::cmp::Ordering;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

/// Receives `(correction, was_corrected)` exactly once.
pub type Callback = Box<dyn FnOnce(String, bool) + Send + 'static>;

/// One pending request to correct a word.
///
/// Ordered so that the greatest task is the most urgent: higher priority
/// first, then earlier submission, then lower sequence number. Sequence
/// numbers are unique, so the order is total.
///
/// A task dropped without being completed delivers the identity result, so
/// every accepted task reaches its callback.
pub struct CorrectionTask {
    pub priority: u8,
    pub submitted_at: Instant,
    pub word: String,
    pub context: String,
    pub seq: u64,
    pub batch_id: Option<u64>,
    callback: Option<Callback>,
    cancelled: Arc<AtomicBool>,
}

impl CorrectionTask {
    pub fn new(
        word: String,
        context: String,
        priority: u8,
        seq: u64,
        submitted_at: Instant,
        callback: Callback,
    ) -> Self {
        Self {
            priority,
            submitted_at,
            word,
            context,
            seq,
            batch_id: None,
            callback: Some(callback),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle sharing this task's cancellation flag.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            seq: self.seq,
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    /// Deliver `correction`, or the identity result if the task was
    /// cancelled. Returns false if the callback panicked.
    pub fn complete(mut self, correction: Correction) -> bool {
        let correction = if self.is_cancelled() {
            Correction::unchanged(self.word.clone())
        } else {
            correction
        };
        self.deliver(correction)
    }

    fn deliver(&mut self, correction: Correction) -> bool {
        let Some(callback) = self.callback.take() else {
            return true;
        };
        let (text, was_corrected) = correction.into_parts();
        match catch_unwind(AssertUnwindSafe(move || callback(text, was_corrected))) {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(word = %self.word, seq = self.seq, "Correction callback panicked");
                false
            }
        }
    }
}

impl Drop for CorrectionTask {
    fn drop(&mut self) {
        if self.callback.is_some() {
            tracing::warn!(word = %self.word, seq = self.seq, "Task dropped undelivered, sending original word");
            let identity = Correction::unchanged(self.word.clone());
            self.deliver(identity);
        }
    }
}

impl PartialEq for CorrectionTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CorrectionTask {}

impl PartialOrd for CorrectionTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CorrectionTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl std::fmt::Debug for CorrectionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionTask")
            .field("seq", &self.seq)
            .field("priority", &self.priority)
            .field("word", &self.word)
            .field("batch_id", &self.batch_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Caller-side handle to a submitted task.
///
/// Cancelling does not remove the task from the queue; its callback still
/// fires once, with the original word.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    seq: u64,
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }
}
