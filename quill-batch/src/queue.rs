//! Priority queue of pending correction tasks

use crate::batch::Batch;
use crate::task::CorrectionTask;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Max-heap of tasks plus the sequence and batch id counters.
#[derive(Debug, Default)]
pub struct TaskQueue {
    heap: BinaryHeap<CorrectionTask>,
    next_seq: u64,
    next_batch_id: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next task sequence number.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn push(&mut self, task: CorrectionTask) {
        self.heap.push(task);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Age of the longest-waiting pending task.
    pub fn oldest_pending_age(&self, now: Instant) -> Option<Duration> {
        self.heap
            .iter()
            .map(|task| task.submitted_at)
            .min()
            .map(|oldest| now.saturating_duration_since(oldest))
    }

    /// Pop up to `batch_size` tasks in priority order.
    ///
    /// Collection stops early once at least `min_items` tasks are collected
    /// and the oldest collected task has waited `max_delay`. Returns `None`
    /// when the queue is empty; batch ids are only consumed by non-empty
    /// batches.
    pub fn drain_batch(
        &mut self,
        batch_size: usize,
        min_items: usize,
        max_delay: Duration,
        now: Instant,
    ) -> Option<Batch> {
        let mut tasks = Vec::new();
        let mut oldest: Option<Instant> = None;

        while tasks.len() < batch_size.max(1) {
            let Some(task) = self.heap.pop() else {
                break;
            };
            oldest = Some(match oldest {
                Some(at) => at.min(task.submitted_at),
                None => task.submitted_at,
            });
            tasks.push(task);

            let waited = oldest
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if tasks.len() >= min_items && waited >= max_delay {
                break;
            }
        }

        if tasks.is_empty() {
            return None;
        }

        let id = self.next_batch_id;
        self.next_batch_id += 1;
        for task in &mut tasks {
            task.batch_id = Some(id);
        }
        Some(Batch::new(id, tasks))
    }
}
