//! QUILL Batch - Priority Batch Scheduler
//!
//! Collects single-word correction requests into a priority queue and
//! dispatches them in batches, grouped by context, to a [`Corrector`].
//!
//! [`Corrector`]: quill_core::Corrector

pub mod batch;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use batch::{Batch, ContextGroup};
pub use queue::TaskQueue;
pub use scheduler::{BatchScheduler, SchedulerStats};
pub use task::{Callback, CorrectionTask, TaskHandle};
