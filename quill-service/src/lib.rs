//! QUILL Service - Pipeline Composition
//!
//! Builds the cache, breaker registry, orchestrator and batch scheduler
//! from one [`QuillConfig`](quill_core::QuillConfig) and exposes them as a
//! single [`CorrectionService`].

pub mod service;
pub mod telemetry;

pub use service::CorrectionService;
pub use telemetry::{init_tracing, LogFormat};
