//! Pipeline orchestration.
//!
//! Wires sources, merge engine, cache and history into the recurring
//! fetch → merge → persist cycle and schedules it.

pub mod error;
pub mod pipeline;
pub mod scheduler;

pub use error::PipelineError;
pub use pipeline::{create_history_store, create_merge_engine, Pipeline};
pub use scheduler::Scheduler;
