//! Pipeline Domain
//!
//! The user-facing orchestrator: fans one item or a batch into a
//! dependency-ordered bundle of jobs, runs deduplication and similarity
//! sweeps, records an append-only audit trail, and notifies users through
//! the event bus. Configuration is process-wide and snapshotted into every
//! bundle's audit entry.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::{PipelineConfig, PipelineConfigUpdate};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{
    default_target_models, BatchOutcome, JobSummary, OptimizationPipeline, PipelineStatus,
    ProcessItemOptions,
};
