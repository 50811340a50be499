//! Jobs Domain
//!
//! The durable job model and everything that supervises it: typed payloads,
//! the authoritative job store (PostgreSQL and in-memory), the queue façade
//! used by producers, the queue manager, and the append-only audit log.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐
//! │ QueueManager  │  ← bulk ops, stats, health, retry sweeps, shutdown
//! └───────┬───────┘
//!         │
//! ┌───────▼───────┐
//! │JobQueueService│  ← enqueue, cancel, progress, listings (the façade)
//! └───────┬───────┘
//!         │
//! ┌───────▼───────┐
//! │ JobRepository │  ← durable truth (Pg + in-memory implementations)
//! └───────┬───────┘
//!         │
//! ┌───────▼───────┐
//! │ Models        │  ← Job, JobType, JobStatus, JobPayload
//! └───────────────┘
//! ```

pub mod audit;
pub mod entity;
pub mod error;
pub mod manager;
pub mod memory;
pub mod models;
pub mod payload;
pub mod postgres;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditRepository, InMemoryAuditRepository, PgAuditRepository};
pub use error::{JobError, JobResult};
pub use manager::{
    BulkCancelOutcome, HealthReport, QueueCounters, QueueManager, QueueManagerConfig,
    QueueStatistics, RetryFailedOptions, RetryOutcome,
};
pub use memory::InMemoryJobRepository;
pub use models::{Job, JobStatus, JobType, NewJob};
pub use payload::{
    BatchImportPayload, ClassificationPayload, ClusteringAlgorithm, ContentAnalysisPayload,
    ContextAssemblyPayload, ConversionPayload, DedupItem, DeduplicationPayload,
    EmbeddingGenerationPayload, FolderSuggestionPayload, IntelligencePipelinePayload, JobPayload,
    ModelOptimizationPayload, OptimizationPayload, QualityAssessmentPayload,
    SemanticClusteringPayload, SimilarityAlgorithm, SimilarityScoringPayload,
};
pub use postgres::PgJobRepository;
pub use repository::JobRepository;
pub use service::JobQueueService;
