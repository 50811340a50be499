//! Intelligence Domain
//!
//! AI-driven analysis of content artifacts: classification, for-model
//! optimization, deduplication, quality assessment, similarity scoring,
//! embedding generation, and semantic clustering. Each capability ships as
//! an engine plus a `JobProcessor` binding it to the queue runtime.
//!
//! External LLM/embedding access goes through the [`LlmProvider`] seam; every
//! engine carries a deterministic rule-based fallback so a provider outage
//! degrades results instead of failing jobs.

pub mod classify;
pub mod clustering;
pub mod dedupe;
pub mod error;
pub mod items;
pub mod optimize;
pub mod processors;
pub mod provider;
pub mod quality;
pub mod similarity;

// Re-export commonly used types
pub use classify::{ClassificationResult, Classifier, ContentFeatures};
pub use clustering::{cluster, Cluster, ClusteringOutcome};
pub use dedupe::{
    DeduplicationOutcome, Deduplicator, DuplicateGroup, SimilarityKind, SimilarityRecord,
};
pub use error::{IntelligenceError, IntelligenceResult, ProviderError};
pub use items::{InMemoryItemStore, Item, ItemStore, OptimizationRecord};
pub use optimize::{ContentMetrics, OptimizationResult, Optimizer};
pub use processors::{
    default_concurrency, ClassificationProcessor, ClusteringProcessor, DeduplicationProcessor,
    EmbeddingProcessor, OptimizationProcessor, QualityProcessor, SharedProvider,
    SimilarityProcessor,
};
pub use provider::{CompletionOptions, LlmProvider, ModelFamily};
pub use quality::{QualityAssessment, QualityIssue, ReadabilitySummary, Recommendation, Severity};
pub use similarity::{cosine_similarity, SimilarityScore, SimilarityScorer};
