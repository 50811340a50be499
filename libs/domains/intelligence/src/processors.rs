//! Job processors for the intelligence worker pool.
//!
//! Each processor consumes one job family, validates the narrow payload
//! variant, runs its engine, and persists derivatives through the item
//! store. Provider failures inside an engine switch to its rule-based
//! fallback; only store and embedding failures bubble up for retry.

use crate::classify::Classifier;
use crate::clustering::{self, ClusteringOutcome};
use crate::dedupe::Deduplicator;
use crate::items::{ItemStore, OptimizationRecord};
use crate::optimize::Optimizer;
use crate::provider::LlmProvider;
use crate::quality;
use crate::similarity::SimilarityScorer;
use async_trait::async_trait;
use chrono::Utc;
use domain_jobs::{Job, JobPayload, JobType};
use job_queue::{JobProcessor, ProgressReporter, QueueError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Shared provider handle passed to every engine.
pub type SharedProvider = Arc<dyn LlmProvider>;

/// Declared maximum concurrency for each registered worker.
pub fn default_concurrency(job_type: JobType) -> usize {
    match job_type {
        JobType::Classification => 3,
        JobType::Optimization => 2,
        JobType::Deduplication => 1,
        JobType::QualityAssessment => 2,
        JobType::SimilarityScoring => 2,
        JobType::EmbeddingGeneration => 2,
        JobType::SemanticClustering => 1,
        _ => 1,
    }
}

fn wrong_payload(expected: JobType, job: &Job) -> QueueError {
    QueueError::Validation(format!(
        "expected {expected} payload, got {}",
        job.job_type
    ))
}

/// Classification worker (concurrency 3).
pub struct ClassificationProcessor {
    classifier: Classifier<SharedProvider>,
    items: Arc<dyn ItemStore>,
}

impl ClassificationProcessor {
    pub fn new(provider: SharedProvider, items: Arc<dyn ItemStore>) -> Self {
        Self {
            classifier: Classifier::new(provider),
            items,
        }
    }
}

#[async_trait]
impl JobProcessor<Job> for ClassificationProcessor {
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, QueueError> {
        job.payload.validate()?;
        let JobPayload::Classification(payload) = &job.payload else {
            return Err(wrong_payload(JobType::Classification, job));
        };

        progress.report(10, "Extracting content features").await;
        let result = self
            .classifier
            .classify(&payload.content, &payload.format)
            .await;

        if let Some(item_id) = &payload.item_id {
            progress.report(80, "Persisting classification").await;
            self.items
                .apply_classification(item_id, &result)
                .await
                .map_err(QueueError::from)?;
        }

        progress.report(100, "Classification complete").await;
        serde_json::to_value(&result).map_err(QueueError::from)
    }

    fn name(&self) -> &'static str {
        "classification"
    }
}

/// For-model optimization worker (concurrency 2).
pub struct OptimizationProcessor {
    optimizer: Optimizer<SharedProvider>,
    items: Arc<dyn ItemStore>,
}

impl OptimizationProcessor {
    pub fn new(provider: SharedProvider, items: Arc<dyn ItemStore>) -> Self {
        Self {
            optimizer: Optimizer::new(provider),
            items,
        }
    }
}

#[async_trait]
impl JobProcessor<Job> for OptimizationProcessor {
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, QueueError> {
        job.payload.validate()?;
        let JobPayload::Optimization(payload) = &job.payload else {
            return Err(wrong_payload(JobType::Optimization, job));
        };

        progress.report(10, "Analyzing content").await;
        let result = self
            .optimizer
            .optimize(&payload.content, &payload.target_model)
            .await;

        if let Some(item_id) = &payload.item_id {
            progress.report(85, "Recording optimization").await;
            self.items
                .record_optimization(OptimizationRecord {
                    item_id: item_id.clone(),
                    target_model: payload.target_model.clone(),
                    result: result.clone(),
                    created_at: Utc::now(),
                })
                .await
                .map_err(QueueError::from)?;
        }

        progress.report(100, "Optimization complete").await;
        serde_json::to_value(&result).map_err(QueueError::from)
    }

    fn name(&self) -> &'static str {
        "optimization"
    }
}

/// Deduplication worker (concurrency 1).
pub struct DeduplicationProcessor {
    deduplicator: Deduplicator<SharedProvider>,
    items: Arc<dyn ItemStore>,
}

impl DeduplicationProcessor {
    pub fn new(provider: SharedProvider, items: Arc<dyn ItemStore>) -> Self {
        Self {
            deduplicator: Deduplicator::new(provider),
            items,
        }
    }
}

#[async_trait]
impl JobProcessor<Job> for DeduplicationProcessor {
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, QueueError> {
        job.payload.validate()?;
        let JobPayload::Deduplication(payload) = &job.payload else {
            return Err(wrong_payload(JobType::Deduplication, job));
        };

        progress
            .report_with_data(
                10,
                "Comparing items",
                json!({ "itemCount": payload.items.len() }),
            )
            .await;
        let outcome = self
            .deduplicator
            .deduplicate(&payload.items, payload.threshold)
            .await;

        progress.report(80, "Marking canonicals and duplicates").await;
        for group in &outcome.groups {
            if let Err(e) = self.items.mark_canonical(&group.canonical_id).await {
                warn!(item_id = %group.canonical_id, error = %e, "Could not mark canonical");
            }
            for duplicate_id in &group.duplicate_ids {
                if let Err(e) = self
                    .items
                    .mark_duplicate(duplicate_id, &group.canonical_id)
                    .await
                {
                    warn!(item_id = %duplicate_id, error = %e, "Could not mark duplicate");
                }
            }
        }

        progress.report(100, "Deduplication complete").await;
        serde_json::to_value(&outcome).map_err(QueueError::from)
    }

    fn name(&self) -> &'static str {
        "deduplication"
    }
}

/// Quality assessment worker (concurrency 2).
pub struct QualityProcessor {
    items: Arc<dyn ItemStore>,
}

impl QualityProcessor {
    pub fn new(items: Arc<dyn ItemStore>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl JobProcessor<Job> for QualityProcessor {
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, QueueError> {
        job.payload.validate()?;
        let JobPayload::QualityAssessment(payload) = &job.payload else {
            return Err(wrong_payload(JobType::QualityAssessment, job));
        };

        progress.report(20, "Scoring content").await;
        let assessment = quality::assess(&payload.content, &payload.item_type, &payload.format);

        if let Some(item_id) = &payload.item_id {
            progress.report(85, "Recording assessment").await;
            self.items
                .record_quality_assessment(item_id, &assessment)
                .await
                .map_err(QueueError::from)?;
        }

        progress.report(100, "Assessment complete").await;
        serde_json::to_value(&assessment).map_err(QueueError::from)
    }

    fn name(&self) -> &'static str {
        "quality_assessment"
    }
}

/// Similarity scoring worker (concurrency 2).
pub struct SimilarityProcessor {
    scorer: SimilarityScorer<SharedProvider>,
}

impl SimilarityProcessor {
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            scorer: SimilarityScorer::new(provider),
        }
    }
}

#[async_trait]
impl JobProcessor<Job> for SimilarityProcessor {
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, QueueError> {
        job.payload.validate()?;
        let JobPayload::SimilarityScoring(payload) = &job.payload else {
            return Err(wrong_payload(JobType::SimilarityScoring, job));
        };

        progress.report(25, "Scoring pair").await;
        let score = self
            .scorer
            .score(
                &payload.source_content,
                &payload.target_content,
                payload.algorithm,
            )
            .await;

        progress.report(100, "Similarity scored").await;
        Ok(json!({
            "score": score.score,
            "algorithm": score.algorithm,
            "fallback": score.fallback,
            "sourceId": payload.source_id,
            "targetId": payload.target_id,
        }))
    }

    fn name(&self) -> &'static str {
        "similarity_scoring"
    }
}

/// Embedding generation worker (concurrency 2).
///
/// Embeddings have no rule fallback; provider failures bubble up as
/// transient errors and ride the broker's retry backoff.
pub struct EmbeddingProcessor {
    provider: SharedProvider,
    items: Arc<dyn ItemStore>,
}

impl EmbeddingProcessor {
    pub fn new(provider: SharedProvider, items: Arc<dyn ItemStore>) -> Self {
        Self { provider, items }
    }
}

#[async_trait]
impl JobProcessor<Job> for EmbeddingProcessor {
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, QueueError> {
        job.payload.validate()?;
        let JobPayload::EmbeddingGeneration(payload) = &job.payload else {
            return Err(wrong_payload(JobType::EmbeddingGeneration, job));
        };

        progress.report(20, "Generating embedding").await;
        let embedding = self
            .provider
            .embed(&payload.content)
            .await
            .map_err(|e| QueueError::Provider(e.to_string()))?;

        if let Some(item_id) = &payload.item_id {
            self.items
                .set_embedding(item_id, &embedding)
                .await
                .map_err(QueueError::from)?;
        }

        progress.report(100, "Embedding stored").await;
        Ok(json!({
            "dimensions": embedding.len(),
            "providerId": payload.provider_id,
        }))
    }

    fn name(&self) -> &'static str {
        "embedding_generation"
    }
}

/// Semantic clustering worker (concurrency 1).
pub struct ClusteringProcessor {
    provider: SharedProvider,
    items: Arc<dyn ItemStore>,
}

impl ClusteringProcessor {
    pub fn new(provider: SharedProvider, items: Arc<dyn ItemStore>) -> Self {
        Self { provider, items }
    }

    async fn resolve_points(
        &self,
        user_id: &str,
        item_ids: &Option<Vec<String>>,
    ) -> Result<Vec<(String, Vec<f32>)>, QueueError> {
        let items = match item_ids {
            Some(ids) => {
                let mut resolved = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.items.get(id).await.map_err(QueueError::from)? {
                        Some(item) => resolved.push(item),
                        None => warn!(item_id = %id, "Clustering skipped missing item"),
                    }
                }
                resolved
            }
            None => self
                .items
                .list_by_user(user_id, None, 1000)
                .await
                .map_err(QueueError::from)?,
        };

        let mut points = Vec::with_capacity(items.len());
        for item in items {
            let embedding = match item.embedding {
                Some(embedding) => embedding,
                None => self
                    .provider
                    .embed(&item.content)
                    .await
                    .map_err(|e| QueueError::Provider(e.to_string()))?,
            };
            points.push((item.id, embedding));
        }
        Ok(points)
    }
}

#[async_trait]
impl JobProcessor<Job> for ClusteringProcessor {
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, QueueError> {
        job.payload.validate()?;
        let JobPayload::SemanticClustering(payload) = &job.payload else {
            return Err(wrong_payload(JobType::SemanticClustering, job));
        };

        progress.report(15, "Resolving item embeddings").await;
        let points = self
            .resolve_points(&payload.user_id, &payload.item_ids)
            .await?;

        progress
            .report_with_data(50, "Clustering", json!({ "points": points.len() }))
            .await;
        let outcome: ClusteringOutcome = clustering::cluster(
            payload.algorithm,
            &points,
            payload.threshold,
            payload.num_clusters,
        );

        progress.report(85, "Recording memberships").await;
        for cluster in &outcome.clusters {
            self.items
                .record_cluster_membership(&cluster.label, &cluster.item_ids)
                .await
                .map_err(QueueError::from)?;
        }

        progress.report(100, "Clustering complete").await;
        serde_json::to_value(&outcome).map_err(QueueError::from)
    }

    fn name(&self) -> &'static str {
        "semantic_clustering"
    }
}
