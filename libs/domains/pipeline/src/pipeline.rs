//! The optimization pipeline.
//!
//! Fans a single user action into a dependency-ordered bundle of jobs
//! (classify → quality → per-model optimize), records an audit trail, and
//! emits user notifications. The pipeline owns no persistent state of its
//! own, only configuration.

use crate::config::{PipelineConfig, PipelineConfigUpdate};
use crate::error::{PipelineError, PipelineResult};
use chrono::{Duration as ChronoDuration, Utc};
use domain_intelligence::{Item, ItemStore};
use domain_jobs::{
    AuditEntry, AuditRepository, ClassificationPayload, DedupItem, DeduplicationPayload, Job,
    JobPayload, JobQueueService, NewJob, OptimizationPayload, QualityAssessmentPayload,
    SimilarityScoringPayload,
};
use job_queue::{BusEvent, EventKind};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Options for [`OptimizationPipeline::process_item`].
#[derive(Debug, Clone)]
pub struct ProcessItemOptions {
    pub user_id: String,
    /// Explicit target models; the item type's defaults apply when absent.
    pub target_models: Option<Vec<String>>,
    /// Skip the bundle when a recent optimization (younger than 7 days)
    /// already exists.
    pub skip_if_optimized: bool,
    /// Force re-classification even when the item already has a subtype.
    pub force_reprocess: bool,
}

impl ProcessItemOptions {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            target_models: None,
            skip_if_optimized: false,
            force_reprocess: false,
        }
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
}

/// Per-user pipeline status summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    /// Status counts over the user's last 20 jobs.
    pub by_status: HashMap<String, u64>,
    /// Type counts over the same window.
    pub by_type: HashMap<String, u64>,
    /// The first 10 of those jobs, newest first.
    pub jobs: Vec<JobSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: String,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.to_string(),
            status: job.status.to_string(),
            created_at: job.created_at,
        }
    }
}

pub struct OptimizationPipeline {
    jobs: Arc<JobQueueService>,
    items: Arc<dyn ItemStore>,
    audit: Arc<dyn AuditRepository>,
    config: RwLock<PipelineConfig>,
}

impl OptimizationPipeline {
    pub fn new(
        jobs: Arc<JobQueueService>,
        items: Arc<dyn ItemStore>,
        audit: Arc<dyn AuditRepository>,
    ) -> Self {
        Self {
            jobs,
            items,
            audit,
            config: RwLock::new(PipelineConfig::default()),
        }
    }

    pub fn get_config(&self) -> PipelineConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Apply a partial update; takes effect for subsequent calls only.
    pub fn update_config(&self, update: PipelineConfigUpdate) -> PipelineConfig {
        match self.config.write() {
            Ok(mut config) => {
                config.apply(update);
                info!(?config, "Pipeline configuration updated");
                config.clone()
            }
            Err(_) => self.get_config(),
        }
    }

    /// Fan one item into its job bundle. Returns the enqueued job ids, in
    /// order. The audit entry is written only after every id is known, so a
    /// failed enqueue never leaves a partial trail.
    pub async fn process_item(
        &self,
        item_id: &str,
        options: ProcessItemOptions,
    ) -> PipelineResult<Vec<Uuid>> {
        let config = self.get_config();

        let item = self
            .items
            .get(item_id)
            .await?
            .ok_or_else(|| PipelineError::ItemNotFound(item_id.to_string()))?;

        self.notify(
            &options.user_id,
            format!("Processing started for '{}'", display_name(&item)),
            json!({ "itemId": item_id }),
        )
        .await;

        if options.skip_if_optimized {
            let recent_cutoff = Utc::now() - ChronoDuration::days(7);
            let optimizations = self.items.list_optimizations(item_id).await?;
            if optimizations.iter().any(|o| o.created_at > recent_cutoff) {
                info!(item_id, "Skipping item with a recent optimization");
                return Ok(Vec::new());
            }
        }

        let requests = self.build_bundle(&item, &options, &config);
        let mut job_ids = Vec::with_capacity(requests.len());

        for request in requests {
            match self.jobs.add_job(request).await {
                Ok(id) => job_ids.push(id),
                Err(e) => {
                    warn!(item_id, error = %e, "Pipeline enqueue failed");
                    self.notify(
                        &options.user_id,
                        format!("Processing failed for '{}': {e}", display_name(&item)),
                        json!({ "itemId": item_id, "error": e.to_string() }),
                    )
                    .await;
                    return Err(e.into());
                }
            }
        }

        let entry = AuditEntry::new(
            &options.user_id,
            "pipeline_executed",
            json!({ "config": config }),
        )
        .with_item(item_id)
        .with_job_ids(job_ids.iter().map(Uuid::to_string).collect());
        self.audit.append(entry).await?;

        info!(item_id, jobs = job_ids.len(), "Pipeline bundle enqueued");
        Ok(job_ids)
    }

    fn build_bundle(
        &self,
        item: &Item,
        options: &ProcessItemOptions,
        config: &PipelineConfig,
    ) -> Vec<NewJob> {
        let mut requests = Vec::new();

        let needs_classification = config.enable_auto_classification
            && (item.item_type == "other" || item.sub_type.is_none() || options.force_reprocess);
        if needs_classification {
            requests.push(
                NewJob::new(JobPayload::Classification(ClassificationPayload {
                    user_id: options.user_id.clone(),
                    content: item.content.clone(),
                    format: item.format.clone(),
                    target_models: options.target_models.clone(),
                    item_id: Some(item.id.clone()),
                }))
                .with_priority(config.priority),
            );
        }

        if config.enable_quality_assessment {
            requests.push(
                NewJob::new(JobPayload::QualityAssessment(QualityAssessmentPayload {
                    user_id: options.user_id.clone(),
                    content: item.content.clone(),
                    item_type: item.item_type.clone(),
                    format: item.format.clone(),
                    item_id: Some(item.id.clone()),
                }))
                .with_priority(config.priority),
            );
        }

        if config.enable_auto_optimization {
            let targets = options
                .target_models
                .clone()
                .unwrap_or_else(|| default_target_models(&item.item_type));
            for target_model in targets {
                requests.push(
                    NewJob::new(JobPayload::Optimization(OptimizationPayload {
                        user_id: options.user_id.clone(),
                        content: item.content.clone(),
                        target_model,
                        current_format: item.format.clone(),
                        item_id: Some(item.id.clone()),
                    }))
                    .with_priority(config.priority),
                );
            }
        }

        requests
    }

    /// Process many items in chunks of `batch_size`, in parallel within a
    /// chunk, sleeping one second between chunks. Per-item errors are
    /// swallowed so the batch keeps going.
    pub async fn process_batch(
        &self,
        item_ids: &[String],
        options: ProcessItemOptions,
    ) -> BatchOutcome {
        let batch_size = self.get_config().batch_size.max(1);
        let mut outcome = BatchOutcome::default();

        let mut chunks = item_ids.chunks(batch_size).peekable();
        while let Some(chunk) = chunks.next() {
            let results = futures::future::join_all(
                chunk
                    .iter()
                    .map(|item_id| self.process_item(item_id, options.clone())),
            )
            .await;

            for (item_id, result) in chunk.iter().zip(results) {
                match result {
                    Ok(_) => outcome.processed += 1,
                    Err(e) => {
                        warn!(item_id = %item_id, error = %e, "Batch item failed");
                        outcome.failed += 1;
                    }
                }
            }

            if chunks.peek().is_some() {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        info!(
            processed = outcome.processed,
            failed = outcome.failed,
            "Batch processing finished"
        );
        outcome
    }

    /// Enqueue one deduplication job over a user's items (up to 1000,
    /// optionally scoped by the opaque collection key). Returns None when
    /// fewer than two items qualify.
    pub async fn run_deduplication(
        &self,
        user_id: &str,
        collection_id: Option<&str>,
    ) -> PipelineResult<Option<Uuid>> {
        let items = self.items.list_by_user(user_id, collection_id, 1000).await?;
        if items.len() < 2 {
            return Ok(None);
        }

        let payload = DeduplicationPayload {
            user_id: user_id.to_string(),
            items: items
                .into_iter()
                .map(|item| DedupItem {
                    id: item.id,
                    name: item.name,
                    content: item.content,
                })
                .collect(),
            threshold: 0.8,
        };

        let id = self
            .jobs
            .add_job(NewJob::new(JobPayload::Deduplication(payload)))
            .await?;
        Ok(Some(id))
    }

    /// Enqueue one similarity job per (source, target) pair, carrying both
    /// contents and the pair's ids. Missing targets are skipped.
    pub async fn run_similarity_scoring(
        &self,
        source_id: &str,
        target_ids: &[String],
        user_id: &str,
    ) -> PipelineResult<Vec<Uuid>> {
        let source = self
            .items
            .get(source_id)
            .await?
            .ok_or_else(|| PipelineError::ItemNotFound(source_id.to_string()))?;

        let mut job_ids = Vec::new();
        for target_id in target_ids {
            let Some(target) = self.items.get(target_id).await? else {
                warn!(target_id = %target_id, "Similarity target missing, skipping");
                continue;
            };

            let id = self
                .jobs
                .add_job(NewJob::new(JobPayload::SimilarityScoring(
                    SimilarityScoringPayload {
                        user_id: user_id.to_string(),
                        source_content: source.content.clone(),
                        target_content: target.content,
                        algorithm: Default::default(),
                        source_id: Some(source_id.to_string()),
                        target_id: Some(target_id.clone()),
                    },
                )))
                .await?;
            job_ids.push(id);
        }

        Ok(job_ids)
    }

    /// Summary over the user's most recent jobs.
    pub async fn get_pipeline_status(&self, user_id: &str) -> PipelineResult<PipelineStatus> {
        let recent = self.jobs.list_by_user(user_id, 20).await?;

        let mut by_status: HashMap<String, u64> = HashMap::new();
        let mut by_type: HashMap<String, u64> = HashMap::new();
        for job in &recent {
            *by_status.entry(job.status.to_string()).or_default() += 1;
            *by_type.entry(job.job_type.to_string()).or_default() += 1;
        }

        Ok(PipelineStatus {
            by_status,
            by_type,
            jobs: recent.iter().take(10).map(JobSummary::from).collect(),
        })
    }

    /// Publish a targeted notification and store it in the activity feed.
    async fn notify(&self, user_id: &str, message: String, data: Value) {
        self.jobs.bus().publish(
            BusEvent::new(
                EventKind::Notification,
                json!({ "message": message, "data": data }),
            )
            .with_user(user_id.to_string()),
        );

        let entry = AuditEntry::new(
            user_id,
            "notification",
            json!({ "message": message, "data": data }),
        );
        if let Err(e) = self.audit.append(entry).await {
            warn!(error = %e, "Failed to store notification in activity feed");
        }
    }
}

/// Pipeline default target models per item type.
pub fn default_target_models(item_type: &str) -> Vec<String> {
    match item_type {
        "agent" => vec!["anthropic".to_string(), "openai".to_string()],
        "prompt" => vec![
            "openai".to_string(),
            "anthropic".to_string(),
            "gemini".to_string(),
        ],
        "template" => vec!["openai".to_string(), "gemini".to_string()],
        _ => vec!["openai".to_string()],
    }
}

fn display_name(item: &Item) -> String {
    if item.name.is_empty() {
        item.id.clone()
    } else {
        item.name.clone()
    }
}
