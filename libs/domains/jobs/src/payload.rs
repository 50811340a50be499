//! Typed job payloads.
//!
//! Payloads are a tagged variant keyed by job type; each worker receives the
//! narrow variant for its family and validates it at dequeue time. Every
//! payload carries the owning user id. Validation failures are non-retryable.

use crate::models::JobType;
use job_queue::QueueError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content artifact inside a deduplication request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DedupItem {
    pub id: String,
    pub content: String,
    pub name: String,
}

/// Similarity scoring algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityAlgorithm {
    #[default]
    Semantic,
    Syntactic,
    Hybrid,
}

/// Clustering algorithm for semantic clustering jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusteringAlgorithm {
    #[default]
    Kmeans,
    Hierarchical,
    Dbscan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationPayload {
    pub user_id: String,
    pub content: String,
    pub format: String,
    #[serde(default)]
    pub target_models: Option<Vec<String>>,
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationPayload {
    pub user_id: String,
    pub content: String,
    pub target_model: String,
    pub current_format: String,
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversionPayload {
    pub user_id: String,
    pub content: String,
    pub from_format: String,
    pub to_format: String,
}

fn default_dedup_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationPayload {
    pub user_id: String,
    pub items: Vec<DedupItem>,
    #[serde(default = "default_dedup_threshold")]
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssessmentPayload {
    pub user_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub format: String,
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityScoringPayload {
    pub user_id: String,
    pub source_content: String,
    pub target_content: String,
    #[serde(default)]
    pub algorithm: SimilarityAlgorithm,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingGenerationPayload {
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnalysisPayload {
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub include_quality: Option<bool>,
    #[serde(default)]
    pub include_summary: Option<bool>,
    #[serde(default)]
    pub include_tags: Option<bool>,
}

fn default_cluster_threshold() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SemanticClusteringPayload {
    pub user_id: String,
    #[serde(default)]
    pub algorithm: ClusteringAlgorithm,
    #[serde(default)]
    pub num_clusters: Option<usize>,
    #[serde(default = "default_cluster_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub item_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptimizationPayload {
    pub user_id: String,
    pub content: String,
    pub target_model: String,
    #[serde(default)]
    pub max_token_budget: Option<u32>,
    #[serde(default)]
    pub prioritize_quality: Option<bool>,
    #[serde(default)]
    pub aggressive_optimization: Option<bool>,
}

fn default_assembly_strategy() -> String {
    "automatic".to_string()
}

fn default_assembly_max_tokens() -> u32 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextAssemblyPayload {
    pub user_id: String,
    pub intent: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_assembly_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub target_model: Option<String>,
    #[serde(default = "default_assembly_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderSuggestionPayload {
    pub user_id: String,
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchImportPayload {
    pub user_id: String,
    pub item_ids: Vec<String>,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntelligencePipelinePayload {
    pub user_id: String,
    pub item_ids: Vec<String>,
    pub operations: Vec<String>,
    #[serde(default)]
    pub options: Option<Value>,
}

/// The tagged payload variant, keyed by job type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Classification(ClassificationPayload),
    Optimization(OptimizationPayload),
    Conversion(ConversionPayload),
    Deduplication(DeduplicationPayload),
    QualityAssessment(QualityAssessmentPayload),
    SimilarityScoring(SimilarityScoringPayload),
    EmbeddingGeneration(EmbeddingGenerationPayload),
    ContentAnalysis(ContentAnalysisPayload),
    SemanticClustering(SemanticClusteringPayload),
    ModelOptimization(ModelOptimizationPayload),
    ContextAssembly(ContextAssemblyPayload),
    FolderSuggestion(FolderSuggestionPayload),
    BatchImport(BatchImportPayload),
    IntelligencePipeline(IntelligencePipelinePayload),
}

impl JobPayload {
    /// The job family this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            Self::Classification(_) => JobType::Classification,
            Self::Optimization(_) => JobType::Optimization,
            Self::Conversion(_) => JobType::Conversion,
            Self::Deduplication(_) => JobType::Deduplication,
            Self::QualityAssessment(_) => JobType::QualityAssessment,
            Self::SimilarityScoring(_) => JobType::SimilarityScoring,
            Self::EmbeddingGeneration(_) => JobType::EmbeddingGeneration,
            Self::ContentAnalysis(_) => JobType::ContentAnalysis,
            Self::SemanticClustering(_) => JobType::SemanticClustering,
            Self::ModelOptimization(_) => JobType::ModelOptimization,
            Self::ContextAssembly(_) => JobType::ContextAssembly,
            Self::FolderSuggestion(_) => JobType::FolderSuggestion,
            Self::BatchImport(_) => JobType::BatchImport,
            Self::IntelligencePipeline(_) => JobType::IntelligencePipeline,
        }
    }

    /// The owning user id; every payload carries one.
    pub fn user_id(&self) -> &str {
        match self {
            Self::Classification(p) => &p.user_id,
            Self::Optimization(p) => &p.user_id,
            Self::Conversion(p) => &p.user_id,
            Self::Deduplication(p) => &p.user_id,
            Self::QualityAssessment(p) => &p.user_id,
            Self::SimilarityScoring(p) => &p.user_id,
            Self::EmbeddingGeneration(p) => &p.user_id,
            Self::ContentAnalysis(p) => &p.user_id,
            Self::SemanticClustering(p) => &p.user_id,
            Self::ModelOptimization(p) => &p.user_id,
            Self::ContextAssembly(p) => &p.user_id,
            Self::FolderSuggestion(p) => &p.user_id,
            Self::BatchImport(p) => &p.user_id,
            Self::IntelligencePipeline(p) => &p.user_id,
        }
    }

    /// Validate the payload against its per-type schema.
    ///
    /// Workers call this first; a failure here is non-retryable and sends
    /// the job straight to `failed`.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.user_id().trim().is_empty() {
            return Err(QueueError::Validation("userId must not be empty".to_string()));
        }

        match self {
            Self::Classification(p) => {
                require_content(&p.content)?;
                Ok(())
            }
            Self::Optimization(p) => {
                require_content(&p.content)?;
                require_field(&p.target_model, "targetModel")?;
                require_field(&p.current_format, "currentFormat")
            }
            Self::Conversion(p) => {
                require_content(&p.content)?;
                require_field(&p.from_format, "fromFormat")?;
                require_field(&p.to_format, "toFormat")
            }
            Self::Deduplication(p) => {
                if p.items.len() < 2 {
                    return Err(QueueError::Validation(
                        "deduplication requires at least 2 items".to_string(),
                    ));
                }
                if p.items.len() > 1000 {
                    return Err(QueueError::Validation(
                        "deduplication accepts at most 1000 items".to_string(),
                    ));
                }
                require_unit_interval(p.threshold, "threshold")
            }
            Self::QualityAssessment(p) => {
                require_content(&p.content)?;
                require_field(&p.item_type, "type")
            }
            Self::SimilarityScoring(p) => {
                require_field(&p.source_content, "sourceContent")?;
                require_field(&p.target_content, "targetContent")
            }
            Self::EmbeddingGeneration(p) => require_content(&p.content),
            Self::ContentAnalysis(p) => require_content(&p.content),
            Self::SemanticClustering(p) => {
                require_unit_interval(p.threshold, "threshold")?;
                if let Some(k) = p.num_clusters {
                    if k == 0 {
                        return Err(QueueError::Validation(
                            "numClusters must be at least 1".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            Self::ModelOptimization(p) => {
                require_content(&p.content)?;
                require_field(&p.target_model, "targetModel")
            }
            Self::ContextAssembly(p) => {
                require_field(&p.intent, "intent")?;
                if p.max_tokens == 0 {
                    return Err(QueueError::Validation(
                        "maxTokens must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Self::FolderSuggestion(p) => require_ids(&p.item_ids),
            Self::BatchImport(p) => require_ids(&p.item_ids),
            Self::IntelligencePipeline(p) => {
                require_ids(&p.item_ids)?;
                if p.operations.is_empty() {
                    return Err(QueueError::Validation(
                        "operations must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn require_content(content: &str) -> Result<(), QueueError> {
    require_field(content, "content")
}

fn require_field(value: &str, name: &str) -> Result<(), QueueError> {
    if value.trim().is_empty() {
        Err(QueueError::Validation(format!("{name} must not be empty")))
    } else {
        Ok(())
    }
}

fn require_unit_interval(value: f64, name: &str) -> Result<(), QueueError> {
    if !(0.0..=1.0).contains(&value) {
        Err(QueueError::Validation(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    } else {
        Ok(())
    }
}

fn require_ids(ids: &[String]) -> Result<(), QueueError> {
    if ids.is_empty() {
        Err(QueueError::Validation("itemIds must not be empty".to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagged_by_job_type() {
        let payload = JobPayload::Classification(ClassificationPayload {
            user_id: "u1".to_string(),
            content: "hello".to_string(),
            format: ".md".to_string(),
            target_models: None,
            item_id: None,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "classification");
        assert_eq!(json["userId"], "u1");

        let parsed: JobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.job_type(), JobType::Classification);
    }

    #[test]
    fn test_dedup_threshold_defaults() {
        let json = serde_json::json!({
            "type": "deduplication",
            "userId": "u1",
            "items": [
                { "id": "a", "content": "x", "name": "A" },
                { "id": "b", "content": "y", "name": "B" }
            ]
        });

        let payload: JobPayload = serde_json::from_value(json).unwrap();
        match &payload {
            JobPayload::Deduplication(p) => assert_eq!(p.threshold, 0.8),
            other => panic!("unexpected payload: {:?}", other.job_type()),
        }
        payload.validate().unwrap();
    }

    #[test]
    fn test_clustering_defaults() {
        let json = serde_json::json!({
            "type": "semantic_clustering",
            "userId": "u1"
        });

        let payload: JobPayload = serde_json::from_value(json).unwrap();
        match payload {
            JobPayload::SemanticClustering(p) => {
                assert_eq!(p.algorithm, ClusteringAlgorithm::Kmeans);
                assert_eq!(p.threshold, 0.7);
            }
            other => panic!("unexpected payload: {:?}", other.job_type()),
        }
    }

    #[test]
    fn test_context_assembly_defaults() {
        let json = serde_json::json!({
            "type": "context_assembly",
            "userId": "u1",
            "intent": "summarize docs"
        });

        let payload: JobPayload = serde_json::from_value(json).unwrap();
        match payload {
            JobPayload::ContextAssembly(p) => {
                assert_eq!(p.strategy, "automatic");
                assert_eq!(p.max_tokens, 8000);
            }
            other => panic!("unexpected payload: {:?}", other.job_type()),
        }
    }

    #[test]
    fn test_empty_user_id_rejected() {
        let payload = JobPayload::ContentAnalysis(ContentAnalysisPayload {
            user_id: "  ".to_string(),
            content: "text".to_string(),
            include_quality: None,
            include_summary: None,
            include_tags: None,
        });

        let err = payload.validate().unwrap_err();
        assert!(err.to_string().contains("userId"));
    }

    #[test]
    fn test_dedup_item_bounds() {
        let items = |n: usize| {
            (0..n)
                .map(|i| DedupItem {
                    id: format!("i{i}"),
                    content: "c".to_string(),
                    name: format!("n{i}"),
                })
                .collect::<Vec<_>>()
        };

        let too_few = JobPayload::Deduplication(DeduplicationPayload {
            user_id: "u1".to_string(),
            items: items(1),
            threshold: 0.8,
        });
        assert!(too_few.validate().is_err());

        let too_many = JobPayload::Deduplication(DeduplicationPayload {
            user_id: "u1".to_string(),
            items: items(1001),
            threshold: 0.8,
        });
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let payload = JobPayload::Deduplication(DeduplicationPayload {
            user_id: "u1".to_string(),
            items: vec![
                DedupItem {
                    id: "a".to_string(),
                    content: "x".to_string(),
                    name: "A".to_string(),
                },
                DedupItem {
                    id: "b".to_string(),
                    content: "y".to_string(),
                    name: "B".to_string(),
                },
            ],
            threshold: 1.5,
        });

        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_similarity_algorithm_default() {
        let json = serde_json::json!({
            "type": "similarity_scoring",
            "userId": "u1",
            "sourceContent": "a",
            "targetContent": "b"
        });

        let payload: JobPayload = serde_json::from_value(json).unwrap();
        match payload {
            JobPayload::SimilarityScoring(p) => {
                assert_eq!(p.algorithm, SimilarityAlgorithm::Semantic)
            }
            other => panic!("unexpected payload: {:?}", other.job_type()),
        }
    }
}
