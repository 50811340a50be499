//! Item store seam.
//!
//! Workers read and write content artifacts through this trait; the
//! relational schema behind it stays external. References between items and
//! their derivatives are ids, never owning pointers.

use crate::classify::ClassificationResult;
use crate::error::{IntelligenceError, IntelligenceResult};
use crate::optimize::OptimizationResult;
use crate::quality::QualityAssessment;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// A user-owned content artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// prompt | agent | rule | template | snippet | other
    #[serde(rename = "type")]
    pub item_type: String,
    pub sub_type: Option<String>,
    pub format: String,
    pub content: String,
    pub tags: Vec<String>,
    pub target_models: Vec<String>,
    pub metadata: Value,
    pub is_canonical: bool,
    /// Points at the canonical item when this one is a duplicate.
    pub canonical_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub collection_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            name: String::new(),
            item_type: "other".to_string(),
            sub_type: None,
            format: ".md".to_string(),
            content: content.into(),
            tags: Vec::new(),
            target_models: Vec::new(),
            metadata: Value::Null,
            is_canonical: false,
            canonical_id: None,
            embedding: None,
            collection_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }
}

/// A persisted optimization run for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRecord {
    pub item_id: String,
    pub target_model: String,
    pub result: OptimizationResult,
    pub created_at: DateTime<Utc>,
}

/// Storage seam for items and their derivative tables.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get(&self, id: &str) -> IntelligenceResult<Option<Item>>;

    /// A user's items, optionally filtered by an opaque collection key.
    async fn list_by_user(
        &self,
        user_id: &str,
        collection_id: Option<&str>,
        limit: usize,
    ) -> IntelligenceResult<Vec<Item>>;

    /// Persist a classification outcome onto the item.
    async fn apply_classification(
        &self,
        id: &str,
        outcome: &ClassificationResult,
    ) -> IntelligenceResult<()>;

    /// Append an optimization record.
    async fn record_optimization(&self, record: OptimizationRecord) -> IntelligenceResult<()>;

    /// Most recent optimization records for one item, newest first.
    async fn list_optimizations(&self, item_id: &str)
        -> IntelligenceResult<Vec<OptimizationRecord>>;

    /// Append a quality assessment.
    async fn record_quality_assessment(
        &self,
        item_id: &str,
        assessment: &QualityAssessment,
    ) -> IntelligenceResult<()>;

    /// Store the item's embedding vector.
    async fn set_embedding(&self, id: &str, embedding: &[f32]) -> IntelligenceResult<()>;

    /// Flag an item as the canonical representative of its duplicate group.
    async fn mark_canonical(&self, id: &str) -> IntelligenceResult<()>;

    /// Flag an item as a duplicate pointing at its canonical.
    async fn mark_duplicate(&self, id: &str, canonical_id: &str) -> IntelligenceResult<()>;

    /// Append cluster memberships for a labeled cluster.
    async fn record_cluster_membership(
        &self,
        cluster_label: &str,
        item_ids: &[String],
    ) -> IntelligenceResult<()>;
}

/// In-memory item store for tests and single-process setups.
#[derive(Default)]
pub struct InMemoryItemStore {
    items: Mutex<HashMap<String, Item>>,
    optimizations: Mutex<Vec<OptimizationRecord>>,
    assessments: Mutex<Vec<(String, QualityAssessment)>>,
    clusters: Mutex<Vec<(String, Vec<String>)>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, item: Item) {
        if let Ok(mut items) = self.items.lock() {
            items.insert(item.id.clone(), item);
        }
    }

    pub fn assessments_for(&self, item_id: &str) -> Vec<QualityAssessment> {
        self.assessments
            .lock()
            .map(|a| {
                a.iter()
                    .filter(|(id, _)| id == item_id)
                    .map(|(_, assessment)| assessment.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clusters(&self) -> Vec<(String, Vec<String>)> {
        self.clusters.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn lock_items(&self) -> IntelligenceResult<std::sync::MutexGuard<'_, HashMap<String, Item>>> {
        self.items
            .lock()
            .map_err(|_| IntelligenceError::Internal("item store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, id: &str) -> IntelligenceResult<Option<Item>> {
        Ok(self.lock_items()?.get(id).cloned())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        collection_id: Option<&str>,
        limit: usize,
    ) -> IntelligenceResult<Vec<Item>> {
        let items = self.lock_items()?;
        let mut matching: Vec<Item> = items
            .values()
            .filter(|item| item.user_id == user_id)
            .filter(|item| match collection_id {
                Some(c) => item.collection_id.as_deref() == Some(c),
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn apply_classification(
        &self,
        id: &str,
        outcome: &ClassificationResult,
    ) -> IntelligenceResult<()> {
        let mut items = self.lock_items()?;
        let item = items
            .get_mut(id)
            .ok_or_else(|| IntelligenceError::ItemNotFound(id.to_string()))?;
        item.item_type = outcome.item_type.clone();
        item.sub_type = outcome.sub_type.clone();
        item.target_models = outcome.target_models.clone();
        item.metadata = outcome.metadata.clone();
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn record_optimization(&self, record: OptimizationRecord) -> IntelligenceResult<()> {
        self.optimizations
            .lock()
            .map_err(|_| IntelligenceError::Internal("optimization lock poisoned".to_string()))?
            .push(record);
        Ok(())
    }

    async fn list_optimizations(
        &self,
        item_id: &str,
    ) -> IntelligenceResult<Vec<OptimizationRecord>> {
        let mut records: Vec<OptimizationRecord> = self
            .optimizations
            .lock()
            .map_err(|_| IntelligenceError::Internal("optimization lock poisoned".to_string()))?
            .iter()
            .filter(|r| r.item_id == item_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn record_quality_assessment(
        &self,
        item_id: &str,
        assessment: &QualityAssessment,
    ) -> IntelligenceResult<()> {
        self.assessments
            .lock()
            .map_err(|_| IntelligenceError::Internal("assessment lock poisoned".to_string()))?
            .push((item_id.to_string(), assessment.clone()));
        Ok(())
    }

    async fn set_embedding(&self, id: &str, embedding: &[f32]) -> IntelligenceResult<()> {
        let mut items = self.lock_items()?;
        let item = items
            .get_mut(id)
            .ok_or_else(|| IntelligenceError::ItemNotFound(id.to_string()))?;
        item.embedding = Some(embedding.to_vec());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_canonical(&self, id: &str) -> IntelligenceResult<()> {
        let mut items = self.lock_items()?;
        let item = items
            .get_mut(id)
            .ok_or_else(|| IntelligenceError::ItemNotFound(id.to_string()))?;
        item.is_canonical = true;
        item.canonical_id = None;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_duplicate(&self, id: &str, canonical_id: &str) -> IntelligenceResult<()> {
        let mut items = self.lock_items()?;
        let item = items
            .get_mut(id)
            .ok_or_else(|| IntelligenceError::ItemNotFound(id.to_string()))?;
        item.is_canonical = false;
        item.canonical_id = Some(canonical_id.to_string());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn record_cluster_membership(
        &self,
        cluster_label: &str,
        item_ids: &[String],
    ) -> IntelligenceResult<()> {
        self.clusters
            .lock()
            .map_err(|_| IntelligenceError::Internal("cluster lock poisoned".to_string()))?
            .push((cluster_label.to_string(), item_ids.to_vec()));
        Ok(())
    }
}
