//! Append-only audit log.
//!
//! Records pipeline executions, user notifications, and analytics activity
//! traces. The realtime gateway serves the activity feed from here.

use crate::entity::audit;
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use uuid::Uuid;

/// A single append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: String,
    /// What happened, e.g. "pipeline_executed" or "notification".
    pub action: String,
    pub item_id: Option<String>,
    /// Jobs enqueued as part of this action.
    pub job_ids: Vec<String>,
    /// Action-specific blob; pipeline entries carry the captured
    /// configuration snapshot.
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(user_id: impl Into<String>, action: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            action: action.into(),
            item_id: None,
            job_ids: Vec::new(),
            data,
            created_at: Utc::now(),
        }
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn with_job_ids(mut self, job_ids: Vec<String>) -> Self {
        self.job_ids = job_ids;
        self
    }
}

/// Storage seam for the audit log.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append an entry. The log is never updated in place.
    async fn append(&self, entry: AuditEntry) -> JobResult<()>;

    /// List a user's entries, newest first.
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> JobResult<Vec<AuditEntry>>;
}

pub struct PgAuditRepository {
    db: DatabaseConnection,
}

impl PgAuditRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn append(&self, entry: AuditEntry) -> JobResult<()> {
        let model = audit::ActiveModel {
            id: Set(entry.id),
            user_id: Set(entry.user_id),
            action: Set(entry.action),
            item_id: Set(entry.item_id),
            job_ids: Set(serde_json::to_value(&entry.job_ids)
                .map_err(|e| JobError::Internal(e.to_string()))?),
            data: Set(entry.data),
            created_at: Set(entry.created_at.into()),
        };

        audit::Entity::insert(model).exec(&self.db).await?;
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> JobResult<Vec<AuditEntry>> {
        let models = audit::Entity::find()
            .filter(audit::Column::UserId.eq(user_id))
            .order_by_desc(audit::Column::CreatedAt)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Into::into).collect())
    }
}

impl From<audit::Model> for AuditEntry {
    fn from(model: audit::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            action: model.action,
            item_id: model.item_id,
            job_ids: serde_json::from_value(model.job_ids).unwrap_or_default(),
            data: model.data,
            created_at: model.created_at.into(),
        }
    }
}

/// In-memory audit log for tests and single-process setups.
#[derive(Default)]
pub struct InMemoryAuditRepository {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, entry: AuditEntry) -> JobResult<()> {
        self.entries
            .lock()
            .map_err(|_| JobError::Internal("audit lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> JobResult<Vec<AuditEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| JobError::Internal("audit lock poisoned".to_string()))?;

        let mut matching: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_list_newest_first() {
        let repo = InMemoryAuditRepository::new();

        for i in 0..3 {
            let mut entry = AuditEntry::new("u1", "pipeline_executed", json!({ "seq": i }));
            entry.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            repo.append(entry).await.unwrap();
        }
        repo.append(AuditEntry::new("u2", "notification", json!({})))
            .await
            .unwrap();

        let entries = repo.list_by_user("u1", 10, 0).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].data["seq"], 2);
        assert_eq!(entries[2].data["seq"], 0);
    }

    #[tokio::test]
    async fn test_list_respects_limit_and_offset() {
        let repo = InMemoryAuditRepository::new();
        for i in 0..5 {
            let mut entry = AuditEntry::new("u1", "notification", json!({ "seq": i }));
            entry.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            repo.append(entry).await.unwrap();
        }

        let page = repo.list_by_user("u1", 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].data["seq"], 3);
        assert_eq!(page[1].data["seq"], 2);
    }

    #[test]
    fn test_entry_builders() {
        let entry = AuditEntry::new("u1", "pipeline_executed", json!({}))
            .with_item("item-1")
            .with_job_ids(vec!["a".to_string(), "b".to_string()]);

        assert_eq!(entry.item_id.as_deref(), Some("item-1"));
        assert_eq!(entry.job_ids.len(), 2);
    }
}
