//! Pipeline configuration.
//!
//! Process-wide; updates take effect for subsequent calls while in-flight
//! bundles keep the snapshot captured in their audit entry.

use job_queue::QueuePriority;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub enable_auto_classification: bool,
    pub enable_auto_optimization: bool,
    pub enable_duplicate_detection: bool,
    pub enable_quality_assessment: bool,
    pub batch_size: usize,
    pub priority: QueuePriority,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_auto_classification: true,
            enable_auto_optimization: true,
            enable_duplicate_detection: true,
            enable_quality_assessment: true,
            batch_size: 10,
            priority: QueuePriority::Normal,
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfigUpdate {
    pub enable_auto_classification: Option<bool>,
    pub enable_auto_optimization: Option<bool>,
    pub enable_duplicate_detection: Option<bool>,
    pub enable_quality_assessment: Option<bool>,
    pub batch_size: Option<usize>,
    pub priority: Option<QueuePriority>,
}

impl PipelineConfig {
    pub fn apply(&mut self, update: PipelineConfigUpdate) {
        if let Some(value) = update.enable_auto_classification {
            self.enable_auto_classification = value;
        }
        if let Some(value) = update.enable_auto_optimization {
            self.enable_auto_optimization = value;
        }
        if let Some(value) = update.enable_duplicate_detection {
            self.enable_duplicate_detection = value;
        }
        if let Some(value) = update.enable_quality_assessment {
            self.enable_quality_assessment = value;
        }
        if let Some(value) = update.batch_size {
            self.batch_size = value.max(1);
        }
        if let Some(value) = update.priority {
            self.priority = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_update() {
        let mut config = PipelineConfig::default();
        config.apply(PipelineConfigUpdate {
            enable_auto_classification: Some(false),
            batch_size: Some(25),
            ..Default::default()
        });

        assert!(!config.enable_auto_classification);
        assert_eq!(config.batch_size, 25);
        // untouched fields keep defaults
        assert!(config.enable_quality_assessment);
        assert_eq!(config.priority, QueuePriority::Normal);
    }

    #[test]
    fn test_batch_size_floor() {
        let mut config = PipelineConfig::default();
        config.apply(PipelineConfigUpdate {
            batch_size: Some(0),
            ..Default::default()
        });
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_config_serde_camel_case() {
        let json = serde_json::to_value(PipelineConfig::default()).unwrap();
        assert!(json.get("enableAutoClassification").is_some());
        assert!(json.get("batchSize").is_some());
    }
}
