//! Queue priority levels.

use serde::{Deserialize, Serialize};

/// Dispatch priority for queued jobs.
///
/// Strict ordering: `Low < Normal < High < Critical`. The broker always
/// dispatches the highest-priority eligible job; submission order breaks ties.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl QueuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for QueuePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering_is_strict() {
        assert!(QueuePriority::Low < QueuePriority::Normal);
        assert!(QueuePriority::Normal < QueuePriority::High);
        assert!(QueuePriority::High < QueuePriority::Critical);
    }

    #[test]
    fn test_priority_serde_lowercase() {
        let json = serde_json::to_string(&QueuePriority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");

        let parsed: QueuePriority = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, QueuePriority::High);
    }

    #[test]
    fn test_priority_default_is_normal() {
        assert_eq!(QueuePriority::default(), QueuePriority::Normal);
    }
}
