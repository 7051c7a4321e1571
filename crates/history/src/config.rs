use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_HISTORY_SIZE: usize = 50;

/// How a restore treats fields that remote participants changed after the
/// snapshot being restored was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Remote edits made after the snapshot keep their live value
    #[default]
    PreserveRemote,

    /// Snapshot values overwrite everything (last writer wins)
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_history_size: usize,
    pub conflict_policy: ConflictPolicy,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl HistoryConfig {
    pub fn with_max_history_size(mut self, max_history_size: usize) -> Self {
        self.max_history_size = max_history_size;
        self
    }

    pub fn with_conflict_policy(mut self, conflict_policy: ConflictPolicy) -> Self {
        self.conflict_policy = conflict_policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: HistoryConfig = serde_json::from_str(r#"{ "max_history_size": 10 }"#).unwrap();

        assert_eq!(config.max_history_size, 10);
        assert_eq!(config.conflict_policy, ConflictPolicy::PreserveRemote);
    }

    #[test]
    fn test_policy_names() {
        let config: HistoryConfig =
            serde_json::from_str(r#"{ "conflict_policy": "overwrite" }"#).unwrap();

        assert_eq!(config.max_history_size, DEFAULT_MAX_HISTORY_SIZE);
        assert_eq!(config.conflict_policy, ConflictPolicy::Overwrite);
    }
}
