//! Worker health report.

use serde::{Deserialize, Serialize};

/// Health reported by the settings worker over the health queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceHealth {
    pub status: String,
    /// Whether the settings store answered a ping.
    pub storage: bool,
}

impl ServiceHealth {
    pub fn from_storage(storage: bool) -> Self {
        Self {
            status: if storage { "ok" } else { "degraded" }.to_string(),
            storage,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_storage() {
        assert_eq!(ServiceHealth::from_storage(true).status, "ok");
        assert_eq!(ServiceHealth::from_storage(false).status, "degraded");
        assert!(!ServiceHealth::from_storage(false).is_healthy());
    }
}
