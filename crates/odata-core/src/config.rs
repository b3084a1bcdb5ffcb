//! Planner configuration.

use serde::{Deserialize, Serialize};

/// Default maximum expansion depth below the root entity.
pub const DEFAULT_MAX_EXPANSION_DEPTH: usize = 3;

/// Fetch plan builder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Expansions deeper than this are dropped with a diagnostic.
    pub max_expansion_depth: usize,

    /// Drop an expansion that repeats a `(type, relation)` edge already on
    /// the current root-to-leaf path.
    pub prune_cycles: bool,

    /// Drop `$orderby` keys that are not stored fields of the entity.
    pub validate_order_by: bool,
}

impl PlannerConfig {
    /// Create a configuration with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum expansion depth.
    pub fn with_max_expansion_depth(mut self, depth: usize) -> Self {
        self.max_expansion_depth = depth;
        self
    }

    /// Enable or disable cycle pruning.
    pub fn with_cycle_pruning(mut self, enabled: bool) -> Self {
        self.prune_cycles = enabled;
        self
    }

    /// Enable or disable `$orderby` field validation.
    pub fn with_order_by_validation(mut self, enabled: bool) -> Self {
        self.validate_order_by = enabled;
        self
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_expansion_depth: DEFAULT_MAX_EXPANSION_DEPTH,
            prune_cycles: true,
            validate_order_by: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlannerConfig::default();
        assert_eq!(config.max_expansion_depth, DEFAULT_MAX_EXPANSION_DEPTH);
        assert!(config.prune_cycles);
        assert!(config.validate_order_by);
    }

    #[test]
    fn test_config_builder() {
        let config = PlannerConfig::new()
            .with_max_expansion_depth(5)
            .with_cycle_pruning(false)
            .with_order_by_validation(false);

        assert_eq!(config.max_expansion_depth, 5);
        assert!(!config.prune_cycles);
        assert!(!config.validate_order_by);
    }

    #[test]
    fn test_partial_json() {
        let config: PlannerConfig = serde_json::from_str(r#"{"max_expansion_depth": 1}"#).unwrap();
        assert_eq!(config.max_expansion_depth, 1);
        assert!(config.prune_cycles);
    }
}
