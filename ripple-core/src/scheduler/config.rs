//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default cap on how often one job may run within a single flush.
pub const DEFAULT_RECURSION_LIMIT: u32 = 100;

/// Per-thread scheduler settings.
///
/// ```rust
/// use ripple_core::SchedulerConfig;
///
/// let config = SchedulerConfig::from_json(r#"{ "recursion_limit": 20 }"#).unwrap();
/// assert_eq!(config.recursion_limit, 20);
/// assert!(config.microtasks);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Runs of one job per flush before it is reported and skipped.
    pub recursion_limit: u32,

    /// Inside `run_local`, flush automatically from a spawned local task.
    pub microtasks: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            microtasks: true,
        }
    }
}

impl SchedulerConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        assert_eq!(SchedulerConfig::from_json("{}").unwrap(), SchedulerConfig::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = SchedulerConfig::from_json(r#"{ "recursion_limit": 5, "microtasks": false }"#).unwrap();
        assert_eq!(config.recursion_limit, 5);
        assert!(!config.microtasks);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = SchedulerConfig::from_json(r#"{ "recursion": 5 }"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }
}
