//! Engine configuration
//!
//! Defaults, environment overrides and validation for the server and host loop.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::CoreError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Workflows claimed per pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Workflows executed concurrently within a pass
    #[serde(default = "default_max_degree_of_parallelism")]
    pub max_degree_of_parallelism: usize,

    /// Host loop sleep after an empty pass, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Tracing filter directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,
}

fn default_batch_size() -> usize {
    10
}

fn default_max_degree_of_parallelism() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_degree_of_parallelism: default_max_degree_of_parallelism(),
            poll_interval_ms: default_poll_interval_ms(),
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, CoreError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from defaults and a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("WAYPOINT_BATCH_SIZE") {
            match value.parse::<usize>() {
                Ok(batch_size) => config.batch_size = batch_size,
                Err(_) => warn!("Invalid WAYPOINT_BATCH_SIZE value: {}", value),
            }
        }

        if let Some(value) = lookup("WAYPOINT_MAX_PARALLELISM") {
            match value.parse::<usize>() {
                Ok(parallelism) => config.max_degree_of_parallelism = parallelism,
                Err(_) => warn!("Invalid WAYPOINT_MAX_PARALLELISM value: {}", value),
            }
        }

        if let Some(value) = lookup("WAYPOINT_POLL_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(poll_interval_ms) => config.poll_interval_ms = poll_interval_ms,
                Err(_) => warn!("Invalid WAYPOINT_POLL_INTERVAL_MS value: {}", value),
            }
        }

        if let Some(log_filter) = lookup("LOG_LEVEL") {
            config.log_filter = log_filter;
        }

        if let Some(value) = lookup("WAYPOINT_JSON_LOGS") {
            match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.json_logs = true,
                "0" | "false" | "no" => config.json_logs = false,
                _ => warn!("Invalid WAYPOINT_JSON_LOGS value: {}", value),
            }
        }

        config.validate()?;

        info!(
            batch_size = config.batch_size,
            max_degree_of_parallelism = config.max_degree_of_parallelism,
            poll_interval_ms = config.poll_interval_ms,
            "Engine configuration loaded"
        );

        Ok(config)
    }

    /// Reject sizes the server cannot work with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.batch_size == 0 {
            return Err(CoreError::ConfigurationError(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.max_degree_of_parallelism == 0 {
            return Err(CoreError::ConfigurationError(
                "max_degree_of_parallelism must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Host loop sleep after an empty pass
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_degree_of_parallelism, 4);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.log_filter, "info");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_environment_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("WAYPOINT_BATCH_SIZE", "25"),
            ("WAYPOINT_MAX_PARALLELISM", "8"),
            ("WAYPOINT_POLL_INTERVAL_MS", "250"),
            ("LOG_LEVEL", "waypoint_core=debug"),
            ("WAYPOINT_JSON_LOGS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_degree_of_parallelism, 8);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.log_filter, "waypoint_core=debug");
        assert!(config.json_logs);
    }

    #[test]
    fn test_unparsable_values_keep_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("WAYPOINT_BATCH_SIZE", "lots"),
            ("WAYPOINT_JSON_LOGS", "maybe"),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 10);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        let result = EngineConfig::from_lookup(lookup_from(&[("WAYPOINT_MAX_PARALLELISM", "0")]));
        assert!(matches!(result, Err(CoreError::ConfigurationError(_))));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"batch_size": 3}"#).unwrap();

        assert_eq!(config.batch_size, 3);
        assert_eq!(config.max_degree_of_parallelism, 4);
        assert_eq!(config.log_filter, "info");
    }
}
