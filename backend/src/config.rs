use anyhow::{anyhow, Context};
use std::env;
use std::time::Duration;

use crate::triggers::{ConditionErrorPolicy, EngineConfig, ExecutionMode};

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: String,
    pub triggers: TriggerSettings,
}

/// Trigger system settings
#[derive(Debug, Clone)]
pub struct TriggerSettings {
    pub engine_enabled: bool,
    pub max_workers: usize,
    /// Dispatch mode used by lifecycle capture
    pub execution_mode: ExecutionMode,
    pub slow_execution_threshold: Duration,
    pub max_retry_delay: Duration,
    pub condition_error_policy: ConditionErrorPolicy,
    /// Pending pre-save snapshots kept at most; 0 means unbounded
    pub snapshot_cache_capacity: usize,
    pub install_system_triggers: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            engine_enabled: true,
            max_workers: 10,
            execution_mode: ExecutionMode::Sequential,
            slow_execution_threshold: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(300),
            condition_error_policy: ConditionErrorPolicy::Skip,
            snapshot_cache_capacity: 10_000,
            install_system_triggers: true,
        }
    }
}

impl TriggerSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_workers: self.max_workers,
            slow_execution_threshold: self.slow_execution_threshold,
            max_retry_delay: self.max_retry_delay,
            condition_error_policy: self.condition_error_policy,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unparsable numbers and flags fall back to
    /// their defaults; unknown mode or policy names are errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TriggerSettings::default();
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let execution_mode = match parsed("TRIGGER_EXECUTION_MODE") {
            Some(value) => value
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("Invalid TRIGGER_EXECUTION_MODE")?,
            None => defaults.execution_mode,
        };

        let condition_error_policy = match parsed("TRIGGER_CONDITION_ERRORS") {
            Some(value) => value
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("Invalid TRIGGER_CONDITION_ERRORS")?,
            None => defaults.condition_error_policy,
        };

        let slow_execution_threshold = parsed("TRIGGER_SLOW_THRESHOLD_SECS")
            .and_then(|v| v.parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(defaults.slow_execution_threshold);

        Ok(Config {
            server_addr: parsed("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            triggers: TriggerSettings {
                engine_enabled: parsed("TRIGGER_ENGINE_ENABLED")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.engine_enabled),
                max_workers: parsed("TRIGGER_MAX_WORKERS")
                    .and_then(|v| v.parse().ok())
                    .filter(|n: &usize| *n > 0)
                    .unwrap_or(defaults.max_workers),
                execution_mode,
                slow_execution_threshold,
                max_retry_delay: parsed("TRIGGER_MAX_RETRY_DELAY_SECS")
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.max_retry_delay),
                condition_error_policy,
                snapshot_cache_capacity: parsed("TRIGGER_SNAPSHOT_CACHE_CAPACITY")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.snapshot_cache_capacity),
                install_system_triggers: parsed("TRIGGER_INSTALL_SYSTEM_TRIGGERS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.install_system_triggers),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080");
        assert!(config.triggers.engine_enabled);
        assert_eq!(config.triggers.max_workers, 10);
        assert_eq!(config.triggers.execution_mode, ExecutionMode::Sequential);
        assert_eq!(config.triggers.snapshot_cache_capacity, 10_000);
        assert_eq!(config.triggers.condition_error_policy, ConditionErrorPolicy::Skip);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SERVER_ADDR", "127.0.0.1:9000"),
            ("TRIGGER_ENGINE_ENABLED", "false"),
            ("TRIGGER_MAX_WORKERS", "4"),
            ("TRIGGER_EXECUTION_MODE", "concurrent"),
            ("TRIGGER_SLOW_THRESHOLD_SECS", "0.5"),
            ("TRIGGER_CONDITION_ERRORS", "fail"),
            ("TRIGGER_SNAPSHOT_CACHE_CAPACITY", "0"),
        ])
        .unwrap();

        assert_eq!(config.server_addr, "127.0.0.1:9000");
        assert!(!config.triggers.engine_enabled);
        assert_eq!(config.triggers.max_workers, 4);
        assert_eq!(config.triggers.execution_mode, ExecutionMode::Concurrent);
        assert_eq!(config.triggers.slow_execution_threshold, Duration::from_millis(500));
        assert_eq!(config.triggers.condition_error_policy, ConditionErrorPolicy::Fail);
        assert_eq!(config.triggers.snapshot_cache_capacity, 0);
    }

    #[test]
    fn test_bad_values() {
        let config = config_from(&[("TRIGGER_MAX_WORKERS", "0"), ("TRIGGER_ENGINE_ENABLED", "maybe")]).unwrap();
        assert_eq!(config.triggers.max_workers, 10);
        assert!(config.triggers.engine_enabled);

        assert!(config_from(&[("TRIGGER_EXECUTION_MODE", "parallel")]).is_err());
    }
}
