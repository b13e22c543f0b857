//! Configuration management for the service layer
//!
//! Configuration is loaded from multiple sources:
//! - Default values
//! - Configuration files (TOML, JSON, YAML)
//! - Environment variables (`AGENT__HEALTH__FAILURE_THRESHOLD=5`)

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest accepted delegation expiry (ten years)
pub const MAX_DELEGATION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Main configuration for the service layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceLayerConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Health monitor parameters
    #[serde(default)]
    pub health: HealthSettings,

    /// Router defaults
    #[serde(default)]
    pub routing: RoutingSettings,

    /// Discovery index settings
    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Routed execution settings
    #[serde(default)]
    pub execution: ExecutionSettings,

    /// Task coordinator settings
    #[serde(default)]
    pub tasks: TaskSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format
    #[serde(default)]
    pub json: bool,
}

/// Health monitor parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Seconds between probe cycles
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Per-probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Consecutive failures before a service is marked unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Upper bound on probes in flight during one cycle
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    /// Remove unhealthy services from the catalog automatically
    #[serde(default = "default_true")]
    pub auto_remove: bool,

    /// How long a removed service's record stays queryable
    #[serde(default = "default_record_retention_secs")]
    pub record_retention_secs: u64,
}

/// Router defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    /// round_robin, least_busy, fastest_response, random or priority
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
}

/// Discovery index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Time budget for each external discovery source
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
}

/// Routed execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Timeout applied when the caller does not supply one
    #[serde(default = "default_execution_timeout_ms")]
    pub default_timeout_ms: u64,
}

/// Task coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    /// Reputation points awarded on completion
    #[serde(default = "default_reward_points")]
    pub reward_points: u64,

    /// Scale the award by a `quality_score` found in the result
    #[serde(default = "default_true")]
    pub quality_weighted_rewards: bool,

    /// Issue a completion certificate when an issuer is configured
    #[serde(default)]
    pub issue_certificates: bool,

    /// Delegations left pending longer than this are swept to Cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_ttl_secs: Option<u64>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_concurrent_probes() -> usize {
    16
}

fn default_record_retention_secs() -> u64 {
    300
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

fn default_source_timeout_ms() -> u64 {
    2_000
}

fn default_execution_timeout_ms() -> u64 {
    30_000
}

fn default_reward_points() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            max_concurrent_probes: default_max_concurrent_probes(),
            auto_remove: true,
            record_retention_secs: default_record_retention_secs(),
        }
    }
}

impl HealthSettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn record_retention(&self) -> Duration {
        Duration::from_secs(self.record_retention_secs)
    }
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            default_strategy: default_strategy(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
        }
    }
}

impl DiscoverySettings {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_execution_timeout_ms(),
        }
    }
}

impl ExecutionSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            reward_points: default_reward_points(),
            quality_weighted_rewards: true,
            issue_certificates: false,
            delegation_ttl_secs: None,
        }
    }
}

impl ServiceLayerConfig {
    /// Reject values the components cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.health.failure_threshold == 0 {
            return Err(AgentError::invalid_setting("health.failure_threshold", "must be at least 1"));
        }
        if self.health.max_concurrent_probes == 0 {
            return Err(AgentError::invalid_setting("health.max_concurrent_probes", "must be at least 1"));
        }
        if self.health.probe_interval_secs == 0 {
            return Err(AgentError::invalid_setting("health.probe_interval_secs", "must be at least 1"));
        }
        if self.health.probe_timeout_ms == 0 {
            return Err(AgentError::invalid_setting("health.probe_timeout_ms", "must be at least 1"));
        }
        if self.routing.default_strategy.trim().is_empty() {
            return Err(AgentError::invalid_setting("routing.default_strategy", "must not be empty"));
        }
        if self.execution.default_timeout_ms == 0 {
            return Err(AgentError::invalid_setting("execution.default_timeout_ms", "must be at least 1"));
        }
        if let Some(ttl) = self.tasks.delegation_ttl_secs {
            if ttl > MAX_DELEGATION_TTL_SECS {
                return Err(AgentError::invalid_setting(
                    "tasks.delegation_ttl_secs",
                    format!("must be at most {}", MAX_DELEGATION_TTL_SECS),
                ));
            }
        }
        Ok(())
    }
}

/// Load configuration from a file
///
/// Supports TOML, JSON, and YAML formats based on file extension.
///
/// # Example
///
/// ```no_run
/// use agent_core::config::load_config;
///
/// let config = load_config("service-layer.toml").unwrap();
/// println!("Failure threshold: {}", config.health.failure_threshold);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServiceLayerConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(AgentError::MissingConfig(path.to_path_buf()));
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("AGENT").separator("__"))
        .build()?;

    let config: ServiceLayerConfig = settings.try_deserialize()?;
    config.validate()?;

    tracing::info!("Configuration loaded from {}", path.display());

    Ok(config)
}

/// Load configuration with defaults if the file doesn't exist or is invalid
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> ServiceLayerConfig {
    match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            ServiceLayerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceLayerConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.health.probe_interval(), Duration::from_secs(30));
        assert_eq!(config.health.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.routing.default_strategy, "round_robin");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "health": { "failure_threshold": 5 },
            "routing": { "default_strategy": "least_busy" }
        }"#;

        let config: ServiceLayerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.health.probe_interval_secs, 30);
        assert!(config.health.auto_remove);
        assert_eq!(config.routing.default_strategy, "least_busy");
        assert_eq!(config.tasks.reward_points, 10);
        assert!(config.tasks.delegation_ttl_secs.is_none());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = ServiceLayerConfig::default();
        config.health.failure_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            AgentError::InvalidSetting {
                key: "health.failure_threshold",
                ..
            }
        ));
    }

    #[test]
    fn test_oversized_delegation_ttl_rejected() {
        let mut config = ServiceLayerConfig::default();
        config.tasks.delegation_ttl_secs = Some(MAX_DELEGATION_TTL_SECS);
        assert!(config.validate().is_ok());

        config.tasks.delegation_ttl_secs = Some(u64::MAX / 2);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            AgentError::InvalidSetting {
                key: "tasks.delegation_ttl_secs",
                ..
            }
        ));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_config("nonexistent.toml");
        assert!(matches!(result, Err(AgentError::MissingConfig(_))));
    }

    #[test]
    fn test_load_or_default() {
        let config = load_config_or_default("nonexistent.toml");
        assert_eq!(config.execution.default_timeout(), Duration::from_secs(30));
    }
}
