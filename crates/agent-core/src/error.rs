//! Startup errors
//!
//! Failures that happen before any protocol traffic exists: locating,
//! parsing and validating configuration.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("config file not found: {}", .0.display())]
    MissingConfig(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    pub fn invalid_setting<S: Into<String>>(key: &'static str, reason: S) -> Self {
        Self::InvalidSetting {
            key,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_setting_names_key() {
        let err = AgentError::invalid_setting("health.failure_threshold", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid setting health.failure_threshold: must be at least 1"
        );
    }

    #[test]
    fn test_missing_config_shows_path() {
        let err = AgentError::MissingConfig(PathBuf::from("/etc/service-layer.toml"));
        assert!(err.to_string().contains("/etc/service-layer.toml"));
    }
}
