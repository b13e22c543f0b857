//! Agent Core
//!
//! This crate provides the shared foundation for the service layer crates:
//! error handling, configuration, and logging setup.

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{
    load_config, load_config_or_default, DiscoverySettings, ExecutionSettings, HealthSettings,
    LoggingConfig, RoutingSettings, ServiceLayerConfig, TaskSettings,
};
pub use error::{AgentError, Result};
pub use logging::init_logging;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_functionality() {
        let config = ServiceLayerConfig::default();
        assert_eq!(config.health.failure_threshold, 3);
    }
}
