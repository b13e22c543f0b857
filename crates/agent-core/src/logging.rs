//! Structured logging setup
//!
//! Components log through `tracing`; the binary embedding the service layer
//! installs a subscriber once from the `[logging]` section.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Dependencies that are chatty at debug level
const QUIET_TARGETS: &[&str] = &["hyper=warn", "reqwest=warn", "h2=warn"];

/// Filter for `level`, or `RUST_LOG` when it is set
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![level.to_string()];
        directives.extend(QUIET_TARGETS.iter().map(|t| t.to_string()));
        EnvFilter::new(directives.join(","))
    })
}

/// Install the global subscriber
///
/// Returns false if one was already installed; the existing one stays.
///
/// # Example
///
/// ```
/// use agent_core::{init_logging, LoggingConfig};
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     json: false,
/// };
/// init_logging(&config);
/// ```
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = env_filter(&config.level);

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(true))
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(level = %config.level, json = config.json, "Logging initialized");
    }
    installed
}
