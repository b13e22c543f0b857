//! Agent Service Health
//!
//! Probes registered services, counts consecutive failures and pulls
//! unhealthy services out of the catalog so the router stops choosing them.
//!
//! # Example
//!
//! ```no_run
//! use agent_core::HealthSettings;
//! use agent_health::{AlwaysHealthy, HealthMonitor};
//! use agent_registry::{ServiceCatalog, ServiceDescriptor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let catalog = ServiceCatalog::new();
//!     let monitor = Arc::new(HealthMonitor::new(
//!         catalog.clone(),
//!         Arc::new(AlwaysHealthy),
//!         HealthSettings::default(),
//!     ));
//!
//!     let service = ServiceDescriptor::new("agent-1", vec!["search"], "http://localhost:9000");
//!     catalog.upsert(service.clone());
//!     monitor.track(&service);
//!
//!     let handle = monitor.spawn();
//!     // ...
//!     handle.stop();
//! }
//! ```

pub mod record;
pub mod event;
pub mod probe;
pub mod monitor;

// Re-exports
pub use record::{HealthRecord, HealthState};
pub use event::{HealthEvent, HealthEvents};
pub use probe::{AlwaysHealthy, HealthProbe};
pub use monitor::{HealthMonitor, MonitorHandle, ProbeSummary};

#[cfg(feature = "http")]
pub use probe::HttpProbe;
