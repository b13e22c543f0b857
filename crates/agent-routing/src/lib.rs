//! Agent Service Routing
//!
//! Chooses one healthy service for a capability using a pluggable strategy,
//! and counts in-flight requests per service.
//!
//! # Example
//!
//! ```no_run
//! use agent_core::HealthSettings;
//! use agent_health::{AlwaysHealthy, HealthMonitor};
//! use agent_registry::{ServiceCatalog, ServiceDescriptor};
//! use agent_routing::{RoutingStrategy, ServiceRouter};
//! use std::sync::Arc;
//!
//! let catalog = ServiceCatalog::new();
//! let health = Arc::new(HealthMonitor::new(catalog.clone(), Arc::new(AlwaysHealthy), HealthSettings::default()));
//! let router = ServiceRouter::new(catalog, health);
//!
//! router.register(ServiceDescriptor::new("agent-1", vec!["search"], "http://localhost:9000"));
//! let service = router.route("search", Some(RoutingStrategy::LeastBusy)).unwrap();
//! let _guard = router.acquire(&service.service_id);
//! ```

pub mod strategy;
pub mod load;
pub mod stats;
pub mod router;

// Re-exports
pub use strategy::RoutingStrategy;
pub use load::{LoadGuard, LoadTracker};
pub use stats::{CapabilityStats, RoutingStats};
pub use router::ServiceRouter;
