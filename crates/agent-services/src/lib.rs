//! Agent Service Layer
//!
//! A single facade over capability registration, discovery, health-aware
//! routing and task coordination, plus a protocol endpoint in front of it.
//!
//! # Example
//!
//! ```no_run
//! use agent_comms::InMemoryIdentity;
//! use agent_core::ServiceLayerConfig;
//! use agent_registry::CapabilityRecord;
//! use agent_services::UnifiedServiceManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> agent_comms::Result<()> {
//!     let identity = InMemoryIdentity::new();
//!     identity.add_agent("alpha", "token-alpha");
//!
//!     let manager = UnifiedServiceManager::builder(ServiceLayerConfig::default(), Arc::new(identity)).build()?;
//!     manager.register_agent("alpha", CapabilityRecord::new(["data-analysis"]), "http://localhost:9000")?;
//!     manager.start().await;
//!
//!     let found = manager.discover_services("data-analysis").await?;
//!     println!("{} candidate(s)", found.services.len());
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod invoker;
pub mod card;
pub mod query;
pub mod manager;
pub mod protocol;

// Re-exports
pub use invoker::{LocalInvoker, NoInvoker, ServiceHandler, ServiceInvoker};
pub use card::AgentCard;
pub use query::DiscoveryQuery;
pub use manager::{Housekeeping, ServiceLayerBuilder, ServiceResponse, UnifiedServiceManager};
pub use protocol::{ProtocolHandler, METHODS};
