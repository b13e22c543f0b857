//! Agent Capability Registry
//!
//! Holds what agents declare they can do, the routable service catalog
//! derived from those declarations, and the discovery index that ranks
//! candidates for a capability.

pub mod record;
pub mod descriptor;
pub mod catalog;
pub mod discovery;

// Re-exports
pub use record::{AgentStatus, CapabilityRecord, CapabilityRegistry};
pub use descriptor::{ServiceDescriptor, ServiceStatus};
pub use catalog::ServiceCatalog;
pub use discovery::{
    DiscoveryIndex, DiscoveryResult, DiscoverySource, LoadView, NoLoad, NoopDiscoverySource,
};
