//! Service descriptors, the unit of routing and discovery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{AgentStatus, CapabilityRecord};

/// Lifecycle status of a registered service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[default]
    Available,
    Busy,
    Offline,
    Maintenance,
    Unhealthy,
}

impl ServiceStatus {
    /// Only available and busy services may receive work
    pub fn is_routable(self) -> bool {
        matches!(self, ServiceStatus::Available | ServiceStatus::Busy)
    }
}

impl From<AgentStatus> for ServiceStatus {
    fn from(status: AgentStatus) -> Self {
        match status {
            AgentStatus::Available => ServiceStatus::Available,
            AgentStatus::Busy => ServiceStatus::Busy,
            AgentStatus::Offline => ServiceStatus::Offline,
            AgentStatus::Maintenance => ServiceStatus::Maintenance,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStatus::Available => "Available",
            ServiceStatus::Busy => "Busy",
            ServiceStatus::Offline => "Offline",
            ServiceStatus::Maintenance => "Maintenance",
            ServiceStatus::Unhealthy => "Unhealthy",
        };
        f.write_str(name)
    }
}

fn default_protocol() -> String {
    "a2a".to_string()
}

/// A routable service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Stable id, derived from the agent id
    pub service_id: String,

    pub agent_id: String,

    pub name: String,

    pub capabilities: Vec<String>,

    /// Connection reference, e.g. a URL
    pub endpoint: String,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default)]
    pub status: ServiceStatus,

    /// Higher weight wins under the priority strategy
    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub reputation: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,

    pub registered_at: DateTime<Utc>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ServiceDescriptor {
    /// Service id used for an agent's descriptor
    pub fn service_id_for(agent_id: &str) -> String {
        format!("svc-{}", agent_id)
    }

    pub fn new<S: Into<String>>(agent_id: &str, capabilities: Vec<S>, endpoint: impl Into<String>) -> Self {
        Self {
            service_id: Self::service_id_for(agent_id),
            agent_id: agent_id.to_string(),
            name: agent_id.to_string(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            endpoint: endpoint.into(),
            protocol: default_protocol(),
            status: ServiceStatus::Available,
            priority: 0,
            reputation: 0.0,
            last_health_check: None,
            registered_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Derive a descriptor from a capability record plus connection data
    ///
    /// A numeric `priority` metadata entry becomes the typed priority weight.
    pub fn from_record(record: &CapabilityRecord, endpoint: impl Into<String>) -> Self {
        let mut descriptor = Self::new(&record.agent_id, record.services.clone(), endpoint);
        descriptor.status = record.status.into();
        descriptor.reputation = record.reputation_score;
        descriptor.metadata = record.metadata.clone();
        if !record.description.is_empty() {
            descriptor
                .metadata
                .insert("description".to_string(), Value::String(record.description.clone()));
        }
        if let Some(priority) = record.metadata.get("priority").and_then(Value::as_i64) {
            descriptor.priority = priority;
        }
        descriptor
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reputation(mut self, reputation: f64) -> Self {
        self.reputation = reputation;
        self
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn provides(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn is_routable(&self) -> bool {
        self.status.is_routable()
    }

    /// When this descriptor was last known to be current
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.last_health_check.unwrap_or(self.registered_at)
    }
}
