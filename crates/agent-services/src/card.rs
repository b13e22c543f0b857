//! Public agent card

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use agent_health::{HealthRecord, HealthState};
use agent_registry::{AgentStatus, CapabilityRecord, ServiceDescriptor};

/// Identity, capabilities and connection data of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub status: AgentStatus,
    pub reputation: f64,
    pub max_concurrent_tasks: u32,
    pub active_tasks: u32,

    /// Present once the agent's service has been registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,

    /// Extension data such as pricing
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentCard {
    pub fn new(
        record: &CapabilityRecord,
        service: Option<&ServiceDescriptor>,
        health: Option<&HealthRecord>,
    ) -> Self {
        let mut metadata = record.metadata.clone();
        if let Some(service) = service {
            for (key, value) in &service.metadata {
                metadata.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        Self {
            agent_id: record.agent_id.clone(),
            name: service
                .map(|s| s.name.clone())
                .unwrap_or_else(|| record.agent_id.clone()),
            description: record.description.clone(),
            capabilities: record.services.clone(),
            skills: record.skills.clone(),
            status: record.status,
            reputation: record.reputation_score,
            max_concurrent_tasks: record.max_concurrent_tasks,
            active_tasks: record.active_tasks,
            service_id: service.map(|s| s.service_id.clone()),
            endpoint: service.map(|s| s.endpoint.clone()),
            protocol: service.map(|s| s.protocol.clone()),
            health: health.map(|h| h.state),
            last_health_check: service.and_then(|s| s.last_health_check),
            metadata,
        }
    }

    /// Pricing advertised in metadata, if any
    pub fn pricing(&self) -> Option<&Value> {
        self.metadata.get("pricing")
    }
}
