//! Capability records and the registry that owns them

use agent_comms::{ProtocolError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Availability an agent reports for itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    #[default]
    Available,
    Busy,
    Offline,
    Maintenance,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentStatus::Available => "Available",
            AgentStatus::Busy => "Busy",
            AgentStatus::Offline => "Offline",
            AgentStatus::Maintenance => "Maintenance",
        };
        f.write_str(name)
    }
}

impl FromStr for AgentStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Ok(AgentStatus::Available),
            "busy" => Ok(AgentStatus::Busy),
            "offline" => Ok(AgentStatus::Offline),
            "maintenance" => Ok(AgentStatus::Maintenance),
            other => Err(ProtocolError::invalid_params(format!("unknown agent status '{}'", other))),
        }
    }
}

fn default_max_concurrent_tasks() -> u32 {
    1
}

/// What an agent declares it can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    /// Set from the registration key
    #[serde(default)]
    pub agent_id: String,

    /// Capability names, in declaration order
    pub services: Vec<String>,

    #[serde(default)]
    pub skills: Vec<String>,

    #[serde(default)]
    pub status: AgentStatus,

    #[serde(default)]
    pub reputation_score: f64,

    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,

    #[serde(default)]
    pub active_tasks: u32,

    #[serde(default)]
    pub description: String,

    /// Unstructured extension data such as pricing
    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CapabilityRecord {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agent_id: String::new(),
            services: services.into_iter().map(Into::into).collect(),
            skills: Vec::new(),
            status: AgentStatus::Available,
            reputation_score: 0.0,
            max_concurrent_tasks: default_max_concurrent_tasks(),
            active_tasks: 0,
            description: String::new(),
            metadata: Map::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_reputation(mut self, score: f64) -> Self {
        self.reputation_score = score;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn provides(&self, capability: &str) -> bool {
        self.services.iter().any(|s| s == capability)
    }

    pub fn has_capacity(&self) -> bool {
        self.active_tasks < self.max_concurrent_tasks
    }
}

/// System of record for agent capabilities
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    records: Arc<DashMap<String, CapabilityRecord>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an agent's record
    pub fn register_capabilities(&self, agent_id: &str, mut record: CapabilityRecord) -> Result<CapabilityRecord> {
        if agent_id.trim().is_empty() {
            return Err(ProtocolError::invalid_params("agent id must not be empty"));
        }

        record.services.retain(|s| !s.trim().is_empty());
        dedup_in_order(&mut record.services);
        dedup_in_order(&mut record.skills);
        if record.services.is_empty() {
            return Err(ProtocolError::invalid_params(format!(
                "agent {} must declare at least one capability",
                agent_id
            )));
        }

        record.agent_id = agent_id.to_string();
        record.updated_at = Utc::now();
        self.records.insert(agent_id.to_string(), record.clone());

        tracing::debug!("Registered capabilities for {}: {:?}", agent_id, record.services);
        Ok(record)
    }

    pub fn get_capabilities(&self, agent_id: &str) -> Result<CapabilityRecord> {
        self.records
            .get(agent_id)
            .map(|r| r.clone())
            .ok_or_else(|| ProtocolError::AgentNotFound(agent_id.to_string()))
    }

    pub fn update_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        self.with_record(agent_id, |record| record.status = status)
    }

    pub fn set_reputation(&self, agent_id: &str, score: f64) -> Result<()> {
        self.with_record(agent_id, |record| record.reputation_score = score)
    }

    /// Apply a signed change to the agent's active task count
    pub fn adjust_active_tasks(&self, agent_id: &str, delta: i64) -> Result<u32> {
        let mut updated = 0;
        self.with_record(agent_id, |record| {
            let next = (record.active_tasks as i64 + delta).max(0);
            record.active_tasks = u32::try_from(next).unwrap_or(u32::MAX);
            updated = record.active_tasks;
        })?;
        Ok(updated)
    }

    pub fn unregister(&self, agent_id: &str) -> Option<CapabilityRecord> {
        let removed = self.records.remove(agent_id).map(|(_, record)| record);
        if removed.is_some() {
            tracing::debug!("Unregistered capabilities for {}", agent_id);
        }
        removed
    }

    /// Records whose capability list contains `capability`
    pub fn find_by_capability(&self, capability: &str) -> Vec<CapabilityRecord> {
        self.records
            .iter()
            .filter(|entry| entry.provides(capability))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn list_agents(&self) -> Vec<String> {
        self.records.iter().map(|e| e.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    fn with_record<F: FnOnce(&mut CapabilityRecord)>(&self, agent_id: &str, f: F) -> Result<()> {
        let mut record = self
            .records
            .get_mut(agent_id)
            .ok_or_else(|| ProtocolError::AgentNotFound(agent_id.to_string()))?;
        f(&mut record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}
