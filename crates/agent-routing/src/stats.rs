//! Routing statistics

use serde::Serialize;
use std::collections::BTreeMap;

use crate::RoutingStrategy;

/// Routing counters for one capability
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapabilityStats {
    /// Services indexed under the capability
    pub candidates: usize,
    /// Candidates currently routable
    pub eligible: usize,
    pub total_routed: u64,
    pub last_strategy: Option<RoutingStrategy>,
    pub last_selected: Option<String>,
}

/// Snapshot of router state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingStats {
    pub default_strategy: RoutingStrategy,
    pub total_services: usize,
    pub capabilities: BTreeMap<String, CapabilityStats>,
}

impl RoutingStats {
    pub fn capability(&self, name: &str) -> Option<&CapabilityStats> {
        self.capabilities.get(name)
    }

    pub fn total_routed(&self) -> u64 {
        self.capabilities.values().map(|c| c.total_routed).sum()
    }
}
