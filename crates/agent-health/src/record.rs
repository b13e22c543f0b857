//! Per-service health state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use agent_registry::ServiceStatus;

/// Probe-derived health of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// No outstanding failures
    #[default]
    Healthy,
    /// Failing, but still under the threshold and routable
    Degraded,
    /// Threshold reached; excluded from routing
    Unhealthy,
    /// Dropped from the catalog; the record is only retained for inspection
    Removed,
}

impl HealthState {
    pub fn is_routable(self) -> bool {
        matches!(self, HealthState::Healthy | HealthState::Degraded)
    }
}

/// Health bookkeeping for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub service_id: String,
    /// Routing status mirrored from the catalog
    pub status: ServiceStatus,
    pub state: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_latency: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub total_failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl HealthRecord {
    pub fn new(service_id: impl Into<String>, status: ServiceStatus) -> Self {
        Self {
            service_id: service_id.into(),
            status,
            state: HealthState::Healthy,
            last_latency: None,
            last_check: None,
            consecutive_failures: 0,
            total_checks: 0,
            total_failures: 0,
            last_error: None,
        }
    }

    /// Routable by both health and catalog status
    pub fn is_routable(&self) -> bool {
        self.state.is_routable() && self.status.is_routable()
    }

    /// Fraction of checks that succeeded, if any ran
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_checks == 0 {
            return None;
        }
        Some((self.total_checks - self.total_failures) as f64 / self.total_checks as f64)
    }
}
