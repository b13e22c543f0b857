//! Health monitor: probe cycles, failure accounting and removal

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use moka::sync::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use agent_core::HealthSettings;
use agent_registry::{ServiceCatalog, ServiceDescriptor, ServiceStatus};

use crate::{HealthEvent, HealthEvents, HealthProbe, HealthRecord, HealthState};

/// Handle to a running probe loop
pub struct MonitorHandle {
    task_handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop probing
    pub fn stop(self) {
        self.task_handle.abort();
        tracing::info!("Stopped health monitor");
    }

    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }
}

/// Outcome of one probe cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub checked: usize,
    pub healthy: usize,
    pub failed: usize,
}

/// Tracks service health and drives catalog status from it
pub struct HealthMonitor {
    catalog: ServiceCatalog,
    probe: Arc<dyn HealthProbe>,
    settings: HealthSettings,
    records: DashMap<String, HealthRecord>,
    /// Records of removed services, kept until the retention period lapses
    retained: Cache<String, HealthRecord>,
    events: HealthEvents,
}

impl HealthMonitor {
    pub fn new(catalog: ServiceCatalog, probe: Arc<dyn HealthProbe>, settings: HealthSettings) -> Self {
        let retained = Cache::builder()
            .time_to_live(settings.record_retention())
            .max_capacity(10_000)
            .build();

        Self {
            catalog,
            probe,
            settings,
            records: DashMap::new(),
            retained,
            events: HealthEvents::default(),
        }
    }

    pub fn with_events(mut self, events: HealthEvents) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Start tracking a service; re-tracking keeps its history
    pub fn track(&self, descriptor: &ServiceDescriptor) {
        self.retained.invalidate(&descriptor.service_id);
        self.records
            .entry(descriptor.service_id.clone())
            .and_modify(|record| record.status = descriptor.status)
            .or_insert_with(|| HealthRecord::new(&descriptor.service_id, descriptor.status));
        tracing::debug!("Tracking health of {}", descriptor.service_id);
    }

    /// Stop tracking without emitting events
    pub fn untrack(&self, service_id: &str) -> Option<HealthRecord> {
        self.retained.invalidate(service_id);
        self.records.remove(service_id).map(|(_, record)| record)
    }

    /// Mirror a status set by an operator
    pub fn sync_status(&self, service_id: &str, status: ServiceStatus) {
        if let Some(mut record) = self.records.get_mut(service_id) {
            record.status = status;
        }
    }

    /// Apply a successful check; returns the new state if the service is tracked
    pub fn record_success(&self, service_id: &str, latency: Duration) -> Option<HealthState> {
        let now = Utc::now();
        let recovered = {
            let mut record = self.records.get_mut(service_id)?;
            let recovered = record.state == HealthState::Unhealthy;
            record.total_checks += 1;
            record.consecutive_failures = 0;
            record.last_latency = Some(latency);
            record.last_check = Some(now);
            record.last_error = None;
            record.state = HealthState::Healthy;
            if recovered && record.status == ServiceStatus::Unhealthy {
                record.status = ServiceStatus::Available;
            }
            recovered
        };

        self.catalog.touch_health_check(service_id, now);
        if recovered {
            if self
                .catalog
                .get(service_id)
                .is_some_and(|d| d.status == ServiceStatus::Unhealthy)
            {
                let _ = self.catalog.set_status(service_id, ServiceStatus::Available);
            }
            tracing::info!("Service {} recovered", service_id);
            self.events.emit(HealthEvent::ServiceRecovered {
                service_id: service_id.to_string(),
                timestamp: now,
            });
        }
        Some(HealthState::Healthy)
    }

    /// Apply a failed check; returns the new state if the service is tracked
    pub fn record_failure(&self, service_id: &str, error: impl Into<String>) -> Option<HealthState> {
        let error = error.into();
        let now = Utc::now();
        let threshold = self.settings.failure_threshold;

        let (state, failures, crossed) = {
            let mut record = self.records.get_mut(service_id)?;
            record.total_checks += 1;
            record.total_failures += 1;
            record.consecutive_failures += 1;
            record.last_check = Some(now);
            record.last_error = Some(error.clone());

            let crossed =
                record.consecutive_failures >= threshold && record.state != HealthState::Unhealthy;
            if crossed {
                record.state = HealthState::Unhealthy;
                record.status = ServiceStatus::Unhealthy;
            } else if record.state == HealthState::Healthy {
                record.state = HealthState::Degraded;
            }
            (record.state, record.consecutive_failures, crossed)
        };

        tracing::debug!(
            "Health check of {} failed ({}/{}): {}",
            service_id,
            failures,
            threshold,
            error
        );
        self.catalog.touch_health_check(service_id, now);

        if !crossed {
            return Some(state);
        }

        if let Err(e) = self.catalog.set_status(service_id, ServiceStatus::Unhealthy) {
            tracing::debug!("Unhealthy service {} not in catalog: {}", service_id, e);
        }
        tracing::warn!(
            "Service {} marked unhealthy after {} consecutive failures",
            service_id,
            failures
        );
        self.events.emit(HealthEvent::ServiceBecameUnhealthy {
            service_id: service_id.to_string(),
            consecutive_failures: failures,
            last_error: Some(error),
            timestamp: now,
        });

        if self.settings.auto_remove {
            self.remove(service_id);
            return Some(HealthState::Removed);
        }
        Some(state)
    }

    /// Drop a service from the catalog, retaining its record for a while
    pub fn remove(&self, service_id: &str) -> Option<HealthRecord> {
        let (_, mut record) = self.records.remove(service_id)?;
        record.state = HealthState::Removed;
        self.catalog.remove(service_id);
        self.retained.insert(service_id.to_string(), record.clone());

        tracing::info!("Removed unhealthy service {}", service_id);
        self.events.emit(HealthEvent::ServiceRemoved {
            service_id: service_id.to_string(),
            timestamp: Utc::now(),
        });
        Some(record)
    }

    /// Run one probe cycle over every tracked service
    pub async fn probe_all(&self) -> ProbeSummary {
        let ids: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        let targets: Vec<ServiceDescriptor> =
            ids.iter().filter_map(|id| self.catalog.get(id)).collect();

        let timeout = self.settings.probe_timeout();
        let probe = &self.probe;
        let outcomes: Vec<(String, std::result::Result<Duration, String>)> = stream::iter(targets)
            .map(|service| async move {
                let started = Instant::now();
                let outcome = match tokio::time::timeout(timeout, probe.probe(&service)).await {
                    Ok(Ok(())) => Ok(started.elapsed()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("probe timed out after {:?}", timeout)),
                };
                (service.service_id, outcome)
            })
            .buffer_unordered(self.settings.max_concurrent_probes.max(1))
            .collect()
            .await;

        let mut summary = ProbeSummary {
            checked: outcomes.len(),
            ..ProbeSummary::default()
        };
        for (service_id, outcome) in outcomes {
            match outcome {
                Ok(latency) => {
                    summary.healthy += 1;
                    self.record_success(&service_id, latency);
                }
                Err(error) => {
                    summary.failed += 1;
                    self.record_failure(&service_id, error);
                }
            }
        }
        summary
    }

    /// Probe on a fixed interval until the handle is stopped
    pub fn spawn(self: &Arc<Self>) -> MonitorHandle {
        let monitor = Arc::clone(self);
        let period = self.settings.probe_interval();

        let task_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let summary = monitor.probe_all().await;
                tracing::debug!(
                    "Probe cycle: {} checked, {} healthy, {} failed ({})",
                    summary.checked,
                    summary.healthy,
                    summary.failed,
                    monitor.probe.name()
                );
            }
        });

        tracing::info!("Started health monitor (interval {:?})", period);
        MonitorHandle { task_handle }
    }

    /// Live record, or the retained record of a removed service
    pub fn get(&self, service_id: &str) -> Option<HealthRecord> {
        self.records
            .get(service_id)
            .map(|r| r.clone())
            .or_else(|| self.retained.get(service_id))
    }

    /// Every live record
    pub fn all(&self) -> Vec<HealthRecord> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    pub fn is_routable(&self, service_id: &str) -> bool {
        self.records
            .get(service_id)
            .is_some_and(|r| r.is_routable())
    }

    /// Latency of the last successful check
    pub fn latency(&self, service_id: &str) -> Option<Duration> {
        self.records.get(service_id).and_then(|r| r.last_latency)
    }

    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }
}
