//! Capability router

use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_comms::{CapabilityResolver, ProtocolError, Result};
use agent_core::RoutingSettings;
use agent_health::HealthMonitor;
use agent_registry::{LoadView, ServiceCatalog, ServiceDescriptor};

use crate::{CapabilityStats, LoadGuard, LoadTracker, RoutingStats, RoutingStrategy};

#[derive(Default)]
struct Counters {
    total_routed: u64,
    last_strategy: Option<RoutingStrategy>,
    last_selected: Option<String>,
}

/// Picks one healthy service for a capability
pub struct ServiceRouter {
    catalog: ServiceCatalog,
    health: Arc<HealthMonitor>,
    load: LoadTracker,
    /// Round-robin position per capability
    cursors: DashMap<String, AtomicUsize>,
    counters: DashMap<String, Counters>,
    default_strategy: RoutingStrategy,
}

impl ServiceRouter {
    pub fn new(catalog: ServiceCatalog, health: Arc<HealthMonitor>) -> Self {
        Self {
            catalog,
            health,
            load: LoadTracker::new(),
            cursors: DashMap::new(),
            counters: DashMap::new(),
            default_strategy: RoutingStrategy::default(),
        }
    }

    /// Build with the configured default strategy
    pub fn from_settings(
        catalog: ServiceCatalog,
        health: Arc<HealthMonitor>,
        settings: &RoutingSettings,
    ) -> Result<Self> {
        let strategy = settings.default_strategy.parse()?;
        Ok(Self::new(catalog, health).with_default_strategy(strategy))
    }

    pub fn with_default_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn default_strategy(&self) -> RoutingStrategy {
        self.default_strategy
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Index a service under each of its capabilities
    pub fn register(&self, descriptor: ServiceDescriptor) {
        tracing::debug!("Routing {} for {:?}", descriptor.service_id, descriptor.capabilities);
        self.catalog.upsert(descriptor);
    }

    /// Drop a service from every index and forget its load
    pub fn unregister(&self, service_id: &str) -> Option<ServiceDescriptor> {
        self.load.forget(service_id);
        self.catalog.remove(service_id)
    }

    /// Select a service for `capability`
    pub fn route(&self, capability: &str, strategy: Option<RoutingStrategy>) -> Result<ServiceDescriptor> {
        let strategy = strategy.unwrap_or(self.default_strategy);
        let eligible = self.eligible(capability);
        if eligible.is_empty() {
            tracing::debug!("No routable service for '{}'", capability);
            return Err(ProtocolError::ServiceNotFound(capability.to_string()));
        }

        let ordered = self.round_robin_order(capability, eligible);
        let selected = match strategy {
            RoutingStrategy::RoundRobin => ordered.into_iter().next(),
            RoutingStrategy::LeastBusy => ordered
                .into_iter()
                .min_by_key(|s| self.load.active(&s.service_id)),
            RoutingStrategy::FastestResponse => ordered.into_iter().min_by_key(|s| {
                let latency = self.health.latency(&s.service_id);
                (
                    latency.is_none(),
                    latency.unwrap_or(Duration::MAX),
                    self.load.active(&s.service_id),
                )
            }),
            RoutingStrategy::Random => ordered.choose(&mut rand::thread_rng()).cloned(),
            RoutingStrategy::Priority => ordered
                .into_iter()
                .min_by_key(|s| (Reverse(s.priority), self.load.active(&s.service_id))),
        }
        .ok_or_else(|| ProtocolError::ServiceNotFound(capability.to_string()))?;

        let mut counters = self.counters.entry(capability.to_string()).or_default();
        counters.total_routed += 1;
        counters.last_strategy = Some(strategy);
        counters.last_selected = Some(selected.service_id.clone());
        drop(counters);

        tracing::debug!(
            "Routed '{}' to {} via {}",
            capability,
            selected.service_id,
            strategy
        );
        Ok(selected)
    }

    /// Count a request against a service until the guard drops
    pub fn acquire(&self, service_id: &str) -> LoadGuard {
        self.load.acquire(service_id)
    }

    pub fn active_load(&self, service_id: &str) -> usize {
        self.load.active(service_id)
    }

    pub fn stats(&self) -> RoutingStats {
        let mut capabilities = BTreeMap::new();
        for capability in self.catalog.capabilities() {
            capabilities.insert(capability, CapabilityStats::default());
        }
        for entry in self.counters.iter() {
            capabilities.entry(entry.key().clone()).or_default();
        }

        for (capability, stats) in capabilities.iter_mut() {
            stats.candidates = self.catalog.ids_for(capability).len();
            stats.eligible = self.eligible(capability).len();
            if let Some(counters) = self.counters.get(capability) {
                stats.total_routed = counters.total_routed;
                stats.last_strategy = counters.last_strategy;
                stats.last_selected = counters.last_selected.clone();
            }
        }

        RoutingStats {
            default_strategy: self.default_strategy,
            total_services: self.catalog.len(),
            capabilities,
        }
    }

    /// Routable candidates in registration order
    fn eligible(&self, capability: &str) -> Vec<ServiceDescriptor> {
        self.catalog
            .for_capability(capability)
            .into_iter()
            .filter(|s| s.is_routable())
            .filter(|s| {
                self.health
                    .get(&s.service_id)
                    .map_or(true, |record| record.state.is_routable())
            })
            .collect()
    }

    /// Rotate candidates by the capability's cursor, advancing it
    fn round_robin_order(&self, capability: &str, mut candidates: Vec<ServiceDescriptor>) -> Vec<ServiceDescriptor> {
        let position = self
            .cursors
            .entry(capability.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        let len = candidates.len();
        candidates.rotate_left(position % len);
        candidates
    }
}

impl CapabilityResolver for ServiceRouter {
    fn resolve_capability(&self, capability: &str) -> Result<String> {
        self.route(capability, None).map(|service| service.agent_id)
    }
}

impl LoadView for ServiceRouter {
    fn active_load(&self, service_id: &str) -> usize {
        self.load.active(service_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_comms::ErrorCode;
    use agent_core::HealthSettings;
    use agent_health::AlwaysHealthy;
    use agent_registry::ServiceStatus;

    fn router_with(agents: &[&str]) -> ServiceRouter {
        let catalog = ServiceCatalog::new();
        let health = Arc::new(HealthMonitor::new(
            catalog.clone(),
            Arc::new(AlwaysHealthy),
            HealthSettings {
                auto_remove: false,
                ..HealthSettings::default()
            },
        ));
        let router = ServiceRouter::new(catalog, health.clone());
        for agent in agents {
            let descriptor = ServiceDescriptor::new(agent, vec!["compute"], format!("mem://{}", agent));
            health.track(&descriptor);
            router.register(descriptor);
        }
        router
    }

    fn pick(router: &ServiceRouter, strategy: RoutingStrategy) -> String {
        router.route("compute", Some(strategy)).unwrap().service_id
    }

    #[test]
    fn test_round_robin_cycles() {
        let router = router_with(&["a", "b", "c"]);
        let picks: Vec<String> = (0..6).map(|_| pick(&router, RoutingStrategy::RoundRobin)).collect();
        assert_eq!(picks, vec!["svc-a", "svc-b", "svc-c", "svc-a", "svc-b", "svc-c"]);
    }

    #[test]
    fn test_no_candidates() {
        let router = router_with(&["a"]);
        let err = router.route("translate", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServiceNotFound);

        router.catalog().set_status("svc-a", ServiceStatus::Offline).unwrap();
        assert!(router.route("compute", None).is_err());
    }

    #[test]
    fn test_least_busy_prefers_idle() {
        let router = router_with(&["a", "b"]);
        let _guard = router.acquire("svc-a");
        for _ in 0..4 {
            assert_eq!(pick(&router, RoutingStrategy::LeastBusy), "svc-b");
        }
    }

    #[test]
    fn test_least_busy_ties_rotate() {
        let router = router_with(&["a", "b"]);
        let first = pick(&router, RoutingStrategy::LeastBusy);
        let second = pick(&router, RoutingStrategy::LeastBusy);
        assert_ne!(first, second);
    }

    #[test]
    fn test_fastest_response_unknown_latency_last() {
        let router = router_with(&["a", "b", "c"]);
        router.health.record_success("svc-b", Duration::from_millis(40));
        router.health.record_success("svc-c", Duration::from_millis(15));

        for _ in 0..3 {
            assert_eq!(pick(&router, RoutingStrategy::FastestResponse), "svc-c");
        }
    }

    #[test]
    fn test_priority_highest_weight() {
        let router = router_with(&["a"]);
        router.register(ServiceDescriptor::new("b", vec!["compute"], "mem://b").with_priority(10));
        router.register(ServiceDescriptor::new("c", vec!["compute"], "mem://c").with_priority(5));

        for _ in 0..3 {
            assert_eq!(pick(&router, RoutingStrategy::Priority), "svc-b");
        }
    }

    #[test]
    fn test_random_only_picks_eligible() {
        let router = router_with(&["a", "b", "c"]);
        router.catalog().set_status("svc-b", ServiceStatus::Maintenance).unwrap();
        for _ in 0..20 {
            assert_ne!(pick(&router, RoutingStrategy::Random), "svc-b");
        }
    }

    #[test]
    fn test_unhealthy_excluded_immediately() {
        let router = router_with(&["a", "b"]);
        for _ in 0..3 {
            router.health.record_failure("svc-a", "down");
        }
        for _ in 0..4 {
            assert_eq!(pick(&router, RoutingStrategy::RoundRobin), "svc-b");
        }
    }

    #[test]
    fn test_unregister_removes_candidate() {
        let router = router_with(&["a", "b"]);
        let _guard = router.acquire("svc-a");
        assert!(router.unregister("svc-a").is_some());
        assert_eq!(router.active_load("svc-a"), 0);
        assert_eq!(pick(&router, RoutingStrategy::LeastBusy), "svc-b");
    }

    #[test]
    fn test_stats_track_routing() {
        let router = router_with(&["a", "b"]);
        router.catalog().set_status("svc-b", ServiceStatus::Offline).unwrap();
        pick(&router, RoutingStrategy::Priority);
        pick(&router, RoutingStrategy::Priority);

        let stats = router.stats();
        let compute = stats.capability("compute").unwrap();
        assert_eq!(compute.candidates, 2);
        assert_eq!(compute.eligible, 1);
        assert_eq!(compute.total_routed, 2);
        assert_eq!(compute.last_strategy, Some(RoutingStrategy::Priority));
        assert_eq!(compute.last_selected.as_deref(), Some("svc-a"));
        assert_eq!(stats.total_routed(), 2);
    }

    #[test]
    fn test_from_settings_validates_strategy() {
        let catalog = ServiceCatalog::new();
        let health = Arc::new(HealthMonitor::new(
            catalog.clone(),
            Arc::new(AlwaysHealthy),
            HealthSettings::default(),
        ));
        let settings = RoutingSettings {
            default_strategy: "least_busy".to_string(),
        };
        let router = ServiceRouter::from_settings(catalog.clone(), health.clone(), &settings).unwrap();
        assert_eq!(router.default_strategy(), RoutingStrategy::LeastBusy);

        let bad = RoutingSettings {
            default_strategy: "cheapest".to_string(),
        };
        assert!(ServiceRouter::from_settings(catalog, health, &bad).is_err());
    }

    #[test]
    fn test_resolves_capability_to_agent() {
        let router = router_with(&["a"]);
        assert_eq!(router.resolve_capability("compute").unwrap(), "a");
    }
}
