//! Capability discovery across the local catalog and external sources

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agent_comms::{ProtocolError, Result};

use crate::{CapabilityRegistry, ServiceCatalog, ServiceDescriptor, ServiceStatus};

/// An external directory of services
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &str;

    /// Services offering a capability
    async fn discover(&self, capability: &str) -> Result<Vec<ServiceDescriptor>>;

    /// Every service the source knows about
    async fn discover_all(&self) -> Result<Vec<ServiceDescriptor>>;
}

/// Source that never has anything to report
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiscoverySource;

#[async_trait]
impl DiscoverySource for NoopDiscoverySource {
    fn name(&self) -> &str {
        "noop"
    }

    async fn discover(&self, _capability: &str) -> Result<Vec<ServiceDescriptor>> {
        Ok(Vec::new())
    }

    async fn discover_all(&self) -> Result<Vec<ServiceDescriptor>> {
        Ok(Vec::new())
    }
}

/// Read access to in-flight work per service
pub trait LoadView: Send + Sync {
    fn active_load(&self, service_id: &str) -> usize;
}

/// Load view that reports every service idle
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoad;

impl LoadView for NoLoad {
    fn active_load(&self, _service_id: &str) -> usize {
        0
    }
}

/// Ranked discovery output
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryResult {
    pub services: Vec<ServiceDescriptor>,
    /// External sources that failed or timed out
    pub unreachable_sources: usize,
    pub warnings: Vec<String>,
}

impl DiscoveryResult {
    pub fn is_partial(&self) -> bool {
        self.unreachable_sources > 0
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.services.iter().map(|s| s.service_id.clone()).collect()
    }
}

enum Query<'a> {
    Capability(&'a str),
    All,
}

/// Answers "who can do X" over the catalog plus external sources
pub struct DiscoveryIndex {
    catalog: ServiceCatalog,
    registry: CapabilityRegistry,
    sources: Vec<Arc<dyn DiscoverySource>>,
    load: Arc<dyn LoadView>,
    source_timeout: Duration,
}

impl DiscoveryIndex {
    pub fn new(catalog: ServiceCatalog, registry: CapabilityRegistry) -> Self {
        Self {
            catalog,
            registry,
            sources: Vec::new(),
            load: Arc::new(NoLoad),
            source_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn DiscoverySource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_sources(mut self, sources: Vec<Arc<dyn DiscoverySource>>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn with_load_view(mut self, load: Arc<dyn LoadView>) -> Self {
        self.load = load;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Routable services offering `capability`, best candidates first
    pub async fn discover_by_capability(&self, capability: &str) -> Result<DiscoveryResult> {
        if capability.trim().is_empty() {
            return Err(ProtocolError::invalid_params("capability must not be empty"));
        }
        let local = self.catalog.for_capability(capability);
        let mut result = self.collect(local, Query::Capability(capability)).await;
        result.services.retain(|s| s.provides(capability));
        tracing::debug!(
            "Discovered {} service(s) for '{}'",
            result.services.len(),
            capability
        );
        Ok(result)
    }

    /// Every routable service
    pub async fn discover_all(&self) -> Result<DiscoveryResult> {
        Ok(self.collect(self.catalog.all(), Query::All).await)
    }

    /// Routable services providing every listed capability
    pub async fn discover_matching(&self, capabilities: &[String]) -> Result<DiscoveryResult> {
        match capabilities {
            [] => Err(ProtocolError::invalid_params("at least one capability is required")),
            [single] => self.discover_by_capability(single).await,
            [first, rest @ ..] => {
                let mut result = self.discover_by_capability(first).await?;
                result
                    .services
                    .retain(|s| rest.iter().all(|capability| s.provides(capability)));
                Ok(result)
            }
        }
    }

    /// Combined in-flight and self-reported load for a service
    pub fn active_load(&self, descriptor: &ServiceDescriptor) -> usize {
        let reported = self
            .registry
            .get_capabilities(&descriptor.agent_id)
            .map(|record| record.active_tasks as usize)
            .unwrap_or(0);
        self.load.active_load(&descriptor.service_id) + reported
    }

    /// Take reputation and availability from the agent's current record
    ///
    /// Descriptors without a registered agent keep their own values.
    fn with_live_record(&self, mut descriptor: ServiceDescriptor) -> Option<ServiceDescriptor> {
        if let Ok(record) = self.registry.get_capabilities(&descriptor.agent_id) {
            if !ServiceStatus::from(record.status).is_routable() {
                return None;
            }
            descriptor.reputation = record.reputation_score;
        }
        Some(descriptor)
    }

    async fn collect(&self, local: Vec<ServiceDescriptor>, query: Query<'_>) -> DiscoveryResult {
        let mut merged: HashMap<String, ServiceDescriptor> = HashMap::new();
        for descriptor in local {
            merge_newest(&mut merged, descriptor);
        }

        let mut result = DiscoveryResult::default();
        let query = &query;
        let calls = self.sources.iter().map(move |source| {
            async move {
                let call = async {
                    match query {
                        Query::Capability(capability) => source.discover(capability).await,
                        Query::All => source.discover_all().await,
                    }
                };
                let outcome = match tokio::time::timeout(self.source_timeout, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProtocolError::Timeout(self.source_timeout)),
                };
                (source.name().to_string(), outcome)
            }
        });

        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(found) => {
                    for descriptor in found {
                        merge_newest(&mut merged, descriptor);
                    }
                }
                Err(e) => {
                    tracing::warn!("Discovery source {} unavailable: {}", name, e);
                    result.unreachable_sources += 1;
                    result.warnings.push(format!("{}: {}", name, e));
                }
            }
        }

        let mut services: Vec<(ServiceDescriptor, usize)> = merged
            .into_values()
            .filter_map(|s| self.with_live_record(s))
            .filter(|s| s.is_routable())
            .map(|s| {
                let load = self.active_load(&s);
                (s, load)
            })
            .collect();

        services.sort_by(|(a, load_a), (b, load_b)| {
            b.reputation
                .total_cmp(&a.reputation)
                .then(load_a.cmp(load_b))
                .then_with(|| a.service_id.cmp(&b.service_id))
        });

        result.services = services.into_iter().map(|(s, _)| s).collect();
        result
    }
}

fn merge_newest(merged: &mut HashMap<String, ServiceDescriptor>, descriptor: ServiceDescriptor) {
    match merged.get(&descriptor.service_id) {
        Some(existing) if existing.observed_at() >= descriptor.observed_at() => {}
        _ => {
            merged.insert(descriptor.service_id.clone(), descriptor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CapabilityRecord, ServiceStatus};
    use dashmap::DashMap;

    struct StaticLoad(DashMap<String, usize>);

    impl LoadView for StaticLoad {
        fn active_load(&self, service_id: &str) -> usize {
            self.0.get(service_id).map(|v| *v).unwrap_or(0)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl DiscoverySource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn discover(&self, _capability: &str) -> Result<Vec<ServiceDescriptor>> {
            Err(ProtocolError::internal("directory offline"))
        }

        async fn discover_all(&self) -> Result<Vec<ServiceDescriptor>> {
            Err(ProtocolError::internal("directory offline"))
        }
    }

    struct SlowSource;

    #[async_trait]
    impl DiscoverySource for SlowSource {
        fn name(&self) -> &str {
            "slow"
        }

        async fn discover(&self, _capability: &str) -> Result<Vec<ServiceDescriptor>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn discover_all(&self) -> Result<Vec<ServiceDescriptor>> {
            self.discover("").await
        }
    }

    struct FixedSource(Vec<ServiceDescriptor>);

    #[async_trait]
    impl DiscoverySource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn discover(&self, capability: &str) -> Result<Vec<ServiceDescriptor>> {
            Ok(self.0.iter().filter(|d| d.provides(capability)).cloned().collect())
        }

        async fn discover_all(&self) -> Result<Vec<ServiceDescriptor>> {
            Ok(self.0.clone())
        }
    }

    fn catalog_with(entries: &[(&str, &[&str], f64)]) -> ServiceCatalog {
        let catalog = ServiceCatalog::new();
        for (agent, caps, reputation) in entries {
            catalog.upsert(
                ServiceDescriptor::new(agent, caps.to_vec(), format!("mem://{}", agent))
                    .with_reputation(*reputation),
            );
        }
        catalog
    }

    #[tokio::test]
    async fn test_ranked_by_reputation_then_load() {
        let catalog = catalog_with(&[
            ("low", &["search"], 1.0),
            ("busy", &["search"], 4.0),
            ("idle", &["search"], 4.0),
        ]);
        let load = DashMap::new();
        load.insert("svc-busy".to_string(), 3);

        let index = DiscoveryIndex::new(catalog, CapabilityRegistry::new())
            .with_load_view(Arc::new(StaticLoad(load)));

        let result = index.discover_by_capability("search").await.unwrap();
        assert_eq!(result.service_ids(), vec!["svc-idle", "svc-busy", "svc-low"]);
        assert!(!result.is_partial());
    }

    #[tokio::test]
    async fn test_registry_active_tasks_count_as_load() {
        let catalog = catalog_with(&[("a", &["search"], 2.0), ("b", &["search"], 2.0)]);
        let registry = CapabilityRegistry::new();
        registry.register_capabilities("a", CapabilityRecord::new(["search"])).unwrap();
        registry.adjust_active_tasks("a", 2).unwrap();

        let index = DiscoveryIndex::new(catalog, registry);
        let result = index.discover_by_capability("search").await.unwrap();
        assert_eq!(result.service_ids(), vec!["svc-b", "svc-a"]);
    }

    #[tokio::test]
    async fn test_unroutable_excluded() {
        let catalog = catalog_with(&[("a", &["search"], 1.0), ("b", &["search"], 1.0)]);
        catalog.set_status("svc-a", ServiceStatus::Unhealthy).unwrap();

        let index = DiscoveryIndex::new(catalog, CapabilityRegistry::new());
        let result = index.discover_by_capability("search").await.unwrap();
        assert_eq!(result.service_ids(), vec!["svc-b"]);

        let all = index.discover_all().await.unwrap();
        assert_eq!(all.services.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_and_slow_sources_reported() {
        let catalog = catalog_with(&[("a", &["search"], 1.0)]);
        let index = DiscoveryIndex::new(catalog, CapabilityRegistry::new())
            .with_source(Arc::new(FailingSource))
            .with_source(Arc::new(SlowSource))
            .with_source_timeout(Duration::from_millis(50));

        let result = index.discover_by_capability("search").await.unwrap();
        assert_eq!(result.service_ids(), vec!["svc-a"]);
        assert_eq!(result.unreachable_sources, 2);
        assert_eq!(result.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_keeps_most_recent_observation() {
        let catalog = catalog_with(&[("a", &["search"], 1.0)]);
        let mut fresher = ServiceDescriptor::new("a", vec!["search"], "http://elsewhere").with_reputation(5.0);
        fresher.last_health_check = Some(chrono::Utc::now() + chrono::Duration::seconds(60));
        let remote = ServiceDescriptor::new("remote", vec!["search"], "http://remote");

        let index = DiscoveryIndex::new(catalog, CapabilityRegistry::new())
            .with_source(Arc::new(FixedSource(vec![fresher, remote])));

        let result = index.discover_by_capability("search").await.unwrap();
        assert_eq!(result.services.len(), 2);
        assert_eq!(result.services[0].service_id, "svc-a");
        assert_eq!(result.services[0].endpoint, "http://elsewhere");
    }

    #[tokio::test]
    async fn test_discover_matching_requires_all() {
        let catalog = catalog_with(&[
            ("a", &["search", "summarize"], 1.0),
            ("b", &["search"], 3.0),
        ]);
        let index = DiscoveryIndex::new(catalog, CapabilityRegistry::new());

        let both = vec!["search".to_string(), "summarize".to_string()];
        let result = index.discover_matching(&both).await.unwrap();
        assert_eq!(result.service_ids(), vec!["svc-a"]);

        assert!(index.discover_matching(&[]).await.is_err());
        assert!(index
            .discover_by_capability("translate")
            .await
            .unwrap()
            .services
            .is_empty());
    }
}
