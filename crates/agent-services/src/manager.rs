//! Unified service manager
//!
//! One explicitly constructed facade over the registry, router, health
//! monitor, discovery index, dispatcher and task coordinator. Subsystems are
//! wired together here and nowhere else.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use agent_comms::{
    IdentityProvider, InboxStore, MessageDispatcher, MessageTransport, NoopTransport, ProtocolError, Result,
};
use agent_coordination::{
    CertificateIssuer, NoPayments, PaymentFlow, PaymentProvider, ReputationProvider,
    TaskCoordinator,
};
use agent_core::ServiceLayerConfig;
use agent_health::{
    AlwaysHealthy, HealthEvent, HealthEvents, HealthMonitor, HealthProbe, HealthRecord,
    MonitorHandle,
};
use agent_registry::{
    AgentStatus, CapabilityRecord, CapabilityRegistry, DiscoveryIndex, DiscoveryResult,
    DiscoverySource, ServiceCatalog, ServiceDescriptor, ServiceStatus,
};
use agent_routing::{RoutingStats, RoutingStrategy, ServiceRouter};

use crate::{AgentCard, DiscoveryQuery, NoInvoker, ServiceInvoker};

/// Result of a routed execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceResponse {
    pub capability: String,
    pub service_id: String,
    pub agent_id: String,
    pub result: Value,
    pub latency_ms: u64,
}

/// Collaborators and settings for a [`UnifiedServiceManager`]
pub struct ServiceLayerBuilder {
    config: ServiceLayerConfig,
    identity: Arc<dyn IdentityProvider>,
    invoker: Arc<dyn ServiceInvoker>,
    probe: Arc<dyn HealthProbe>,
    sources: Vec<Arc<dyn DiscoverySource>>,
    transport: Arc<dyn MessageTransport>,
    events: Option<HealthEvents>,
    reputation: Option<Arc<dyn ReputationProvider>>,
    certificates: Option<Arc<dyn CertificateIssuer>>,
    payments: Arc<dyn PaymentProvider>,
}

impl ServiceLayerBuilder {
    pub fn with_invoker(mut self, invoker: Arc<dyn ServiceInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Add an external discovery backend
    pub fn with_source(mut self, source: Arc<dyn DiscoverySource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_events(mut self, events: HealthEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_reputation(mut self, reputation: Arc<dyn ReputationProvider>) -> Self {
        self.reputation = Some(reputation);
        self
    }

    pub fn with_certificates(mut self, issuer: Arc<dyn CertificateIssuer>) -> Self {
        self.certificates = Some(issuer);
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentProvider>) -> Self {
        self.payments = payments;
        self
    }

    /// Validate the configuration and wire the subsystems
    pub fn build(self) -> Result<UnifiedServiceManager> {
        self.config.validate()?;

        let catalog = ServiceCatalog::new();
        let registry = CapabilityRegistry::new();

        let mut health = HealthMonitor::new(catalog.clone(), self.probe, self.config.health.clone());
        if let Some(events) = self.events {
            health = health.with_events(events);
        }
        let health = Arc::new(health);

        let router = Arc::new(ServiceRouter::from_settings(
            catalog.clone(),
            health.clone(),
            &self.config.routing,
        )?);

        let dispatcher = Arc::new(
            MessageDispatcher::new(self.identity)
                .with_resolver(router.clone())
                .with_transport(self.transport),
        );

        let discovery = DiscoveryIndex::new(catalog.clone(), registry.clone())
            .with_sources(self.sources)
            .with_load_view(router.clone())
            .with_source_timeout(self.config.discovery.source_timeout());

        let mut coordinator = TaskCoordinator::new(dispatcher.clone(), self.config.tasks.clone())
            .with_registry(registry.clone());
        if let Some(reputation) = self.reputation {
            coordinator = coordinator.with_reputation(reputation);
        }
        if let Some(issuer) = self.certificates {
            coordinator = coordinator.with_certificates(issuer);
        }

        let payments = PaymentFlow::new(dispatcher.clone(), self.payments);

        tracing::info!(
            "Service layer ready (strategy {}, failure threshold {}, {} discovery source(s))",
            router.default_strategy(),
            self.config.health.failure_threshold,
            discovery.source_count()
        );

        Ok(UnifiedServiceManager {
            config: self.config,
            registry,
            catalog,
            health,
            router,
            discovery,
            dispatcher,
            coordinator: Arc::new(coordinator),
            payments: Arc::new(payments),
            invoker: self.invoker,
            owners: Arc::new(DashMap::new()),
            background: Mutex::new(None),
        })
    }
}

struct Background {
    monitor: MonitorHandle,
    listener: JoinHandle<()>,
}

/// Facade over the service layer subsystems
pub struct UnifiedServiceManager {
    config: ServiceLayerConfig,
    registry: CapabilityRegistry,
    catalog: ServiceCatalog,
    health: Arc<HealthMonitor>,
    router: Arc<ServiceRouter>,
    discovery: DiscoveryIndex,
    dispatcher: Arc<MessageDispatcher>,
    coordinator: Arc<TaskCoordinator>,
    payments: Arc<PaymentFlow>,
    invoker: Arc<dyn ServiceInvoker>,
    /// service id -> owning agent
    owners: Arc<DashMap<String, String>>,
    background: Mutex<Option<Background>>,
}

impl UnifiedServiceManager {
    /// Start configuring a manager
    ///
    /// Unset collaborators default to no-op implementations: services are
    /// always healthy, nothing is executed and payments fail.
    pub fn builder(config: ServiceLayerConfig, identity: Arc<dyn IdentityProvider>) -> ServiceLayerBuilder {
        ServiceLayerBuilder {
            config,
            identity,
            invoker: Arc::new(NoInvoker),
            probe: Arc::new(AlwaysHealthy),
            sources: Vec::new(),
            transport: Arc::new(NoopTransport),
            events: None,
            reputation: None,
            certificates: None,
            payments: Arc::new(NoPayments),
        }
    }

    pub fn config(&self) -> &ServiceLayerConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn router(&self) -> &Arc<ServiceRouter> {
        &self.router
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub fn coordinator(&self) -> &Arc<TaskCoordinator> {
        &self.coordinator
    }

    pub fn payments(&self) -> &Arc<PaymentFlow> {
        &self.payments
    }

    /// Record an agent's capabilities and publish its service
    pub fn register_agent(
        &self,
        agent_id: &str,
        record: CapabilityRecord,
        endpoint: impl Into<String>,
    ) -> Result<ServiceDescriptor> {
        let record = self.registry.register_capabilities(agent_id, record)?;
        self.register_service(ServiceDescriptor::from_record(&record, endpoint))
    }

    /// Publish a service for routing and start tracking its health
    ///
    /// Blank capability names are dropped. Registration and removal of one
    /// service id are serialized through its owner entry.
    pub fn register_service(&self, mut descriptor: ServiceDescriptor) -> Result<ServiceDescriptor> {
        normalize_capabilities(&mut descriptor.capabilities);
        validate_descriptor(&descriptor)?;

        let mut owner = self.owners.entry(descriptor.service_id.clone()).or_default();
        *owner = descriptor.agent_id.clone();
        self.router.register(descriptor.clone());
        self.health.track(&descriptor);
        drop(owner);

        tracing::info!(
            "Registered service {} ({}) for {:?}",
            descriptor.service_id,
            descriptor.agent_id,
            descriptor.capabilities
        );
        Ok(descriptor)
    }

    pub fn unregister_service(&self, service_id: &str) -> Result<ServiceDescriptor> {
        let owner = self.owners.entry(service_id.to_string());
        let descriptor = self
            .router
            .unregister(service_id)
            .ok_or_else(|| ProtocolError::ServiceNotFound(service_id.to_string()))?;
        self.health.untrack(service_id);
        if let Entry::Occupied(owner) = owner {
            owner.remove();
        }

        tracing::info!("Unregistered service {}", service_id);
        Ok(descriptor)
    }

    /// Change an agent's availability and that of every service it owns
    pub fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        self.registry.update_status(agent_id, status)?;
        for service_id in self.owned_services(agent_id) {
            // Skipped if the monitor removed it meanwhile
            let _ = self.set_service_status(&service_id, status.into());
        }
        tracing::info!("Agent {} is now {}", agent_id, status);
        Ok(())
    }

    /// Update an agent's reputation score on its record and its services
    pub fn set_agent_reputation(&self, agent_id: &str, score: f64) -> Result<()> {
        if !score.is_finite() {
            return Err(ProtocolError::invalid_params(format!("reputation must be finite, got {}", score)));
        }
        self.registry.set_reputation(agent_id, score)?;
        for service_id in self.owned_services(agent_id) {
            self.catalog.set_reputation(&service_id, score);
        }
        tracing::debug!("Agent {} reputation set to {}", agent_id, score);
        Ok(())
    }

    /// Cancel expired delegations and drop acknowledged messages
    ///
    /// The background listener runs this once per probe interval.
    pub fn run_housekeeping(&self) -> Housekeeping {
        sweep(&self.coordinator, self.dispatcher.inbox())
    }

    fn owned_services(&self, agent_id: &str) -> Vec<String> {
        self.owners
            .iter()
            .filter(|entry| entry.value() == agent_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop an agent's record and every service it owns
    pub fn unregister_agent(&self, agent_id: &str) -> Result<CapabilityRecord> {
        let record = self
            .registry
            .unregister(agent_id)
            .ok_or_else(|| ProtocolError::AgentNotFound(agent_id.to_string()))?;

        for service_id in self.owned_services(agent_id) {
            // Already gone if the monitor removed it.
            let _ = self.unregister_service(&service_id);
        }
        Ok(record)
    }

    /// Ranked services for one capability, or for several that must all match
    pub async fn discover_services(&self, query: impl Into<DiscoveryQuery>) -> Result<DiscoveryResult> {
        match query.into() {
            DiscoveryQuery::Capability(capability) => self.discovery.discover_by_capability(&capability).await,
            DiscoveryQuery::AllOf(capabilities) => self.discovery.discover_matching(&capabilities).await,
        }
    }

    pub async fn discover_all(&self) -> Result<DiscoveryResult> {
        self.discovery.discover_all().await
    }

    /// Route a request and run it on the chosen service
    pub async fn execute_service(
        &self,
        capability: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ServiceResponse> {
        self.execute_service_with(capability, params, timeout, None).await
    }

    /// Like [`execute_service`](Self::execute_service) with an explicit strategy
    pub async fn execute_service_with(
        &self,
        capability: &str,
        params: Value,
        timeout: Option<Duration>,
        strategy: Option<RoutingStrategy>,
    ) -> Result<ServiceResponse> {
        let service = self.router.route(capability, strategy)?;
        let _guard = self.router.acquire(&service.service_id);
        let budget = timeout.unwrap_or_else(|| self.config.execution.default_timeout());

        tracing::debug!("Executing '{}' on {}", capability, service.service_id);
        let started = Instant::now();
        let outcome = tokio::time::timeout(budget, self.invoker.invoke(&service, capability, params)).await;
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(result)) => {
                self.health.record_success(&service.service_id, latency);
                Ok(ServiceResponse {
                    capability: capability.to_string(),
                    service_id: service.service_id,
                    agent_id: service.agent_id,
                    result,
                    latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Ok(Err(e)) => {
                tracing::error!("'{}' failed on {}: {}", capability, service.service_id, e);
                self.health.record_failure(&service.service_id, e.to_string());
                Err(ProtocolError::ExecutionFailed {
                    capability: capability.to_string(),
                    service_id: service.service_id,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(
                    "'{}' on {} timed out after {:?}",
                    capability,
                    service.service_id,
                    budget
                );
                self.health
                    .record_failure(&service.service_id, format!("timed out after {:?}", budget));
                Err(ProtocolError::Timeout(budget))
            }
        }
    }

    pub fn check_service_health(&self, service_id: &str) -> Result<HealthRecord> {
        self.health
            .get(service_id)
            .ok_or_else(|| ProtocolError::ServiceNotFound(service_id.to_string()))
    }

    pub fn get_all_service_health(&self) -> Vec<HealthRecord> {
        let mut records = self.health.all();
        records.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        records
    }

    pub fn get_routing_stats(&self) -> RoutingStats {
        self.router.stats()
    }

    /// Operator override of a service's status
    pub fn set_service_status(&self, service_id: &str, status: ServiceStatus) -> Result<ServiceStatus> {
        let previous = self.catalog.set_status(service_id, status)?;
        self.health.sync_status(service_id, status);
        tracing::info!("Service {} status {} -> {}", service_id, previous, status);
        Ok(previous)
    }

    pub fn agent_card(&self, agent_id: &str) -> Result<AgentCard> {
        let record = self.registry.get_capabilities(agent_id)?;
        let service = self
            .catalog
            .get(&ServiceDescriptor::service_id_for(agent_id))
            .or_else(|| self.catalog.all().into_iter().find(|s| s.agent_id == agent_id));
        let health = service.as_ref().and_then(|s| self.health.get(&s.service_id));
        Ok(AgentCard::new(&record, service.as_ref(), health.as_ref()))
    }

    /// Spawn the probe loop and the removal listener
    ///
    /// Calling this while already running is a no-op.
    pub async fn start(&self) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return;
        }

        let monitor = self.health.spawn();
        let events = self.health.subscribe();
        let sync = RemovalSync {
            registry: self.registry.clone(),
            router: self.router.clone(),
            owners: self.owners.clone(),
        };
        let coordinator = self.coordinator.clone();
        let sweep_every = self.config.health.probe_interval();
        let inbox = self.dispatcher.inbox().clone();
        let listener = tokio::spawn(listen(events, sync, coordinator, inbox, sweep_every));

        *background = Some(Background { monitor, listener });
        tracing::info!("Service layer started");
    }

    /// Stop background work; registered state is kept
    pub async fn shutdown(&self) {
        if let Some(background) = self.background.lock().await.take() {
            background.monitor.stop();
            background.listener.abort();
            tracing::info!("Service layer stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.background
            .lock()
            .await
            .as_ref()
            .is_some_and(|b| b.monitor.is_running())
    }

    /// Apply a health event to registry-side state
    pub fn apply_health_event(&self, event: &HealthEvent) {
        RemovalSync {
            registry: self.registry.clone(),
            router: self.router.clone(),
            owners: self.owners.clone(),
        }
        .apply(event);
    }
}

fn validate_descriptor(descriptor: &ServiceDescriptor) -> Result<()> {
    if descriptor.service_id.trim().is_empty() {
        return Err(ProtocolError::invalid_params("service id must not be empty"));
    }
    if descriptor.name.trim().is_empty() {
        return Err(ProtocolError::invalid_params("service name must not be empty"));
    }
    if descriptor.endpoint.trim().is_empty() {
        return Err(ProtocolError::invalid_params(format!(
            "service {} has no endpoint",
            descriptor.service_id
        )));
    }
    if descriptor.capabilities.is_empty() {
        return Err(ProtocolError::invalid_params(format!(
            "service {} must declare at least one capability",
            descriptor.service_id
        )));
    }
    Ok(())
}

/// Trim names, drop blanks and repeats, keep declaration order
fn normalize_capabilities(capabilities: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    capabilities.retain_mut(|capability| {
        let trimmed = capability.trim();
        if trimmed.len() != capability.len() {
            *capability = trimmed.to_string();
        }
        !capability.is_empty() && seen.insert(capability.clone())
    });
}

/// What one housekeeping pass cleaned up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Housekeeping {
    pub cancelled_tasks: Vec<String>,
    pub purged_messages: usize,
}

fn sweep(coordinator: &TaskCoordinator, inbox: &InboxStore) -> Housekeeping {
    let cancelled_tasks = coordinator.sweep_expired();
    let purged_messages = inbox.purge_all_processed();
    if purged_messages > 0 {
        tracing::debug!("Purged {} processed message(s)", purged_messages);
    }
    Housekeeping {
        cancelled_tasks,
        purged_messages,
    }
}

/// Registry-side cleanup for services the monitor removed
#[derive(Clone)]
struct RemovalSync {
    registry: CapabilityRegistry,
    router: Arc<ServiceRouter>,
    owners: Arc<DashMap<String, String>>,
}

impl RemovalSync {
    fn apply(&self, event: &HealthEvent) {
        let HealthEvent::ServiceRemoved { service_id, .. } = event else {
            return;
        };

        let owner = self.owners.entry(service_id.clone());
        self.router.unregister(service_id);
        if let Entry::Occupied(owner) = owner {
            let agent_id = owner.remove();
            if self.registry.update_status(&agent_id, AgentStatus::Offline).is_ok() {
                tracing::info!("Marked {} offline after removal of {}", agent_id, service_id);
            }
        }
    }
}

async fn listen(
    mut events: broadcast::Receiver<HealthEvent>,
    sync: RemovalSync,
    coordinator: Arc<TaskCoordinator>,
    inbox: InboxStore,
    sweep_every: Duration,
) {
    let mut ticker = tokio::time::interval(sweep_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => sync.apply(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Health listener lagged, skipped {} event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                sweep(&coordinator, &inbox);
            }
        }
    }
}
