//! Service layer end to end

use agent_comms::{
    ErrorCode, InMemoryIdentity, InProcessTransport, Message, MessageType, ProtocolError, Result,
    RpcRequest,
};
use agent_coordination::{InMemoryLedger, ReputationProvider, TaskSpec, TaskStatus};
use agent_core::ServiceLayerConfig;
use agent_health::HealthProbe;
use agent_registry::{AgentStatus, CapabilityRecord, ServiceDescriptor};
use agent_routing::RoutingStrategy;
use agent_services::{ProtocolHandler, UnifiedServiceManager};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::{DashMap, DashSet};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fails every service id in `down`
#[derive(Default)]
struct ScriptedProbe {
    down: DashSet<String>,
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn probe(&self, service: &ServiceDescriptor) -> Result<()> {
        if self.down.contains(&service.service_id) {
            Err(ProtocolError::internal("connection refused"))
        } else {
            Ok(())
        }
    }
}

/// Counts every award per agent
#[derive(Default)]
struct CountingReputation {
    calls: AtomicUsize,
    points: DashMap<String, u64>,
}

#[async_trait]
impl ReputationProvider for CountingReputation {
    async fn award_points(&self, agent_id: &str, amount: u64, _reason: &str) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut total = self.points.entry(agent_id.to_string()).or_insert(0);
        *total += amount;
        Ok(*total)
    }

    async fn get_points(&self, agent_id: &str) -> Result<u64> {
        Ok(self.points.get(agent_id).map(|p| *p).unwrap_or(0))
    }
}

fn identity() -> InMemoryIdentity {
    let identity = InMemoryIdentity::new();
    identity.add_agent("alpha", "tok-alpha");
    identity.add_agent("beta", "tok-beta");
    identity.add_agent("gamma", "tok-gamma");
    identity
}

#[tokio::test]
async fn test_e2e_discover_route_then_health_exclusion() {
    let probe = Arc::new(ScriptedProbe::default());
    let manager = UnifiedServiceManager::builder(ServiceLayerConfig::default(), Arc::new(identity()))
        .with_probe(probe.clone())
        .build()
        .unwrap();

    manager
        .register_agent(
            "alpha",
            CapabilityRecord::new(["data-analysis"]).with_status(AgentStatus::Available),
            "http://alpha.local/a2a",
        )
        .unwrap();

    let found = manager.discover_services("data-analysis").await.unwrap();
    let agents: Vec<&str> = found.services.iter().map(|s| s.agent_id.as_str()).collect();
    assert_eq!(agents, vec!["alpha"]);
    assert_eq!(manager.router().route("data-analysis", None).unwrap().agent_id, "alpha");
    println!("✅ Discovery and routing return alpha");

    probe.down.insert("svc-alpha".to_string());
    for cycle in 1..=3 {
        let summary = manager.health().probe_all().await;
        assert_eq!(summary.failed, 1, "cycle {}", cycle);
    }

    let err = manager.router().route("data-analysis", None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ServiceNotFound);
    let found = manager.discover_services("data-analysis").await.unwrap();
    assert!(found.services.is_empty());

    let retained = manager.check_service_health("svc-alpha").unwrap();
    assert_eq!(retained.consecutive_failures, 3);
    println!("✅ TEST 1 PASSED: three failed probes remove alpha from discovery and routing");
}

#[tokio::test]
async fn test_e2e_task_completion_rewards_once() {
    let reputation = Arc::new(CountingReputation::default());
    let manager = UnifiedServiceManager::builder(ServiceLayerConfig::default(), Arc::new(identity()))
        .with_reputation(reputation.clone())
        .build()
        .unwrap();
    manager
        .register_agent("alpha", CapabilityRecord::new(["data-analysis"]), "http://alpha.local/a2a")
        .unwrap();

    let coordinator = manager.coordinator();
    let task = coordinator
        .delegate_task(
            "beta",
            "alpha",
            TaskSpec::new("quarterly-trends").with_required_capabilities(["data-analysis"]),
        )
        .await
        .unwrap();

    let done = coordinator
        .complete_task(&task.id, json!({ "trend": "up" }), Some("seasonal".to_string()))
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let completion = manager
        .dispatcher()
        .inbox()
        .pending("beta")
        .into_iter()
        .find(|m| m.message_type == MessageType::TaskCompletion)
        .expect("completion message for beta");
    assert_eq!(completion.sender_id, "alpha");
    assert_eq!(completion.response_to.as_deref(), Some(task.delegation_message_id.as_str()));
    assert_eq!(reputation.calls.load(Ordering::SeqCst), 1);
    assert_eq!(reputation.get_points("alpha").await.unwrap(), 10);
    println!("✅ Completion replies to the delegation and rewards alpha once");

    let err = coordinator
        .complete_task(&task.id, json!({ "trend": "down" }), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert_eq!(reputation.calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.get_task(&task.id).unwrap().result, Some(json!({ "trend": "up" })));
    println!("✅ TEST 2 PASSED: second completion is rejected without a second reward");
}

#[tokio::test]
async fn test_e2e_routing_never_picks_unhealthy() {
    let probe = Arc::new(ScriptedProbe::default());
    let manager = UnifiedServiceManager::builder(ServiceLayerConfig::default(), Arc::new(identity()))
        .with_probe(probe.clone())
        .build()
        .unwrap();

    manager
        .register_agent("alpha", CapabilityRecord::new(["nlp", "summarization"]), "mem://alpha")
        .unwrap();
    manager
        .register_agent("beta", CapabilityRecord::new(["nlp"]), "mem://beta")
        .unwrap();
    manager
        .register_agent("gamma", CapabilityRecord::new(["vision"]), "mem://gamma")
        .unwrap();

    let nlp = manager.discover_services("nlp").await.unwrap().service_ids();
    assert_eq!(nlp.len(), 2);
    assert!(!nlp.contains(&"svc-gamma".to_string()));
    let both = manager
        .discover_services(vec!["nlp".to_string(), "summarization".to_string()])
        .await
        .unwrap();
    assert_eq!(both.service_ids(), vec!["svc-alpha"]);

    probe.down.insert("svc-beta".to_string());
    manager.health().probe_all().await;
    assert_eq!(manager.discover_services("nlp").await.unwrap().services.len(), 2);

    manager.health().probe_all().await;
    manager.health().probe_all().await;
    assert_eq!(manager.discover_services("nlp").await.unwrap().service_ids(), vec!["svc-alpha"]);

    for strategy in RoutingStrategy::ALL {
        for _ in 0..4 {
            let picked = manager.router().route("nlp", Some(strategy)).unwrap();
            assert_eq!(picked.agent_id, "alpha", "strategy {}", strategy);
        }
    }

    let stats = manager.get_routing_stats();
    assert_eq!(stats.total_routed(), (RoutingStrategy::ALL.len() * 4) as u64);
    println!("✅ TEST 3 PASSED: removed services are never routed");
}

#[tokio::test]
async fn test_e2e_expired_message_never_delivered() {
    let manager = UnifiedServiceManager::builder(ServiceLayerConfig::default(), Arc::new(identity()))
        .build()
        .unwrap();

    let stale = Message::new("alpha", "beta", MessageType::ServiceRequest)
        .with_expiry(Utc::now() - ChronoDuration::seconds(1));
    let err = manager.dispatcher().dispatch(stale).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MessageExpired);
    assert!(manager.dispatcher().inbox().is_empty("beta"));
    println!("✅ TEST 4 PASSED: expired message is rejected before delivery");
}

#[tokio::test]
async fn test_e2e_protocol_delegation_and_payment() {
    let transport = Arc::new(InProcessTransport::new());
    let mut beta_mailbox = transport.register_mailbox("beta");
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.deposit("beta", "SOL", 1.0);

    let manager = UnifiedServiceManager::builder(ServiceLayerConfig::default(), Arc::new(identity()))
        .with_transport(transport.clone())
        .with_payments(ledger.clone())
        .build()
        .unwrap();
    let handler = ProtocolHandler::new(Arc::new(manager));

    let response = handler
        .handle(
            Some("tok-alpha"),
            RpcRequest::new(
                "register_capabilities",
                json!({ "services": ["data-analysis"], "pricing": { "data-analysis": 0.1 } }),
                "reg",
            ),
        )
        .await;
    assert!(!response.is_error(), "{:?}", response.error);

    let task = handler
        .handle(
            Some("tok-beta"),
            RpcRequest::new(
                "delegate_task",
                json!({ "to_agent_id": "alpha", "task_name": "analyze", "parameters": { "dataset": "sales.csv" } }),
                "delegate",
            ),
        )
        .await
        .result
        .unwrap();
    let task_id = task["id"].as_str().unwrap().to_string();

    let accepted = handler
        .handle(Some("tok-alpha"), RpcRequest::new("accept_task", json!({ "task_id": task_id }), 3))
        .await
        .result
        .unwrap();
    assert_eq!(accepted["status"], "InProgress");

    let completed = handler
        .handle(
            Some("tok-alpha"),
            RpcRequest::new("complete_task", json!({ "task_id": task_id, "result": { "rows": 42 } }), 4),
        )
        .await
        .result
        .unwrap();
    assert_eq!(completed["status"], "Completed");

    let acceptance = beta_mailbox.recv().await.unwrap();
    assert_eq!(acceptance.message_type, MessageType::TaskAcceptance);
    let completion = beta_mailbox.recv().await.unwrap();
    assert_eq!(completion.message_type, MessageType::TaskCompletion);
    println!("✅ Delegation lifecycle over the protocol endpoint");

    let payment = handler
        .handle(
            Some("tok-alpha"),
            RpcRequest::new(
                "payment_request",
                json!({ "to_agent_id": "beta", "amount": 0.1, "currency": "SOL", "description": "analysis" }),
                5,
            ),
        )
        .await
        .result
        .unwrap();
    let request_id = payment["request_id"].as_str().unwrap().to_string();

    let settled = handler
        .handle(Some("tok-beta"), RpcRequest::new("settle_payment", json!({ "request_id": request_id }), 6))
        .await
        .result
        .unwrap();
    assert_eq!(settled["status"], "confirmed");
    assert!((ledger.balance("alpha", "SOL") - 0.1).abs() < 1e-9);

    let tasks = handler
        .handle(Some("tok-alpha"), RpcRequest::new("get_agent_tasks", json!({ "status": "completed" }), 7))
        .await
        .result
        .unwrap();
    assert_eq!(tasks["count"], 1);
    println!("✅ TEST 5 PASSED: protocol delegation and payment settle end to end");
}
