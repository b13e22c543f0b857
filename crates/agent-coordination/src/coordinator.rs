//! Task delegation between agents
//!
//! Every state change is paired with a protocol message to the other party.
//! The state change is authoritative; a message that cannot be delivered is
//! logged and dropped.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;

use agent_comms::{Message, MessageDispatcher, MessageType, ProtocolError, Result};
use agent_core::TaskSettings;
use agent_registry::CapabilityRegistry;

use crate::{CertificateIssuer, ReputationProvider, Task, TaskSpec, TaskStatus};

/// Owns delegated tasks and drives them through their lifecycle
pub struct TaskCoordinator {
    dispatcher: Arc<MessageDispatcher>,
    tasks: DashMap<String, Task>,
    settings: TaskSettings,
    reputation: Option<Arc<dyn ReputationProvider>>,
    certificates: Option<Arc<dyn CertificateIssuer>>,
    /// Tracks active task counts on capability records
    registry: Option<CapabilityRegistry>,
}

impl TaskCoordinator {
    pub fn new(dispatcher: Arc<MessageDispatcher>, settings: TaskSettings) -> Self {
        Self {
            dispatcher,
            tasks: DashMap::new(),
            settings,
            reputation: None,
            certificates: None,
            registry: None,
        }
    }

    pub fn with_reputation(mut self, reputation: Arc<dyn ReputationProvider>) -> Self {
        self.reputation = Some(reputation);
        self
    }

    pub fn with_certificates(mut self, issuer: Arc<dyn CertificateIssuer>) -> Self {
        self.certificates = Some(issuer);
        self
    }

    pub fn with_registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Create a pending task and send the delegation message to the assignee
    pub async fn delegate_task(&self, from: &str, to: &str, spec: TaskSpec) -> Result<Task> {
        if spec.name.trim().is_empty() {
            return Err(ProtocolError::invalid_params("task name must not be empty"));
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = match self.settings.delegation_ttl_secs {
            Some(secs) => Some(delegation_expiry(now, secs)?),
            None => None,
        };

        let mut message = Message::new(from, to, MessageType::TaskDelegation)
            .with_content(spec.description.clone())
            .with_field("task_id", json!(task_id))
            .with_field("task_name", json!(spec.name))
            .with_field("description", json!(spec.description))
            .with_field("parameters", spec.parameters.clone())
            .with_field("required_capabilities", json!(spec.required_capabilities));
        if let Some(at) = expires_at {
            message = message.with_expiry(at);
        }
        let delegation_message_id = message.id.clone();

        let task = Task {
            id: task_id.clone(),
            delegator_id: from.to_string(),
            assignee_id: to.to_string(),
            name: spec.name,
            description: spec.description,
            parameters: spec.parameters,
            required_capabilities: spec.required_capabilities,
            status: TaskStatus::Pending,
            result: None,
            notes: None,
            progress: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            delegation_message_id,
            expires_at,
            reward_points: None,
            certificate_ref: None,
        };
        // Stored first so an assignee reacting to the notification finds it
        self.tasks.insert(task_id.clone(), task.clone());
        if let Err(e) = self.dispatcher.dispatch(message).await {
            self.tasks.remove(&task_id);
            return Err(e);
        }

        tracing::info!("Delegated task {} ({}) from {} to {}", task_id, task.name, from, to);
        Ok(task)
    }

    /// Assignee takes the task on
    pub async fn accept_task(&self, task_id: &str, agent_id: &str) -> Result<Task> {
        let task = self.transition(task_id, |task| {
            require_assignee(task, agent_id)?;
            task.advance(TaskStatus::InProgress)
        })?;

        self.adjust_active(&task.assignee_id, 1);
        self.notify(
            task_message(&task, MessageType::TaskAcceptance)
                .with_field("status", json!(TaskStatus::InProgress)),
        )
        .await;

        tracing::info!("Task {} accepted by {}", task_id, agent_id);
        Ok(task)
    }

    /// Assignee declines a pending task
    pub async fn reject_task(&self, task_id: &str, agent_id: &str, reason: &str) -> Result<Task> {
        let task = self.transition(task_id, |task| {
            require_assignee(task, agent_id)?;
            if task.status != TaskStatus::Pending {
                return Err(ProtocolError::invalid_state(format!(
                    "task {} is {} and can no longer be rejected",
                    task.id, task.status
                )));
            }
            task.advance(TaskStatus::Failed)?;
            task.failure_reason = Some(reason.to_string());
            Ok(())
        })?;

        self.notify(
            task_message(&task, MessageType::TaskRejection)
                .with_content(reason)
                .with_field("reason", json!(reason)),
        )
        .await;

        tracing::info!("Task {} rejected by {}: {}", task_id, agent_id, reason);
        Ok(task)
    }

    /// Assignee reports progress on a task in progress
    pub async fn update_task(&self, task_id: &str, agent_id: &str, progress: Value) -> Result<Task> {
        let task = self.transition(task_id, |task| {
            require_assignee(task, agent_id)?;
            if task.status != TaskStatus::InProgress {
                return Err(ProtocolError::invalid_state(format!(
                    "task {} is {}, updates need InProgress",
                    task.id, task.status
                )));
            }
            task.progress = Some(progress.clone());
            task.updated_at = Utc::now();
            Ok(())
        })?;

        self.notify(task_message(&task, MessageType::TaskUpdate).with_field("progress", progress))
            .await;
        Ok(task)
    }

    /// Record the result, notify the delegator and reward the assignee
    ///
    /// A second completion fails with `InvalidState` and awards nothing.
    pub async fn complete_task(&self, task_id: &str, result: Value, notes: Option<String>) -> Result<Task> {
        let mut was_in_progress = false;
        let mut task = self.transition(task_id, |task| {
            was_in_progress = task.status == TaskStatus::InProgress;
            task.advance(TaskStatus::Completed)?;
            task.result = Some(result.clone());
            task.notes = notes.clone();
            Ok(())
        })?;

        if was_in_progress {
            self.adjust_active(&task.assignee_id, -1);
        }

        let mut message = task_message(&task, MessageType::TaskCompletion)
            .with_field("status", json!(TaskStatus::Completed))
            .with_field("result", result.clone());
        if let Some(notes) = &notes {
            message = message.with_content(notes.clone());
        }
        self.notify(message).await;

        tracing::info!("Task {} completed by {}", task_id, task.assignee_id);

        if let Some(points) = self.award(&task, &result).await {
            task.reward_points = Some(points);
        }
        if let Some(reference) = self.certify(&task).await {
            task.certificate_ref = Some(reference);
        }
        if task.reward_points.is_some() || task.certificate_ref.is_some() {
            if let Some(mut stored) = self.tasks.get_mut(task_id) {
                stored.reward_points = task.reward_points;
                stored.certificate_ref = task.certificate_ref.clone();
            }
        }
        Ok(task)
    }

    /// Assignee gives up on a task
    pub async fn fail_task(&self, task_id: &str, agent_id: &str, error: &str) -> Result<Task> {
        let mut was_in_progress = false;
        let task = self.transition(task_id, |task| {
            require_assignee(task, agent_id)?;
            was_in_progress = task.status == TaskStatus::InProgress;
            task.advance(TaskStatus::Failed)?;
            task.failure_reason = Some(error.to_string());
            Ok(())
        })?;

        if was_in_progress {
            self.adjust_active(&task.assignee_id, -1);
        }
        self.notify(
            task_message(&task, MessageType::TaskCompletion)
                .with_content(error)
                .with_field("status", json!(TaskStatus::Failed))
                .with_field("error", json!(error)),
        )
        .await;

        tracing::warn!("Task {} failed: {}", task_id, error);
        Ok(task)
    }

    /// Delegator withdraws a task that has not finished
    pub async fn cancel_task(&self, task_id: &str, requester: &str) -> Result<Task> {
        let mut was_in_progress = false;
        let task = self.transition(task_id, |task| {
            if task.delegator_id != requester {
                return Err(ProtocolError::invalid_request(format!(
                    "only the delegator of task {} may cancel it",
                    task.id
                )));
            }
            was_in_progress = task.status == TaskStatus::InProgress;
            task.advance(TaskStatus::Cancelled)
        })?;

        if was_in_progress {
            self.adjust_active(&task.assignee_id, -1);
        }
        self.notify(
            Message::new(&task.delegator_id, &task.assignee_id, MessageType::TaskUpdate)
                .with_response_to(task.delegation_message_id.clone())
                .with_field("task_id", json!(task.id))
                .with_field("status", json!(TaskStatus::Cancelled)),
        )
        .await;

        tracing::info!("Task {} cancelled by {}", task_id, requester);
        Ok(task)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .get(task_id)
            .map(|t| t.clone())
            .ok_or_else(|| ProtocolError::TaskNotFound(task_id.to_string()))
    }

    /// Tasks the agent delegated or was assigned, oldest first
    pub fn get_agent_tasks(&self, agent_id: &str, status: Option<TaskStatus>) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.involves(agent_id))
            .filter(|t| status.map_or(true, |s| t.status == s))
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Cancel pending tasks whose delegation expired; returns their ids
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let mut swept = Vec::new();
        for mut task in self.tasks.iter_mut() {
            if task.status == TaskStatus::Pending && task.is_expired_at(now) && task.advance(TaskStatus::Cancelled).is_ok() {
                task.failure_reason = Some("delegation expired".to_string());
                swept.push(task.id.clone());
            }
        }
        if !swept.is_empty() {
            tracing::info!("Cancelled {} expired task(s)", swept.len());
        }
        swept
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Points earned for a completion
    pub fn reward_for(&self, result: &Value) -> u64 {
        let base = self.settings.reward_points;
        if !self.settings.quality_weighted_rewards {
            return base;
        }
        match result.get("quality_score").and_then(Value::as_f64) {
            Some(quality) => (base as f64 * quality.clamp(0.0, 1.0)).round() as u64,
            None => base,
        }
    }

    fn transition<F>(&self, task_id: &str, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ProtocolError::TaskNotFound(task_id.to_string()))?;
        f(&mut task)?;
        Ok(task.clone())
    }

    async fn award(&self, task: &Task, result: &Value) -> Option<u64> {
        let reputation = self.reputation.as_ref()?;
        let points = self.reward_for(result);
        let reason = format!("completed task {}", task.id);
        match reputation.award_points(&task.assignee_id, points, &reason).await {
            Ok(total) => {
                tracing::debug!("{} now holds {} reputation points", task.assignee_id, total);
                Some(points)
            }
            Err(e) => {
                tracing::warn!("Reward for task {} failed: {}", task.id, e);
                None
            }
        }
    }

    async fn certify(&self, task: &Task) -> Option<String> {
        if !self.settings.issue_certificates {
            return None;
        }
        let issuer = self.certificates.as_ref()?;
        let metadata = json!({
            "task_id": task.id,
            "delegator_id": task.delegator_id,
            "completed_at": task.completed_at,
        });
        match issuer.issue_certificate(&task.assignee_id, &task.name, &metadata).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::warn!("Certificate for task {} failed: {}", task.id, e);
                None
            }
        }
    }

    fn adjust_active(&self, agent_id: &str, delta: i64) {
        if let Some(registry) = &self.registry {
            if let Err(e) = registry.adjust_active_tasks(agent_id, delta) {
                tracing::debug!("No capability record to update for {}: {}", agent_id, e);
            }
        }
    }

    async fn notify(&self, message: Message) {
        let message_type = message.message_type;
        if let Err(e) = self.dispatcher.dispatch(message).await {
            tracing::warn!("Dropped {} message: {}", message_type, e);
        }
    }
}

fn delegation_expiry(now: chrono::DateTime<Utc>, secs: u64) -> Result<chrono::DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| ProtocolError::invalid_params(format!("delegation ttl of {}s is out of range", secs)))
}

fn require_assignee(task: &Task, agent_id: &str) -> Result<()> {
    if task.assignee_id == agent_id {
        Ok(())
    } else {
        Err(ProtocolError::invalid_request(format!(
            "task {} is assigned to {}, not {}",
            task.id, task.assignee_id, agent_id
        )))
    }
}

/// Message from the assignee back to the delegator, threaded on the delegation
fn task_message(task: &Task, message_type: MessageType) -> Message {
    Message::new(&task.assignee_id, &task.delegator_id, message_type)
        .with_response_to(task.delegation_message_id.clone())
        .with_field("task_id", json!(task.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryReputation;
    use agent_comms::{ErrorCode, InMemoryIdentity};

    struct Fixture {
        coordinator: TaskCoordinator,
        dispatcher: Arc<MessageDispatcher>,
        reputation: Arc<InMemoryReputation>,
    }

    fn fixture(settings: TaskSettings) -> Fixture {
        let identity = Arc::new(InMemoryIdentity::new());
        identity.add_agent("lead", "token-lead");
        identity.add_agent("worker", "token-worker");
        let dispatcher = Arc::new(MessageDispatcher::new(identity));
        let reputation = Arc::new(InMemoryReputation::new());
        let coordinator =
            TaskCoordinator::new(dispatcher.clone(), settings).with_reputation(reputation.clone());
        Fixture {
            coordinator,
            dispatcher,
            reputation,
        }
    }

    fn spec() -> TaskSpec {
        TaskSpec::new("quarterly-report")
            .with_description("Summarize Q4 sales")
            .with_parameters(json!({ "dataset": "sales.csv" }))
            .with_required_capabilities(["data-analysis"])
    }

    #[tokio::test]
    async fn test_delegation_sends_message() {
        let f = fixture(TaskSettings::default());
        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let inbox = f.dispatcher.inbox().pending("worker");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].id, task.delegation_message_id);
        assert_eq!(inbox[0].message_type, MessageType::TaskDelegation);
        assert_eq!(inbox[0].payload["task_id"], json!(task.id));
        assert_eq!(inbox[0].payload["required_capabilities"], json!(["data-analysis"]));
    }

    #[tokio::test]
    async fn test_delegation_to_unknown_agent_creates_nothing() {
        let f = fixture(TaskSettings::default());
        let err = f.coordinator.delegate_task("lead", "ghost", spec()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AgentNotFound);
        assert_eq!(f.coordinator.task_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_an_error() {
        let f = fixture(TaskSettings {
            delegation_ttl_secs: Some(u64::MAX / 2),
            ..TaskSettings::default()
        });
        let err = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParams);
        assert_eq!(f.coordinator.task_count(), 0);
        assert!(f.dispatcher.inbox().is_empty("worker"));
    }

    /// Looks the delegated task up while the notification is in flight
    struct LookupTransport {
        coordinator: std::sync::OnceLock<std::sync::Weak<TaskCoordinator>>,
        found: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl agent_comms::MessageTransport for LookupTransport {
        async fn notify(&self, _agent_id: &str, message: &Message) -> Result<()> {
            if message.message_type == MessageType::TaskDelegation {
                let task_id = message.payload["task_id"].as_str().unwrap_or_default();
                let coordinator = self.coordinator.get().and_then(|c| c.upgrade());
                if let Some(coordinator) = coordinator {
                    self.found
                        .store(coordinator.get_task(task_id).is_ok(), std::sync::atomic::Ordering::SeqCst);
                }
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "lookup"
        }
    }

    #[tokio::test]
    async fn test_task_exists_when_assignee_is_notified() {
        let identity = Arc::new(InMemoryIdentity::new());
        identity.add_agent("lead", "token-lead");
        identity.add_agent("worker", "token-worker");
        let transport = Arc::new(LookupTransport {
            coordinator: std::sync::OnceLock::new(),
            found: std::sync::atomic::AtomicBool::new(false),
        });
        let dispatcher = Arc::new(MessageDispatcher::new(identity).with_transport(transport.clone()));
        let coordinator = Arc::new(TaskCoordinator::new(dispatcher, TaskSettings::default()));
        transport.coordinator.set(Arc::downgrade(&coordinator)).unwrap();

        coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        assert!(transport.found.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_full_lifecycle_threads_on_delegation() {
        let f = fixture(TaskSettings::default());
        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();

        f.coordinator.accept_task(&task.id, "worker").await.unwrap();
        f.coordinator
            .update_task(&task.id, "worker", json!({ "percent": 50 }))
            .await
            .unwrap();
        let done = f
            .coordinator
            .complete_task(&task.id, json!({ "summary": "up 12%" }), Some("done".to_string()))
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());

        let replies = f.dispatcher.inbox().pending("lead");
        let types: Vec<MessageType> = replies.iter().map(|m| m.message_type).collect();
        assert_eq!(
            types,
            vec![MessageType::TaskAcceptance, MessageType::TaskUpdate, MessageType::TaskCompletion]
        );
        assert!(replies
            .iter()
            .all(|m| m.response_to.as_deref() == Some(task.delegation_message_id.as_str())));
    }

    #[tokio::test]
    async fn test_double_completion_rejected_without_second_reward() {
        let f = fixture(TaskSettings::default());
        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();

        let done = f.coordinator.complete_task(&task.id, json!({}), None).await.unwrap();
        assert_eq!(done.reward_points, Some(10));
        assert_eq!(f.reputation.points("worker"), 10);

        let err = f.coordinator.complete_task(&task.id, json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert_eq!(f.reputation.points("worker"), 10);
    }

    #[tokio::test]
    async fn test_quality_weighted_reward() {
        let f = fixture(TaskSettings::default());
        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        f.coordinator
            .complete_task(&task.id, json!({ "quality_score": 0.5 }), None)
            .await
            .unwrap();
        assert_eq!(f.reputation.points("worker"), 5);

        let flat = fixture(TaskSettings {
            quality_weighted_rewards: false,
            ..TaskSettings::default()
        });
        assert_eq!(flat.coordinator.reward_for(&json!({ "quality_score": 0.5 })), 10);
    }

    #[tokio::test]
    async fn test_missing_task() {
        let f = fixture(TaskSettings::default());
        let err = f.coordinator.complete_task("nope", json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TaskNotFound);
        assert_eq!(f.coordinator.get_task("nope").unwrap_err().code(), ErrorCode::TaskNotFound);
    }

    #[tokio::test]
    async fn test_reject_only_while_pending() {
        let f = fixture(TaskSettings::default());
        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        let rejected = f.coordinator.reject_task(&task.id, "worker", "too busy").await.unwrap();
        assert_eq!(rejected.status, TaskStatus::Failed);
        assert_eq!(f.reputation.points("worker"), 0);

        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        f.coordinator.accept_task(&task.id, "worker").await.unwrap();
        let err = f.coordinator.reject_task(&task.id, "worker", "changed mind").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn test_only_assignee_accepts_and_only_delegator_cancels() {
        let f = fixture(TaskSettings::default());
        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();

        let err = f.coordinator.accept_task(&task.id, "lead").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let err = f.coordinator.cancel_task(&task.id, "worker").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);

        let cancelled = f.coordinator.cancel_task(&task.id, "lead").await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let err = f.coordinator.accept_task(&task.id, "worker").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn test_fail_task() {
        let f = fixture(TaskSettings::default());
        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        f.coordinator.accept_task(&task.id, "worker").await.unwrap();

        let failed = f.coordinator.fail_task(&task.id, "worker", "dataset missing").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("dataset missing"));
        assert!(f.coordinator.update_task(&task.id, "worker", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_agent_tasks_filtered_by_status() {
        let f = fixture(TaskSettings::default());
        let first = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        let second = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        f.coordinator.accept_task(&second.id, "worker").await.unwrap();

        assert_eq!(f.coordinator.get_agent_tasks("worker", None).len(), 2);
        assert_eq!(f.coordinator.get_agent_tasks("lead", None).len(), 2);

        let pending = f.coordinator.get_agent_tasks("worker", Some(TaskStatus::Pending));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);
        assert!(f.coordinator.get_agent_tasks("stranger", None).is_empty());
    }

    #[tokio::test]
    async fn test_active_tasks_tracked_on_registry() {
        let identity = Arc::new(InMemoryIdentity::new());
        identity.add_agent("lead", "t1");
        identity.add_agent("worker", "t2");
        let registry = CapabilityRegistry::new();
        registry
            .register_capabilities("worker", agent_registry::CapabilityRecord::new(["data-analysis"]))
            .unwrap();
        let coordinator = TaskCoordinator::new(Arc::new(MessageDispatcher::new(identity)), TaskSettings::default())
            .with_registry(registry.clone());

        let task = coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        coordinator.accept_task(&task.id, "worker").await.unwrap();
        assert_eq!(registry.get_capabilities("worker").unwrap().active_tasks, 1);

        coordinator.complete_task(&task.id, json!({}), None).await.unwrap();
        assert_eq!(registry.get_capabilities("worker").unwrap().active_tasks, 0);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let f = fixture(TaskSettings {
            delegation_ttl_secs: Some(0),
            ..TaskSettings::default()
        });
        // A zero TTL expires at creation, so dispatch rejects it
        let err = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MessageExpired);
        assert_eq!(f.coordinator.task_count(), 0);

        let f = fixture(TaskSettings {
            delegation_ttl_secs: Some(3600),
            ..TaskSettings::default()
        });
        let task = f.coordinator.delegate_task("lead", "worker", spec()).await.unwrap();
        assert!(task.expires_at.is_some());
        assert!(f.coordinator.sweep_expired().is_empty());

        f.coordinator.tasks.get_mut(&task.id).unwrap().expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert_eq!(f.coordinator.sweep_expired(), vec![task.id.clone()]);
        assert_eq!(f.coordinator.get_task(&task.id).unwrap().status, TaskStatus::Cancelled);
    }
}
