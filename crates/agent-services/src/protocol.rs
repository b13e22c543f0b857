//! JSON-RPC style protocol endpoint
//!
//! Transport agnostic: callers pass the bearer credential (if any) and the
//! decoded request, and get back a response carrying the same id.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use agent_comms::{Message, MessageType, Priority, ProtocolError, Result, RpcRequest, RpcResponse};
use agent_coordination::{TaskSpec, TaskStatus};
use agent_registry::CapabilityRecord;

use crate::{DiscoveryQuery, UnifiedServiceManager};

/// Methods served by [`ProtocolHandler`]
pub const METHODS: &[&str] = &[
    "ping",
    "capability_query",
    "register_capabilities",
    "discover",
    "service_request",
    "send_message",
    "get_pending_messages",
    "mark_processed",
    "delegate_task",
    "accept_task",
    "reject_task",
    "update_task",
    "complete_task",
    "fail_task",
    "cancel_task",
    "get_task",
    "get_agent_tasks",
    "payment_request",
    "settle_payment",
];

/// Methods that do not need a credential
const PUBLIC_METHODS: &[&str] = &["discover"];

/// Maps protocol requests onto the service manager
#[derive(Clone)]
pub struct ProtocolHandler {
    manager: Arc<UnifiedServiceManager>,
}

impl ProtocolHandler {
    pub fn new(manager: Arc<UnifiedServiceManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<UnifiedServiceManager> {
        &self.manager
    }

    /// Handle one request; errors become error responses
    pub async fn handle(&self, token: Option<&str>, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        let result = self.call(token, &request).await;
        if let Err(e) = &result {
            tracing::debug!("{} failed: {}", request.method, e);
        }
        RpcResponse::from_result(id, result)
    }

    /// Handle a raw request body
    pub async fn handle_json(&self, token: Option<&str>, raw: &str) -> RpcResponse {
        match RpcRequest::from_json(raw) {
            Ok(request) => self.handle(token, request).await,
            Err(e) => RpcResponse::failure(Value::Null, &e),
        }
    }

    async fn call(&self, token: Option<&str>, request: &RpcRequest) -> Result<Value> {
        let method = request.method.as_str();
        if !METHODS.contains(&method) {
            return Err(ProtocolError::MethodNotFound(method.to_string()));
        }
        if PUBLIC_METHODS.contains(&method) {
            return self.discover(request).await;
        }

        let agent_id = self.authenticate(token).await?;
        tracing::debug!("{} called by {}", method, agent_id);

        match method {
            "ping" => self.ping(&agent_id, request).await,
            "capability_query" => self.capability_query(&agent_id, request).await,
            "register_capabilities" => self.register_capabilities(&agent_id, request),
            "service_request" => self.service_request(&agent_id, request).await,
            "send_message" => self.send_message(&agent_id, request).await,
            "get_pending_messages" => {
                let messages = self.manager.dispatcher().inbox().pending(&agent_id);
                Ok(json!({ "count": messages.len(), "messages": messages }))
            }
            "mark_processed" => {
                let message_id = request.str_param("message_id")?;
                self.manager
                    .dispatcher()
                    .inbox()
                    .mark_processed(&agent_id, message_id)?;
                Ok(json!({ "message_id": message_id, "processed": true }))
            }
            "delegate_task" => self.delegate_task(&agent_id, request).await,
            "accept_task" => {
                let task = self
                    .coordinator()
                    .accept_task(request.str_param("task_id")?, &agent_id)
                    .await?;
                to_value(&task)
            }
            "reject_task" => {
                let reason = request.opt_str_param("reason").unwrap_or("rejected");
                let task = self
                    .coordinator()
                    .reject_task(request.str_param("task_id")?, &agent_id, reason)
                    .await?;
                to_value(&task)
            }
            "update_task" => {
                let progress = request.params.get("progress").cloned().unwrap_or(Value::Null);
                let task = self
                    .coordinator()
                    .update_task(request.str_param("task_id")?, &agent_id, progress)
                    .await?;
                to_value(&task)
            }
            "complete_task" => self.complete_task(&agent_id, request).await,
            "fail_task" => {
                let error = request.str_param("error")?;
                let task = self
                    .coordinator()
                    .fail_task(request.str_param("task_id")?, &agent_id, error)
                    .await?;
                to_value(&task)
            }
            "cancel_task" => {
                let task = self
                    .coordinator()
                    .cancel_task(request.str_param("task_id")?, &agent_id)
                    .await?;
                to_value(&task)
            }
            "get_task" => {
                let task = self.coordinator().get_task(request.str_param("task_id")?)?;
                if !task.involves(&agent_id) {
                    return Err(ProtocolError::invalid_request(format!(
                        "{} is not a party to task {}",
                        agent_id, task.id
                    )));
                }
                to_value(&task)
            }
            "get_agent_tasks" => {
                let status = request
                    .opt_str_param("status")
                    .map(str::parse::<TaskStatus>)
                    .transpose()?;
                let tasks = self.coordinator().get_agent_tasks(&agent_id, status);
                Ok(json!({ "count": tasks.len(), "tasks": tasks }))
            }
            "payment_request" => self.payment_request(&agent_id, request).await,
            "settle_payment" => {
                let record = self
                    .manager
                    .payments()
                    .settle(request.str_param("request_id")?, &agent_id)
                    .await?;
                to_value(&record)
            }
            other => Err(ProtocolError::MethodNotFound(other.to_string())),
        }
    }

    async fn authenticate(&self, token: Option<&str>) -> Result<String> {
        let token = token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProtocolError::invalid_request("authentication required"))?;
        let principal = self.manager.dispatcher().identity().authenticate(token).await?;
        if !principal.is_active_agent() {
            return Err(ProtocolError::AgentNotFound(principal.agent_id));
        }
        Ok(principal.agent_id)
    }

    fn coordinator(&self) -> &agent_coordination::TaskCoordinator {
        self.manager.coordinator()
    }

    async fn ping(&self, agent_id: &str, request: &RpcRequest) -> Result<Value> {
        let message_id = match request.opt_str_param("to_agent_id") {
            Some(to) => {
                let message = Message::new(agent_id, to, MessageType::Ping);
                Some(self.manager.dispatcher().dispatch(message).await?.message_id)
            }
            None => None,
        };
        Ok(json!({
            "status": "ok",
            "agent_id": agent_id,
            "message_id": message_id,
            "timestamp": Utc::now(),
        }))
    }

    async fn capability_query(&self, agent_id: &str, request: &RpcRequest) -> Result<Value> {
        let to = request.str_param("to_agent_id")?;
        let message = Message::new(agent_id, to, MessageType::CapabilityQuery);
        let receipt = self.manager.dispatcher().dispatch(message).await?;
        let capabilities = self.manager.registry().get_capabilities(to).ok();
        Ok(json!({
            "message_id": receipt.message_id,
            "agent_id": to,
            "capabilities": capabilities,
        }))
    }

    fn register_capabilities(&self, agent_id: &str, request: &RpcRequest) -> Result<Value> {
        let mut params = match &request.params {
            Value::Object(map) => map.clone(),
            _ => return Err(ProtocolError::invalid_params("params must be an object")),
        };
        let endpoint = match params.remove("endpoint") {
            Some(Value::String(endpoint)) => endpoint,
            Some(_) => return Err(ProtocolError::invalid_params("parameter 'endpoint' must be a string")),
            None => format!("a2a://{}", agent_id),
        };
        let pricing = params.remove("pricing");

        let mut record: CapabilityRecord = serde_json::from_value(Value::Object(params))
            .map_err(|e| ProtocolError::invalid_params(e.to_string()))?;
        if let Some(pricing) = pricing {
            record.metadata.insert("pricing".to_string(), pricing);
        }

        let descriptor = self.manager.register_agent(agent_id, record, endpoint)?;
        Ok(json!({
            "agent_id": agent_id,
            "service_id": descriptor.service_id,
            "services": descriptor.capabilities,
            "endpoint": descriptor.endpoint,
        }))
    }

    async fn discover(&self, request: &RpcRequest) -> Result<Value> {
        let query = match (request.opt_str_param("capability"), request.params.get("capabilities")) {
            (Some(capability), _) => DiscoveryQuery::from(capability),
            (None, Some(_)) => DiscoveryQuery::AllOf(request.typed_param("capabilities")?),
            (None, None) => {
                return Err(ProtocolError::invalid_params(
                    "parameter 'capability' or 'capabilities' is required",
                ))
            }
        };
        let result = self.manager.discover_services(query).await?;
        to_value(&result)
    }

    async fn service_request(&self, agent_id: &str, request: &RpcRequest) -> Result<Value> {
        let service = request.str_param("service")?;
        let parameters = request.params.get("parameters").cloned().unwrap_or_else(|| json!({}));

        let message = match request.opt_str_param("to_agent_id") {
            Some(to) => Message::new(agent_id, to, MessageType::ServiceRequest),
            None => Message::to_capability(agent_id, service, MessageType::ServiceRequest),
        }
        .with_field("service", json!(service))
        .with_field("parameters", parameters);

        let receipt = self.manager.dispatcher().dispatch(message).await?;
        to_value(&receipt)
    }

    async fn send_message(&self, agent_id: &str, request: &RpcRequest) -> Result<Value> {
        let message_type: MessageType = request.str_param("message_type")?.parse()?;

        let mut message = match (request.opt_str_param("to_agent_id"), request.opt_str_param("capability")) {
            (Some(to), _) => Message::new(agent_id, to, message_type),
            (None, Some(capability)) => Message::to_capability(agent_id, capability, message_type),
            (None, None) => {
                return Err(ProtocolError::invalid_params(
                    "parameter 'to_agent_id' or 'capability' is required",
                ))
            }
        };

        if let Some(content) = request.opt_str_param("content") {
            message = message.with_content(content);
        }
        if request.params.get("payload").is_some() {
            message = message.with_payload(request.typed_param::<Map<String, Value>>("payload")?);
        }
        if let Some(original) = request.opt_str_param("response_to") {
            message = message.with_response_to(original);
        }
        if let Some(reference) = request.opt_str_param("transaction_ref") {
            message = message.with_transaction_ref(reference);
        }
        if request.params.get("priority").is_some() {
            message = message.with_priority(request.typed_param::<Priority>("priority")?);
        }
        if request.params.get("expires_at").is_some() {
            message = message.with_expiry(request.typed_param::<DateTime<Utc>>("expires_at")?);
        }

        let receipt = self.manager.dispatcher().dispatch(message).await?;
        to_value(&receipt)
    }

    async fn delegate_task(&self, agent_id: &str, request: &RpcRequest) -> Result<Value> {
        let to = request.str_param("to_agent_id")?;
        let mut spec = TaskSpec::new(request.str_param("task_name")?);
        if let Some(description) = request.opt_str_param("description") {
            spec = spec.with_description(description);
        }
        if let Some(parameters) = request.params.get("parameters") {
            spec = spec.with_parameters(parameters.clone());
        }
        if request.params.get("required_capabilities").is_some() {
            spec = spec.with_required_capabilities(request.typed_param::<Vec<String>>("required_capabilities")?);
        }

        let task = self.coordinator().delegate_task(agent_id, to, spec).await?;
        to_value(&task)
    }

    async fn complete_task(&self, agent_id: &str, request: &RpcRequest) -> Result<Value> {
        let task_id = request.str_param("task_id")?;
        let task = self.coordinator().get_task(task_id)?;
        if task.assignee_id != agent_id {
            return Err(ProtocolError::invalid_request(format!(
                "only {} may complete task {}",
                task.assignee_id, task_id
            )));
        }

        let result = request.params.get("result").cloned().unwrap_or(Value::Null);
        let notes = request.opt_str_param("notes").map(str::to_string);
        let task = self.coordinator().complete_task(task_id, result, notes).await?;
        to_value(&task)
    }

    async fn payment_request(&self, agent_id: &str, request: &RpcRequest) -> Result<Value> {
        let payer = request.str_param("to_agent_id")?;
        let amount: f64 = request.typed_param("amount")?;
        let currency = request.str_param("currency")?;
        let description = request.opt_str_param("description").unwrap_or_default();

        let record = self
            .manager
            .payments()
            .request_payment(agent_id, payer, amount, currency, description)
            .await?;
        to_value(&record)
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
