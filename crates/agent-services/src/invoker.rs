//! Service execution port

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use agent_comms::{ProtocolError, Result};
use agent_registry::ServiceDescriptor;

/// Executes a capability on a resolved service
#[async_trait]
pub trait ServiceInvoker: Send + Sync {
    async fn invoke(&self, service: &ServiceDescriptor, capability: &str, params: Value) -> Result<Value>;
}

/// Invoker for layers that only coordinate and never execute
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInvoker;

#[async_trait]
impl ServiceInvoker for NoInvoker {
    async fn invoke(&self, service: &ServiceDescriptor, capability: &str, _params: Value) -> Result<Value> {
        Err(ProtocolError::internal(format!(
            "no invoker configured to run '{}' on {}",
            capability, service.service_id
        )))
    }
}

/// In-process implementation of a service
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, capability: &str, params: Value) -> Result<Value>;
}

/// Invoker that calls handlers registered in this process by service id
///
/// Clones share the same handler table.
#[derive(Clone, Default)]
pub struct LocalInvoker {
    handlers: Arc<DashMap<String, Arc<dyn ServiceHandler>>>,
}

impl LocalInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the service
    pub fn register<H: ServiceHandler + 'static>(&self, service_id: impl Into<String>, handler: H) {
        let service_id = service_id.into();
        tracing::debug!("Registered local handler for {}", service_id);
        self.handlers.insert(service_id, Arc::new(handler));
    }

    pub fn unregister(&self, service_id: &str) -> bool {
        self.handlers.remove(service_id).is_some()
    }

    pub fn has_handler(&self, service_id: &str) -> bool {
        self.handlers.contains_key(service_id)
    }
}

#[async_trait]
impl ServiceInvoker for LocalInvoker {
    async fn invoke(&self, service: &ServiceDescriptor, capability: &str, params: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(&service.service_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ProtocolError::ServiceNotFound(service.service_id.clone()))?;

        tracing::debug!("Invoking '{}' on {}", capability, service.service_id);
        handler.handle(capability, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_comms::ErrorCode;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ServiceHandler for Echo {
        async fn handle(&self, capability: &str, params: Value) -> Result<Value> {
            Ok(json!({ "capability": capability, "params": params }))
        }
    }

    #[tokio::test]
    async fn test_local_invoker_routes_by_service_id() {
        let invoker = LocalInvoker::new();
        invoker.register("svc-a", Echo);
        let service = ServiceDescriptor::new("a", vec!["echo"], "mem://a");

        let out = invoker.invoke(&service, "echo", json!({"x": 1})).await.unwrap();
        assert_eq!(out["capability"], "echo");
        assert_eq!(out["params"]["x"], 1);

        assert!(invoker.unregister("svc-a"));
        let err = invoker.invoke(&service, "echo", json!({})).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServiceNotFound);
    }

    #[tokio::test]
    async fn test_no_invoker_fails() {
        let service = ServiceDescriptor::new("a", vec!["echo"], "mem://a");
        let err = NoInvoker.invoke(&service, "echo", json!({})).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
