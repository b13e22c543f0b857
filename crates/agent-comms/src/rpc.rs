//! Request/response envelopes for the protocol endpoint

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ErrorObject, ProtocolError, Result};

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

/// Inbound protocol request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,

    pub method: String,

    #[serde(default)]
    pub params: Value,

    /// Echoed verbatim in the response
    pub id: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    /// Parse a raw request body
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| ProtocolError::Parse(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| ProtocolError::invalid_request(e.to_string()))
    }

    /// Read a required string parameter
    pub fn str_param(&self, key: &str) -> Result<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::invalid_params(format!("parameter '{}' is required", key)))
    }

    /// Read an optional string parameter
    pub fn opt_str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Deserialize a required structured parameter
    pub fn typed_param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self
            .params
            .get(key)
            .cloned()
            .ok_or_else(|| ProtocolError::invalid_params(format!("parameter '{}' is required", key)))?;
        serde_json::from_value(raw)
            .map_err(|e| ProtocolError::invalid_params(format!("parameter '{}': {}", key, e)))
    }
}

/// Outbound protocol response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,

    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: &ProtocolError) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            result: None,
            error: Some(error.to_error_object()),
            id,
        }
    }

    pub fn from_result(id: Value, result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::failure(id, &e),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_parse_request_defaults_version() {
        let req = RpcRequest::from_json(r#"{"method": "ping", "id": "test-ping-1"}"#).unwrap();
        assert_eq!(req.jsonrpc, "2.0");
        assert_eq!(req.id, json!("test-ping-1"));
        assert!(req.params.is_null());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(RpcRequest::from_json("{").unwrap_err().code(), ErrorCode::ParseError);
        assert_eq!(
            RpcRequest::from_json(r#"{"params": {}}"#).unwrap_err().code(),
            ErrorCode::InvalidRequest
        );
    }

    #[test]
    fn test_failure_echoes_id() {
        let err = ProtocolError::MethodNotFound("teleport".to_string());
        let resp = RpcResponse::failure(json!(7), &err);
        assert_eq!(resp.id, json!(7));
        assert!(resp.is_error());
        assert_eq!(resp.error.unwrap().code, ErrorCode::MethodNotFound);
    }

    #[test]
    fn test_params_accessors() {
        let req = RpcRequest::new("capability_query", json!({"to_agent_id": "alpha", "limit": 3}), 1);
        assert_eq!(req.str_param("to_agent_id").unwrap(), "alpha");
        assert_eq!(req.typed_param::<u32>("limit").unwrap(), 3);
        assert_eq!(req.str_param("service").unwrap_err().code(), ErrorCode::InvalidParams);
        assert_eq!(req.typed_param::<u32>("to_agent_id").unwrap_err().code(), ErrorCode::InvalidParams);
    }
}
