//! Protocol error model
//!
//! Every failure surfaced by the service layer maps to one stable numeric
//! [`ErrorCode`]. Callers branch on the code; message text is for humans.

use agent_core::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Result type for service layer operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Stable numeric error codes (JSON-RPC 2.0 compatible)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    AgentNotFound,
    ServiceNotFound,
    TaskNotFound,
    PaymentFailed,
    InsufficientFunds,
    MessageExpired,
    InvalidState,
    Timeout,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 13] = [
        ErrorCode::ParseError,
        ErrorCode::InvalidRequest,
        ErrorCode::MethodNotFound,
        ErrorCode::InvalidParams,
        ErrorCode::InternalError,
        ErrorCode::AgentNotFound,
        ErrorCode::ServiceNotFound,
        ErrorCode::TaskNotFound,
        ErrorCode::PaymentFailed,
        ErrorCode::InsufficientFunds,
        ErrorCode::MessageExpired,
        ErrorCode::InvalidState,
        ErrorCode::Timeout,
    ];

    pub fn as_i32(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::AgentNotFound => -32001,
            ErrorCode::ServiceNotFound => -32002,
            ErrorCode::TaskNotFound => -32003,
            ErrorCode::PaymentFailed => -32004,
            ErrorCode::InsufficientFunds => -32005,
            ErrorCode::MessageExpired => -32006,
            ErrorCode::InvalidState => -32007,
            ErrorCode::Timeout => -32008,
        }
    }

    /// Whether a caller may reasonably retry after a backoff
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::AgentNotFound
                | ErrorCode::ServiceNotFound
                | ErrorCode::TaskNotFound
                | ErrorCode::Timeout
        )
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.as_i32()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_i32() == value)
            .ok_or_else(|| format!("unknown error code {}", value))
    }
}

/// Errors in the agent service layer
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed envelope
    #[error("Parse error: {0}")]
    Parse(String),

    /// Structurally invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown message type or method
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Missing or malformed payload fields
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Agent not found (or principal is not an agent)
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// No healthy service offers the capability
    #[error("No service available for capability: {0}")]
    ServiceNotFound(String),

    /// Task not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Message expired before delivery
    #[error("Message {message_id} expired at {expired_at}")]
    MessageExpired {
        message_id: String,
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    /// Payment collaborator refused the transfer
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// Payer cannot cover the amount
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Externally dispatched call exceeded its time budget
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Downstream service failed while executing a routed call
    #[error("Service {service_id} failed executing '{capability}': {reason}")]
    ExecutionFailed {
        capability: String,
        service_id: String,
        reason: String,
    },

    /// Unexpected failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error from agent-core
    #[error(transparent)]
    CoreError(#[from] AgentError),
}

impl ProtocolError {
    /// Create an invalid params error
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// The stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Parse(_) => ErrorCode::ParseError,
            ProtocolError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ProtocolError::MethodNotFound(_) => ErrorCode::MethodNotFound,
            ProtocolError::InvalidParams(_) => ErrorCode::InvalidParams,
            ProtocolError::AgentNotFound(_) => ErrorCode::AgentNotFound,
            ProtocolError::ServiceNotFound(_) => ErrorCode::ServiceNotFound,
            ProtocolError::TaskNotFound(_) => ErrorCode::TaskNotFound,
            ProtocolError::InvalidState(_) => ErrorCode::InvalidState,
            ProtocolError::MessageExpired { .. } => ErrorCode::MessageExpired,
            ProtocolError::PaymentFailed(_) => ErrorCode::PaymentFailed,
            ProtocolError::InsufficientFunds(_) => ErrorCode::InsufficientFunds,
            ProtocolError::Timeout(_) => ErrorCode::Timeout,
            ProtocolError::ExecutionFailed { .. } => ErrorCode::InternalError,
            ProtocolError::Internal(_) => ErrorCode::InternalError,
            ProtocolError::Serialization(_) => ErrorCode::InternalError,
            ProtocolError::CoreError(_) => ErrorCode::InternalError,
        }
    }

    /// Structured detail attached to the error response
    pub fn data(&self) -> Option<Value> {
        match self {
            ProtocolError::ExecutionFailed {
                capability,
                service_id,
                ..
            } => Some(json!({ "capability": capability, "service_id": service_id })),
            ProtocolError::MessageExpired {
                message_id,
                expired_at,
            } => Some(json!({ "message_id": message_id, "expired_at": expired_at })),
            ProtocolError::Timeout(after) => {
                Some(json!({ "timeout_ms": after.as_millis() as u64 }))
            }
            _ => None,
        }
    }

    /// Render as a wire error object
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code(),
            message: self.to_string(),
            data: self.data(),
        }
    }
}

/// Error as carried in protocol responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&ProtocolError> for ErrorObject {
    fn from(err: &ProtocolError) -> Self {
        err.to_error_object()
    }
}
