//! Protocol messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::{ProtocolError, Result};

/// Type of protocol message, grouped by phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Discovery
    CapabilityQuery,
    CapabilityResponse,

    // Negotiation
    ServiceRequest,
    ServiceOffer,
    NegotiationStart,
    NegotiationOffer,
    NegotiationAccept,
    NegotiationReject,

    // Task lifecycle
    TaskDelegation,
    TaskAcceptance,
    TaskRejection,
    TaskUpdate,
    TaskCompletion,

    // Payment
    PaymentRequest,
    PaymentConfirmation,
    PaymentRejection,

    // Reputation
    ReputationQuery,
    ReputationUpdate,

    // Liveness
    Ping,
    Pong,

    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 21] = [
        MessageType::CapabilityQuery,
        MessageType::CapabilityResponse,
        MessageType::ServiceRequest,
        MessageType::ServiceOffer,
        MessageType::NegotiationStart,
        MessageType::NegotiationOffer,
        MessageType::NegotiationAccept,
        MessageType::NegotiationReject,
        MessageType::TaskDelegation,
        MessageType::TaskAcceptance,
        MessageType::TaskRejection,
        MessageType::TaskUpdate,
        MessageType::TaskCompletion,
        MessageType::PaymentRequest,
        MessageType::PaymentConfirmation,
        MessageType::PaymentRejection,
        MessageType::ReputationQuery,
        MessageType::ReputationUpdate,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::CapabilityQuery => "capability_query",
            MessageType::CapabilityResponse => "capability_response",
            MessageType::ServiceRequest => "service_request",
            MessageType::ServiceOffer => "service_offer",
            MessageType::NegotiationStart => "negotiation_start",
            MessageType::NegotiationOffer => "negotiation_offer",
            MessageType::NegotiationAccept => "negotiation_accept",
            MessageType::NegotiationReject => "negotiation_reject",
            MessageType::TaskDelegation => "task_delegation",
            MessageType::TaskAcceptance => "task_acceptance",
            MessageType::TaskRejection => "task_rejection",
            MessageType::TaskUpdate => "task_update",
            MessageType::TaskCompletion => "task_completion",
            MessageType::PaymentRequest => "payment_request",
            MessageType::PaymentConfirmation => "payment_confirmation",
            MessageType::PaymentRejection => "payment_rejection",
            MessageType::ReputationQuery => "reputation_query",
            MessageType::ReputationUpdate => "reputation_update",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Error => "error",
        }
    }

    pub fn is_task_lifecycle(&self) -> bool {
        matches!(
            self,
            MessageType::TaskDelegation
                | MessageType::TaskAcceptance
                | MessageType::TaskRejection
                | MessageType::TaskUpdate
                | MessageType::TaskCompletion
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::MethodNotFound(s.to_string()))
    }
}

/// Delivery priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Who a message is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Recipient {
    /// A concrete agent
    Agent(String),

    /// Any healthy provider of a capability, resolved by the router
    Capability(String),
}

impl Recipient {
    /// The concrete agent id, if already resolved
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Recipient::Agent(id) => Some(id),
            Recipient::Capability(_) => None,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Agent(id) => write!(f, "agent:{}", id),
            Recipient::Capability(name) => write!(f, "capability:{}", name),
        }
    }
}

/// Protocol envelope exchanged between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID (for correlation)
    pub id: String,

    /// Sending agent ID
    pub sender_id: String,

    /// Addressee
    pub recipient: Recipient,

    /// Message type
    pub message_type: MessageType,

    /// Free-text content
    #[serde(default)]
    pub content: String,

    /// Structured payload
    #[serde(default)]
    pub payload: Map<String, Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Messages are rejected if delivered after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// External transaction reference for payment-carrying messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,

    /// ID of the message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Message {
    /// Create a new message to a concrete agent
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self::addressed(sender_id, Recipient::Agent(recipient_id.into()), message_type)
    }

    /// Create a message addressed to whichever agent serves a capability
    pub fn to_capability(
        sender_id: impl Into<String>,
        capability: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self::addressed(sender_id, Recipient::Capability(capability.into()), message_type)
    }

    fn addressed(sender_id: impl Into<String>, recipient: Recipient, message_type: MessageType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            recipient,
            message_type,
            content: String::new(),
            payload: Map::new(),
            created_at: Utc::now(),
            expires_at: None,
            transaction_ref: None,
            response_to: None,
            priority: Priority::Normal,
            metadata: Map::new(),
        }
    }

    /// Create a reply to `original`, addressed back to its sender
    pub fn reply_to(original: &Message, from: impl Into<String>, message_type: MessageType) -> Self {
        let mut reply = Self::new(from, original.sender_id.clone(), message_type);
        reply.response_to = Some(original.id.clone());
        reply
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Set a single payload field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_response_to(mut self, message_id: impl Into<String>) -> Self {
        self.response_to = Some(message_id.into());
        self
    }

    pub fn with_transaction_ref(mut self, reference: impl Into<String>) -> Self {
        self.transaction_ref = Some(reference.into());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Read a required string field from the payload
    pub fn payload_str(&self, key: &str) -> Result<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::invalid_params(format!("payload field '{}' is required", key)))
    }

    /// Parse an envelope from JSON
    ///
    /// Malformed JSON is a parse error, an unknown `message_type` is
    /// method-not-found, and any other structural problem is an invalid
    /// request.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| ProtocolError::Parse(e.to_string()))?;

        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::invalid_request("envelope must be a JSON object"))?;
        let type_name = obj
            .get("message_type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::invalid_request("envelope is missing message_type"))?;
        type_name.parse::<MessageType>()?;

        serde_json::from_value(value).map_err(|e| ProtocolError::invalid_request(e.to_string()))
    }
}
