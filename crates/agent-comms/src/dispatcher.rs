//! Inbound message dispatch
//!
//! Validation runs in a fixed order: sender identity, message type,
//! capability resolution, expiry, correlation. Only a message that passes
//! every step reaches the recipient's inbox.

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    IdentityProvider, InboxStore, Message, MessageTransport, NoopTransport, ProtocolError,
    Recipient, Result,
};

/// Resolves a capability name to the agent that should receive a message
pub trait CapabilityResolver: Send + Sync {
    fn resolve_capability(&self, capability: &str) -> Result<String>;
}

/// Resolver with no candidates; every capability is unserved
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl CapabilityResolver for NoCapabilities {
    fn resolve_capability(&self, capability: &str) -> Result<String> {
        Err(ProtocolError::ServiceNotFound(capability.to_string()))
    }
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub recipient_id: String,
    pub delivered_at: DateTime<Utc>,
    /// Whether the best-effort notification went through
    pub notified: bool,
}

/// The two agents a message was exchanged between
#[derive(Debug, Clone, PartialEq, Eq)]
struct Participants {
    sender: String,
    recipient: String,
}

impl Participants {
    fn same_conversation(&self, a: &str, b: &str) -> bool {
        (self.sender == a && self.recipient == b) || (self.sender == b && self.recipient == a)
    }
}

/// How long a message stays available as a `response_to` target
pub const DEFAULT_CONVERSATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on remembered messages
pub const MAX_TRACKED_MESSAGES: u64 = 100_000;

fn conversation_cache(ttl: Duration) -> Cache<String, Participants> {
    Cache::builder()
        .max_capacity(MAX_TRACKED_MESSAGES)
        .time_to_live(ttl)
        .build()
}

/// Validates and delivers protocol messages
pub struct MessageDispatcher {
    identity: Arc<dyn IdentityProvider>,
    resolver: Arc<dyn CapabilityResolver>,
    transport: Arc<dyn MessageTransport>,
    inbox: InboxStore,
    /// message id -> participants, for `response_to` checks
    conversations: Cache<String, Participants>,
}

impl MessageDispatcher {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            resolver: Arc::new(NoCapabilities),
            transport: Arc::new(NoopTransport),
            inbox: InboxStore::new(),
            conversations: conversation_cache(DEFAULT_CONVERSATION_TTL),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CapabilityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replies to messages older than `ttl` are rejected
    pub fn with_conversation_ttl(mut self, ttl: Duration) -> Self {
        self.conversations = conversation_cache(ttl);
        self
    }

    pub fn with_inbox(mut self, inbox: InboxStore) -> Self {
        self.inbox = inbox;
        self
    }

    pub fn inbox(&self) -> &InboxStore {
        &self.inbox
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    /// Whether a message id has been dispatched through this instance
    pub fn is_known(&self, message_id: &str) -> bool {
        self.conversations.contains_key(message_id)
    }

    /// Parse a raw envelope and dispatch it
    pub async fn dispatch_json(&self, raw: &str) -> Result<DeliveryReceipt> {
        let message = Message::from_json(raw)?;
        self.dispatch(message).await
    }

    /// Dispatch on behalf of the holder of `token`
    ///
    /// The credential must belong to an active agent and match the sender.
    pub async fn dispatch_authenticated(&self, token: &str, message: Message) -> Result<DeliveryReceipt> {
        let principal = self.identity.authenticate(token).await?;
        if !principal.is_active_agent() {
            return Err(ProtocolError::AgentNotFound(principal.agent_id));
        }
        if principal.agent_id != message.sender_id {
            return Err(ProtocolError::invalid_request(format!(
                "credential belongs to {}, message claims sender {}",
                principal.agent_id, message.sender_id
            )));
        }
        self.dispatch(message).await
    }

    /// Validate and deliver a message
    pub async fn dispatch(&self, mut message: Message) -> Result<DeliveryReceipt> {
        self.verify_agent(&message.sender_id).await?;

        let recipient_id = match &message.recipient {
            Recipient::Agent(id) => {
                self.verify_agent(id).await?;
                id.clone()
            }
            Recipient::Capability(capability) => {
                let agent_id = self.resolver.resolve_capability(capability)?;
                tracing::debug!("Resolved capability '{}' to agent {}", capability, agent_id);
                message
                    .metadata
                    .insert("resolved_capability".to_string(), capability.clone().into());
                message.recipient = Recipient::Agent(agent_id.clone());
                agent_id
            }
        };

        let now = Utc::now();
        if let Some(expired_at) = message.expires_at.filter(|at| *at <= now) {
            tracing::debug!("Rejecting expired message {}", message.id);
            return Err(ProtocolError::MessageExpired {
                message_id: message.id,
                expired_at,
            });
        }

        if let Some(original) = &message.response_to {
            let known = self
                .conversations
                .get(original.as_str())
                .is_some_and(|p| p.same_conversation(&message.sender_id, &recipient_id));
            if !known {
                return Err(ProtocolError::invalid_request(format!(
                    "response_to {} does not reference a message between {} and {}",
                    original, message.sender_id, recipient_id
                )));
            }
        }

        self.conversations.insert(
            message.id.clone(),
            Participants {
                sender: message.sender_id.clone(),
                recipient: recipient_id.clone(),
            },
        );
        self.inbox.deliver(&recipient_id, message.clone());

        // Best effort: the inbox already holds the message.
        let notified = match self.transport.notify(&recipient_id, &message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Notification of {} via {} failed, dropping: {}",
                    recipient_id,
                    self.transport.name(),
                    e
                );
                false
            }
        };

        Ok(DeliveryReceipt {
            message_id: message.id,
            recipient_id,
            delivered_at: now,
            notified,
        })
    }

    async fn verify_agent(&self, agent_id: &str) -> Result<()> {
        match self.identity.resolve(agent_id).await {
            Some(principal) if principal.is_active_agent() => Ok(()),
            _ => Err(ProtocolError::AgentNotFound(agent_id.to_string())),
        }
    }
}
