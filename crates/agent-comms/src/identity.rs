//! Identity port
//!
//! Authentication and principal issuance live outside the service layer.
//! The dispatcher only needs to know whether a sender is an active agent.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{ProtocolError, Result};

/// Kind of authenticated principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Agent,
    User,
    Service,
}

/// An authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub agent_id: String,
    pub kind: PrincipalKind,
    #[serde(default)]
    pub revoked: bool,
}

impl Principal {
    pub fn agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: PrincipalKind::Agent,
            revoked: false,
        }
    }

    /// Whether this principal may take part in the protocol
    pub fn is_active_agent(&self) -> bool {
        self.kind == PrincipalKind::Agent && !self.revoked
    }
}

/// Identity collaborator
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange a credential token for a principal
    async fn authenticate(&self, token: &str) -> Result<Principal>;

    /// Look up a principal by agent id
    async fn resolve(&self, agent_id: &str) -> Option<Principal>;
}

/// Identity provider backed by in-memory tables
///
/// Useful for embedding and tests; tokens map 1:1 to principals.
#[derive(Clone, Default)]
pub struct InMemoryIdentity {
    principals: Arc<DashMap<String, Principal>>,
    tokens: Arc<DashMap<String, String>>,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent principal reachable by `token`
    pub fn add_agent(&self, agent_id: impl Into<String>, token: impl Into<String>) {
        let agent_id = agent_id.into();
        self.tokens.insert(token.into(), agent_id.clone());
        self.principals.insert(agent_id.clone(), Principal::agent(agent_id));
    }

    /// Add an arbitrary principal
    pub fn add_principal(&self, principal: Principal, token: impl Into<String>) {
        self.tokens.insert(token.into(), principal.agent_id.clone());
        self.principals.insert(principal.agent_id.clone(), principal);
    }

    /// Revoke an agent; later lookups report it as revoked
    pub fn revoke(&self, agent_id: &str) -> bool {
        match self.principals.get_mut(agent_id) {
            Some(mut principal) => {
                principal.revoked = true;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentity {
    async fn authenticate(&self, token: &str) -> Result<Principal> {
        let agent_id = self
            .tokens
            .get(token)
            .map(|id| id.clone())
            .ok_or_else(|| ProtocolError::AgentNotFound("unknown credential".to_string()))?;

        self.principals
            .get(&agent_id)
            .map(|p| p.clone())
            .ok_or(ProtocolError::AgentNotFound(agent_id))
    }

    async fn resolve(&self, agent_id: &str) -> Option<Principal> {
        self.principals.get(agent_id).map(|p| p.clone())
    }
}
