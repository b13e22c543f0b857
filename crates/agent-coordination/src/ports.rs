//! Collaborators the coordinator calls out to

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use agent_comms::{ProtocolError, Result};

/// Reputation ledger
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Add points, returning the agent's new total
    async fn award_points(&self, agent_id: &str, amount: u64, reason: &str) -> Result<u64>;

    async fn get_points(&self, agent_id: &str) -> Result<u64>;
}

/// Issues a verifiable record of completed work
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Returns a reference to the issued asset
    async fn issue_certificate(&self, agent_id: &str, service: &str, metadata: &Value) -> Result<String>;
}

/// Moves value between agents
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Returns the transaction reference
    async fn transfer(&self, from: &str, to: &str, amount: f64, currency: &str) -> Result<String>;
}

/// Provider for deployments without a payment backend; every transfer fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPayments;

#[async_trait]
impl PaymentProvider for NoPayments {
    async fn transfer(&self, _from: &str, _to: &str, _amount: f64, _currency: &str) -> Result<String> {
        Err(ProtocolError::PaymentFailed("no payment provider configured".to_string()))
    }
}

/// Reputation points held in memory
#[derive(Clone, Default)]
pub struct InMemoryReputation {
    points: Arc<DashMap<String, u64>>,
}

impl InMemoryReputation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self, agent_id: &str) -> u64 {
        self.points.get(agent_id).map(|p| *p).unwrap_or(0)
    }
}

#[async_trait]
impl ReputationProvider for InMemoryReputation {
    async fn award_points(&self, agent_id: &str, amount: u64, reason: &str) -> Result<u64> {
        let mut total = self.points.entry(agent_id.to_string()).or_insert(0);
        *total = total.saturating_add(amount);
        tracing::debug!("Awarded {} points to {} ({})", amount, agent_id, reason);
        Ok(*total)
    }

    async fn get_points(&self, agent_id: &str) -> Result<u64> {
        Ok(self.points(agent_id))
    }
}

/// Balances held in memory, keyed by agent and currency
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    balances: Arc<DashMap<(String, String), f64>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, agent_id: &str, currency: &str, amount: f64) {
        *self
            .balances
            .entry((agent_id.to_string(), currency.to_string()))
            .or_insert(0.0) += amount;
    }

    pub fn balance(&self, agent_id: &str, currency: &str) -> f64 {
        self.balances
            .get(&(agent_id.to_string(), currency.to_string()))
            .map(|b| *b)
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl PaymentProvider for InMemoryLedger {
    async fn transfer(&self, from: &str, to: &str, amount: f64, currency: &str) -> Result<String> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ProtocolError::PaymentFailed(format!("invalid amount {}", amount)));
        }

        {
            let mut balance = self
                .balances
                .get_mut(&(from.to_string(), currency.to_string()))
                .ok_or_else(|| ProtocolError::InsufficientFunds(format!("{} has no {} balance", from, currency)))?;
            if *balance < amount {
                return Err(ProtocolError::InsufficientFunds(format!(
                    "{} holds {} {}, needs {}",
                    from, *balance, currency, amount
                )));
            }
            *balance -= amount;
        }
        self.deposit(to, currency, amount);

        Ok(format!("tx-{}", uuid::Uuid::new_v4()))
    }
}
