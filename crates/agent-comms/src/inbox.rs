//! Per-agent inbound queues

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::{Message, ProtocolError, Result};

/// A delivered message and its acknowledgement state
#[derive(Debug, Clone)]
pub struct InboxEntry {
    pub message: Message,
    pub delivered_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl InboxEntry {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Inbound message store, one queue per agent
#[derive(Clone, Default)]
pub struct InboxStore {
    queues: Arc<DashMap<String, Vec<InboxEntry>>>,
}

impl InboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to an agent's queue
    pub fn deliver(&self, agent_id: &str, message: Message) {
        tracing::debug!(
            "Delivering {} {} to inbox of {}",
            message.message_type,
            message.id,
            agent_id
        );
        self.queues
            .entry(agent_id.to_string())
            .or_default()
            .push(InboxEntry {
                message,
                delivered_at: Utc::now(),
                processed_at: None,
            });
    }

    /// Unprocessed messages, highest priority first, then delivery order
    pub fn pending(&self, agent_id: &str) -> Vec<Message> {
        let mut pending: Vec<Message> = self
            .queues
            .get(agent_id)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|entry| !entry.is_processed())
                    .map(|entry| entry.message.clone())
                    .collect()
            })
            .unwrap_or_default();

        // Stable sort keeps delivery order within a priority band
        pending.sort_by(|a, b| b.priority.cmp(&a.priority));
        pending
    }

    /// Everything ever delivered to an agent, in delivery order
    pub fn entries(&self, agent_id: &str) -> Vec<InboxEntry> {
        self.queues
            .get(agent_id)
            .map(|queue| queue.clone())
            .unwrap_or_default()
    }

    /// Acknowledge a message; acknowledging twice is a no-op
    pub fn mark_processed(&self, agent_id: &str, message_id: &str) -> Result<()> {
        let mut queue = self.queues.get_mut(agent_id).ok_or_else(|| {
            ProtocolError::invalid_params(format!("no message {} for agent {}", message_id, agent_id))
        })?;

        let entry = queue
            .iter_mut()
            .find(|entry| entry.message.id == message_id)
            .ok_or_else(|| {
                ProtocolError::invalid_params(format!("no message {} for agent {}", message_id, agent_id))
            })?;

        if entry.processed_at.is_none() {
            entry.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Drop acknowledged messages, returning how many were removed
    pub fn purge_processed(&self, agent_id: &str) -> usize {
        self.queues
            .get_mut(agent_id)
            .map(|mut queue| {
                let before = queue.len();
                queue.retain(|entry| !entry.is_processed());
                before - queue.len()
            })
            .unwrap_or(0)
    }

    /// Drop acknowledged messages from every queue
    pub fn purge_all_processed(&self) -> usize {
        self.queues
            .iter_mut()
            .map(|mut queue| {
                let before = queue.len();
                queue.retain(|entry| !entry.is_processed());
                before - queue.len()
            })
            .sum()
    }

    /// Find a delivered message by id in an agent's queue
    pub fn find(&self, agent_id: &str, message_id: &str) -> Option<Message> {
        self.queues.get(agent_id).and_then(|queue| {
            queue
                .iter()
                .find(|entry| entry.message.id == message_id)
                .map(|entry| entry.message.clone())
        })
    }

    pub fn len(&self, agent_id: &str) -> usize {
        self.queues.get(agent_id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, agent_id: &str) -> bool {
        self.len(agent_id) == 0
    }
}
