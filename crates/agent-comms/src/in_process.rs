//! In-process notification transport using Tokio channels

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{Message, MessageTransport, ProtocolError, Result};

/// In-process message transport
///
/// Uses Tokio channels for fast, in-memory notification of agents that
/// live in the same process.
#[derive(Clone, Default)]
pub struct InProcessTransport {
    /// Agent mailboxes (agent_id -> channel)
    mailboxes: Arc<DashMap<String, mpsc::UnboundedSender<Message>>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent's mailbox, replacing any previous listener
    pub fn register_mailbox(&self, agent_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.insert(agent_id.to_string(), tx);
        tracing::debug!("Registered mailbox for agent: {}", agent_id);
        rx
    }

    /// Drop an agent's mailbox
    pub fn unregister_mailbox(&self, agent_id: &str) -> bool {
        self.mailboxes.remove(agent_id).is_some()
    }

    pub fn has_mailbox(&self, agent_id: &str) -> bool {
        self.mailboxes.contains_key(agent_id)
    }
}

#[async_trait]
impl MessageTransport for InProcessTransport {
    async fn notify(&self, agent_id: &str, message: &Message) -> Result<()> {
        let sent = {
            let mailbox = self
                .mailboxes
                .get(agent_id)
                .ok_or_else(|| ProtocolError::AgentNotFound(agent_id.to_string()))?;
            mailbox.send(message.clone())
        };

        if sent.is_err() {
            // Receiver dropped; forget the dead listener.
            self.mailboxes.remove(agent_id);
            return Err(ProtocolError::internal(format!(
                "mailbox for {} is closed",
                agent_id
            )));
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "in_process"
    }
}
