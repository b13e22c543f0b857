//! Notification transport trait

use async_trait::async_trait;

use crate::{Message, Result};

/// Transport used to notify an agent that a message reached its inbox
///
/// Implementations handle HOW the notification travels. The inbox is the
/// system of record; a failed notification never undoes a delivery.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Push a copy of a delivered message to the recipient
    async fn notify(&self, agent_id: &str, message: &Message) -> Result<()>;

    /// Get transport name
    fn name(&self) -> &str;
}

/// Transport that drops every notification
///
/// Agents poll their inbox instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

#[async_trait]
impl MessageTransport for NoopTransport {
    async fn notify(&self, _agent_id: &str, _message: &Message) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
