//! Health transitions broadcast to subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A change in a service's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthEvent {
    ServiceBecameUnhealthy {
        service_id: String,
        consecutive_failures: u32,
        last_error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    ServiceRecovered {
        service_id: String,
        timestamp: DateTime<Utc>,
    },

    ServiceRemoved {
        service_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl HealthEvent {
    pub fn service_id(&self) -> &str {
        match self {
            HealthEvent::ServiceBecameUnhealthy { service_id, .. }
            | HealthEvent::ServiceRecovered { service_id, .. }
            | HealthEvent::ServiceRemoved { service_id, .. } => service_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            HealthEvent::ServiceBecameUnhealthy { timestamp, .. }
            | HealthEvent::ServiceRecovered { timestamp, .. }
            | HealthEvent::ServiceRemoved { timestamp, .. } => *timestamp,
        }
    }
}

/// Fan-out of health events
///
/// Sending never blocks. Subscribers that fall behind see `Lagged`.
#[derive(Clone)]
pub struct HealthEvents {
    sender: broadcast::Sender<HealthEvent>,
}

impl HealthEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Broadcast an event; dropped if nobody is listening
    pub fn emit(&self, event: HealthEvent) {
        tracing::debug!(
            "Health event: {}",
            serde_json::to_string(&event).unwrap_or_default()
        );
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for HealthEvents {
    fn default() -> Self {
        Self::new(256)
    }
}
