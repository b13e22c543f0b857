//! Agent Communication Layer
//!
//! The protocol envelope, error model and delivery path shared by every
//! service layer component.
//!
//! # Example
//!
//! ```no_run
//! use agent_comms::{InMemoryIdentity, Message, MessageDispatcher, MessageType};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = Arc::new(InMemoryIdentity::new());
//!     identity.add_agent("agent-1", "token-1");
//!     identity.add_agent("agent-2", "token-2");
//!
//!     let dispatcher = MessageDispatcher::new(identity);
//!     let ping = Message::new("agent-1", "agent-2", MessageType::Ping);
//!     dispatcher.dispatch(ping).await?;
//!
//!     assert_eq!(dispatcher.inbox().pending("agent-2").len(), 1);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod message;
pub mod transport;
pub mod inbox;
pub mod identity;
pub mod dispatcher;
pub mod rpc;

// In-process transport
pub mod in_process;

// Re-exports
pub use error::{ErrorCode, ErrorObject, ProtocolError, Result};
pub use message::{Message, MessageType, Priority, Recipient};
pub use transport::{MessageTransport, NoopTransport};
pub use inbox::{InboxEntry, InboxStore};
pub use identity::{IdentityProvider, InMemoryIdentity, Principal, PrincipalKind};
pub use dispatcher::{CapabilityResolver, DeliveryReceipt, MessageDispatcher, NoCapabilities};
pub use rpc::{RpcRequest, RpcResponse};

pub use in_process::InProcessTransport;
