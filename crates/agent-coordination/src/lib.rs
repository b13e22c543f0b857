//! Agent Task Coordination
//!
//! Delegation of tasks between agents, reward hooks on completion, and the
//! request/settle payment exchange.

pub mod task;
pub mod ports;
pub mod coordinator;
pub mod payment;

// Re-exports
pub use task::{Task, TaskSpec, TaskStatus};
pub use ports::{
    CertificateIssuer, InMemoryLedger, InMemoryReputation, NoPayments, PaymentProvider,
    ReputationProvider,
};
pub use coordinator::TaskCoordinator;
pub use payment::{PaymentFlow, PaymentRecord, PaymentStatus};
