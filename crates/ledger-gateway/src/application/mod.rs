//! # Application Layer
//!
//! Pipelines composed from the domain, algorithms and outbound ports:
//!
//! ```text
//! Contract ─→ Transaction ─┬─→ EndorsementCoordinator ─→ PeerTransport
//!                          ├─→ CommitSubmitter ────────→ OrdererTransport
//!                          ├─→ CommitHandler ─→ EventSubscription ─→ EventStreamConnector
//!                          └─→ QueryHandler ───────────→ PeerTransport
//! ```

pub mod commit;
pub mod endorsement;
pub mod events;
pub mod network;
pub mod query;
pub mod strategies;
pub mod transaction;

pub use commit::CommitSubmitter;
pub use endorsement::EndorsementCoordinator;
pub use events::EventSubscription;
pub use network::{Contract, Network, NetworkBuilder};
pub use query::{QueryDispatcher, QueryHandler, QueryStrategy};
pub use strategies::{
    CommitContext, CommitHandler, CommitHandlerFactory, CommitStrategy, NoWaitHandler,
    TxEventHandler, WaitMode,
};
pub use transaction::Transaction;
