//! # Ledger Gateway
//!
//! Client-side gateway to a permissioned ledger network.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Drive a transaction through its lifecycle against remote peers:
//! - Endorsement fan-out to the selected peers, valid/invalid split
//! - Submission of the endorsed transaction to the ordering service
//! - Commit confirmation through per-peer block event streams
//! - Read-only queries with sticky single-peer failover
//!
//! ## Event Streams
//!
//! | Concern | Behavior |
//! |---------|----------|
//! | Sharing | Live listeners on one peer share a stream; each replay gets its own |
//! | Reconnect | Exponential backoff, resume after the last dispatched block |
//! | Checkpoints | Replay resumes from the listener's checkpoint |
//! | Windows | `end_block` completes the listener; an early end marker fails it |
//!
//! ## Module Structure
//!
//! ```text
//! ledger-gateway/
//! ├── domain/          # Proposal, responses, notifications, checkpoints, errors
//! ├── algorithms/      # Target precedence, reconciliation, backoff, resume
//! ├── ports/           # API traits (inbound) + transport traits (outbound)
//! ├── adapters/        # Channel topology, checkpointers
//! ├── application/     # Pipelines, event subscription, Network/Contract
//! ├── config.rs        # GatewayConfig
//! └── telemetry.rs     # Tracing subscriber setup
//! ```

#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use adapters::{ChannelTopology, FileCheckpointer, InMemoryCheckpointer};
pub use application::{
    CommitHandler, CommitHandlerFactory, CommitStrategy, Contract, EventSubscription, Network,
    NetworkBuilder, QueryHandler, QueryStrategy, Transaction,
};
pub use config::{CommitScope, GatewayConfig, QueryScope, ReconnectPolicy};
pub use domain::{
    BlockEvent, BlockNotification, Checkpoint, CommitEvent, ConnectionState, EndorsementResponse,
    EndorsementTargets, GatewayError, GatewayResult, Identity, ListenerEvent, PeerInfo, PeerRoles,
    Proposal, ProposalArg, ProposalResponse, StartPosition, TransactionId,
    TransactionNotification, TransportError, COMMIT_SUCCESS, SUCCESS_STATUS, VALID_CODE,
};
pub use ports::{
    listener_fn, Checkpointer, ContractApi, DiscoveryProvider, EventApi, EventStreamConnector,
    ListenerCallback, ListenerHandle, ListenerOptions, NotificationStream, OrdererTransport,
    PeerTransport, TxFilter,
};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
