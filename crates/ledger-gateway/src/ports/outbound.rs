//! # Outbound Ports
//!
//! Narrow interfaces to the collaborators this core consumes: the wire
//! transport, checkpoint storage and the discovery service.

use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;

use crate::domain::{
    BlockNotification, Checkpoint, GatewayResult, PeerInfo, Proposal, ProposalResponse,
    StartPosition, TransactionEnvelope, TransportError,
};

/// Ordered notifications from one event stream. The stream ending means the
/// connection dropped.
pub type NotificationStream =
    Pin<Box<dyn Stream<Item = Result<BlockNotification, TransportError>> + Send>>;

/// Proposal transport to endorsing peers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send a proposal to one peer.
    ///
    /// A peer that ran the chaincode answers `Ok` even on chaincode failure;
    /// the status code carries the verdict.
    async fn send_proposal(
        &self,
        proposal: &Proposal,
        peer: &PeerInfo,
        timeout: Duration,
    ) -> Result<ProposalResponse, TransportError>;
}

/// Submission transport to the ordering service.
#[async_trait]
pub trait OrdererTransport: Send + Sync {
    /// Send an endorsed transaction once. Returns the raw status string, if any.
    async fn send_commit(
        &self,
        envelope: &TransactionEnvelope,
        committers: &[String],
        timeout: Duration,
    ) -> Result<Option<String>, TransportError>;
}

/// Opens block event streams against peers.
#[async_trait]
pub trait EventStreamConnector: Send + Sync {
    /// Open a stream delivering blocks from `start`.
    async fn open_event_stream(
        &self,
        peer: &PeerInfo,
        start: StartPosition,
    ) -> Result<NotificationStream, TransportError>;
}

/// Persists per-listener progress for resumable replay.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Last checkpoint of a listener, if any.
    async fn load(&self, channel: &str, listener: &str) -> GatewayResult<Option<Checkpoint>>;

    /// Record progress. `transaction_id == None` marks the block fully processed.
    async fn save(
        &self,
        channel: &str,
        listener: &str,
        block_number: u64,
        transaction_id: Option<&str>,
    ) -> GatewayResult<()>;

    /// Whether the block (or the transaction within it) was already recorded.
    async fn check(
        &self,
        channel: &str,
        listener: &str,
        block_number: u64,
        transaction_id: Option<&str>,
    ) -> GatewayResult<bool>;
}

/// Discovery service providing ready-made target plans.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Peers that satisfy the endorsement policy for `proposal`.
    async fn endorsement_plan(&self, proposal: &Proposal) -> GatewayResult<Vec<PeerInfo>>;

    /// Ordering nodes to submit to.
    async fn committers(&self) -> GatewayResult<Vec<String>>;
}
