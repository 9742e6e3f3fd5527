//! # Domain Errors
//!
//! Error taxonomy for the submission, query and event pipelines.
//!
//! Two tiers:
//! - [`TransportError`]: what the wire layer reports for a single peer or
//!   orderer call. Chaincode failures are NOT transport errors; they arrive as
//!   responses with a non-200 status.
//! - [`GatewayError`]: what the pipeline surfaces to application code.

use super::entities::EndorsementResponse;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Typed failure reported by the transport boundary for one remote call.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    /// The remote node could not be reached.
    #[error("{peer} unreachable: {message}")]
    Unreachable {
        /// Remote node name
        peer: String,
        /// Underlying transport message
        message: String,
    },

    /// The call did not complete within its budget.
    #[error("{peer} timed out after {timeout_ms}ms")]
    Timeout {
        /// Remote node name
        peer: String,
        /// Budget that elapsed
        timeout_ms: u64,
    },

    /// A stream or connection dropped mid-flight.
    #[error("{peer} disconnected: {message}")]
    Disconnected {
        /// Remote node name
        peer: String,
        /// Disconnect reason
        message: String,
    },

    /// The remote node refused the caller's identity.
    #[error("{peer} refused access: {message}")]
    AccessDenied {
        /// Remote node name
        peer: String,
        /// Refusal reason
        message: String,
    },
}

impl TransportError {
    /// Name of the node the failure came from.
    pub fn peer(&self) -> &str {
        match self {
            Self::Unreachable { peer, .. }
            | Self::Timeout { peer, .. }
            | Self::Disconnected { peer, .. }
            | Self::AccessDenied { peer, .. } => peer,
        }
    }

    /// Whether trying a different peer may succeed.
    ///
    /// Access refusals follow the channel policy, so every peer of the same
    /// channel gives the same answer.
    pub fn is_failover_trigger(&self) -> bool {
        !matches!(self, Self::AccessDenied { .. })
    }
}

/// Gateway pipeline errors.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Malformed proposal inputs (empty function name, unknown peer, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Every peer of a query was tried and failed.
    #[error("No peers available to query after {attempted} attempts. Last error from {last_peer}: {last_error}")]
    NoPeersAvailable {
        /// Number of peers tried
        attempted: usize,
        /// Peer that failed last
        last_peer: String,
        /// Its failure reason
        last_error: String,
    },

    /// No peer in scope carries the chaincode-query role.
    #[error("No peers with chaincode-query role for {msp_id} on channel {channel}")]
    NoQueryablePeers {
        /// Channel name
        channel: String,
        /// Caller's organization
        msp_id: String,
    },

    /// Endorsement targets resolved to an empty set.
    #[error("No endorsement targets resolved for transaction {tx_id}")]
    NoResponses {
        /// Transaction id
        tx_id: String,
    },

    /// Every contacted peer returned an invalid response.
    #[error("No valid responses from any peers for transaction {tx_id}: {} invalid responses, last: {last_error}", responses.len())]
    NoValidResponses {
        /// Transaction id
        tx_id: String,
        /// Message of the last invalid response
        last_error: String,
        /// Every invalid response collected
        responses: Vec<EndorsementResponse>,
    },

    /// Valid responses disagree on payload bytes under strict agreement.
    #[error("Endorsement payloads disagree for transaction {tx_id} across peers {peers:?}")]
    EndorsementMismatch {
        /// Transaction id
        tx_id: String,
        /// Peers whose payload differed from the first valid response
        peers: Vec<String>,
    },

    /// Ordering service did not accept the transaction.
    #[error("Transaction {tx_id} rejected by ordering service: status {}", status.as_deref().unwrap_or("<none>"))]
    CommitRejected {
        /// Transaction id
        tx_id: String,
        /// Returned status string, if any
        status: Option<String>,
        /// Endorsement responses that were submitted
        responses: Vec<EndorsementResponse>,
    },

    /// A reached peer ran the chaincode and returned an error status.
    #[error("Chaincode error from {peer} (status {status}): {message}")]
    Chaincode {
        /// Peer that executed the chaincode
        peer: String,
        /// Response status code
        status: u32,
        /// Chaincode message
        message: String,
    },

    /// A commit event reported the transaction as invalidated.
    #[error("Transaction {tx_id} failed to commit on {peer} with code {code}")]
    TransactionInvalid {
        /// Transaction id
        tx_id: String,
        /// Reporting peer
        peer: String,
        /// Validation code
        code: String,
    },

    /// Transport failure surfaced without retry.
    #[error("{operation} failed: {source}")]
    Transport {
        /// Operation that failed
        operation: &'static str,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// A replay registration already exists on the stream.
    #[error("A replay listener is already registered on the event stream of {peer}")]
    ReplayAlreadyRegistered {
        /// Event source peer
        peer: String,
    },

    /// The transaction instance was already used.
    #[error("Transaction {tx_id} has already been invoked")]
    AlreadyInvoked {
        /// Transaction id
        tx_id: String,
    },

    /// An awaited result did not arrive in time.
    #[error("Timeout waiting for {operation} after {timeout_ms}ms")]
    Timeout {
        /// What was awaited
        operation: &'static str,
        /// Configured window
        timeout_ms: u64,
    },

    /// Event stream lost and not recovered within the reconnect budget.
    #[error("Event stream from {peer} disconnected: {reason}")]
    StreamDisconnected {
        /// Event source peer
        peer: String,
        /// Last disconnect reason
        reason: String,
    },

    /// End-of-range signalled below the registration's end block.
    #[error("Event stream ended at block {block_number} before requested end block {end_block}")]
    PrematureEnd {
        /// Block carrying the end marker
        block_number: u64,
        /// Configured end block
        end_block: u64,
    },

    /// Registration id not known to the subscription.
    #[error("Unknown listener registration {0}")]
    UnknownRegistration(u64),

    /// Checkpointer read/write failure.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Configuration validation failure.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Returns true if the operation may succeed when attempted again.
    ///
    /// Usage errors, rejections and deterministic chaincode errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_failover_trigger(),
            Self::NoPeersAvailable { .. } => true,
            Self::Timeout { .. } => true,
            Self::StreamDisconnected { .. } => true,
            Self::InvalidArgument(_)
            | Self::NoQueryablePeers { .. }
            | Self::NoResponses { .. }
            | Self::NoValidResponses { .. }
            | Self::EndorsementMismatch { .. }
            | Self::CommitRejected { .. }
            | Self::Chaincode { .. }
            | Self::TransactionInvalid { .. }
            | Self::ReplayAlreadyRegistered { .. }
            | Self::AlreadyInvoked { .. }
            | Self::PrematureEnd { .. }
            | Self::UnknownRegistration(_)
            | Self::Checkpoint(_)
            | Self::Config(_) => false,
        }
    }

    /// Endorsement evidence carried by the error, if any.
    pub fn responses(&self) -> &[EndorsementResponse] {
        match self {
            Self::NoValidResponses { responses, .. } | Self::CommitRejected { responses, .. } => {
                responses
            }
            _ => &[],
        }
    }
}
