//! # Domain Value Objects
//!
//! Immutable value types shared by the pipelines: peers, identities,
//! checkpoints and event notifications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::invariants::VALID_CODE;

/// Roles a peer plays on a channel.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerRoles {
    /// Executes chaincode and signs proposal responses.
    pub endorsing: bool,
    /// Serves read-only chaincode queries.
    pub chaincode_query: bool,
    /// Serves ledger queries.
    pub ledger_query: bool,
    /// Emits block/commit events.
    pub event_source: bool,
}

impl PeerRoles {
    /// A peer carrying every role.
    pub const fn all() -> Self {
        Self {
            endorsing: true,
            chaincode_query: true,
            ledger_query: true,
            event_source: true,
        }
    }
}

impl Default for PeerRoles {
    fn default() -> Self {
        Self::all()
    }
}

/// An endorsing node known on the channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    /// Unique peer name (e.g. `peer0.org1.example.com`).
    pub name: String,
    /// Owning organization.
    pub msp_id: String,
    /// Endpoint URL.
    pub url: String,
    /// Channel roles.
    pub roles: PeerRoles,
}

impl PeerInfo {
    /// Create a peer with every role.
    pub fn new(name: impl Into<String>, msp_id: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            url: format!("grpcs://{name}:7051"),
            name,
            msp_id: msp_id.into(),
            roles: PeerRoles::all(),
        }
    }

    /// Replace the role set.
    pub fn with_roles(mut self, roles: PeerRoles) -> Self {
        self.roles = roles;
        self
    }
}

/// Signer identity used to build proposals.
///
/// Private keys stay with the external wallet; only the public part is needed
/// to derive transaction ids.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    /// Organization of the signer.
    pub msp_id: String,
    /// Serialized certificate.
    pub credentials: Vec<u8>,
}

impl Identity {
    /// Create a new identity.
    pub fn new(msp_id: impl Into<String>, credentials: impl Into<Vec<u8>>) -> Self {
        Self {
            msp_id: msp_id.into(),
            credentials: credentials.into(),
        }
    }
}

/// Where an event stream starts delivering.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StartPosition {
    /// Current chain head, live events only.
    Newest,
    /// A specific historical block.
    Block(u64),
}

/// Connection state of one (channel, peer) event stream.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, not yet connecting.
    Idle,
    /// Opening the stream.
    Connecting,
    /// Delivering notifications.
    Ready,
    /// Dropped, reconnect pending.
    TransientFailure,
    /// Reconnect budget exhausted.
    FatalFailure,
    /// Explicitly disconnected. Terminal.
    Shutdown,
}

impl ConnectionState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FatalFailure | Self::Shutdown)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Shutdown, _) => false,
            (_, Shutdown) => true,
            (Idle, Connecting) => true,
            (Connecting, Ready) | (Connecting, TransientFailure) => true,
            (Ready, TransientFailure) => true,
            (TransientFailure, Connecting) | (TransientFailure, FatalFailure) => true,
            _ => false,
        }
    }
}

/// Persisted progress of one listener.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    /// Channel name.
    pub channel: String,
    /// Listener name.
    pub listener: String,
    /// Last block touched.
    pub block_number: u64,
    /// Last transaction processed within that block.
    pub transaction_id: Option<String>,
    /// Transactions of `block_number` already processed.
    pub processed_transactions: BTreeSet<String>,
    /// Whether `block_number` was fully processed.
    pub block_complete: bool,
}

impl Checkpoint {
    /// Block a replay should resume from.
    ///
    /// A partially processed block is delivered again; its recorded
    /// transactions are skipped through the checkpointer's check.
    pub fn resume_block(&self) -> u64 {
        if self.block_complete {
            self.block_number.saturating_add(1)
        } else {
            self.block_number
        }
    }

    /// Empty checkpoint for a listener, before anything was processed.
    pub fn empty(channel: impl Into<String>, listener: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            listener: listener.into(),
            ..Self::default()
        }
    }

    /// Record progress on `block_number`. `None` marks the block complete.
    pub fn record(&mut self, block_number: u64, transaction_id: Option<&str>) {
        if block_number != self.block_number {
            self.processed_transactions.clear();
            self.transaction_id = None;
        }
        self.block_number = block_number;
        match transaction_id {
            Some(tx_id) => {
                self.processed_transactions.insert(tx_id.to_string());
                self.transaction_id = Some(tx_id.to_string());
                self.block_complete = false;
            }
            None => {
                self.processed_transactions.clear();
                self.block_complete = true;
            }
        }
    }

    /// Whether the block, or the transaction within it, is already recorded.
    pub fn covers(&self, block_number: u64, transaction_id: Option<&str>) -> bool {
        if block_number < self.block_number {
            return true;
        }
        if block_number > self.block_number {
            return false;
        }
        if self.block_complete {
            return true;
        }
        transaction_id.is_some_and(|tx_id| self.processed_transactions.contains(tx_id))
    }
}

/// One transaction as reported in a block notification.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionNotification {
    /// Transaction id.
    pub tx_id: String,
    /// Validation code assigned by the committing peer.
    pub validation_code: String,
    /// Chaincode that the transaction invoked, if known.
    pub chaincode_id: Option<String>,
}

impl TransactionNotification {
    /// A transaction committed as valid.
    pub fn valid(tx_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            validation_code: VALID_CODE.to_string(),
            chaincode_id: None,
        }
    }

    /// A transaction committed with the given validation code.
    pub fn with_code(tx_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            validation_code: code.into(),
            chaincode_id: None,
        }
    }

    /// Whether the commit was valid.
    pub fn is_valid(&self) -> bool {
        self.validation_code == VALID_CODE
    }
}

/// Notification pushed by an event stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockNotification {
    /// Block number.
    pub block_number: u64,
    /// Transactions in the block.
    pub transactions: Vec<TransactionNotification>,
    /// Full block bytes (absent on filtered streams).
    pub payload: Option<Vec<u8>>,
    /// The stream reached the end of its requested range.
    pub end_block_reached: bool,
}

impl BlockNotification {
    /// A block with the given transactions.
    pub fn new(block_number: u64, transactions: Vec<TransactionNotification>) -> Self {
        Self {
            block_number,
            transactions,
            payload: None,
            end_block_reached: false,
        }
    }

    /// The end-of-range marker for `block_number`.
    pub fn end_of_range(block_number: u64) -> Self {
        Self {
            block_number,
            end_block_reached: true,
            ..Self::default()
        }
    }
}
