//! # Domain Entities
//!
//! Proposals, endorsement responses and commit results flowing through the
//! submission pipeline, plus the events delivered to listeners.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use super::errors::{GatewayError, GatewayResult, TransportError};
use super::invariants::{
    invariant_commit_accepted, invariant_proposal_named, invariant_response_valid, NONCE_LENGTH,
    SUCCESS_STATUS,
};
use super::value_objects::{Identity, TransactionNotification};

/// Transaction id: hex SHA-256 of nonce followed by the creator identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(String);

impl TransactionId {
    /// Derive the id for a signer and nonce. Same inputs, same id.
    pub fn derive(identity: &Identity, nonce: &Nonce) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(nonce.as_bytes());
        hasher.update(identity.msp_id.as_bytes());
        hasher.update(&identity.credentials);
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random proposal nonce.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    /// Fresh random nonce.
    pub fn random() -> Self {
        let mut bytes = vec![0u8; NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Nonce from known bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Signer, nonce and the id derived from them.
///
/// Created once per logical transaction; every resend reuses it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionContext {
    identity: Identity,
    nonce: Nonce,
    tx_id: TransactionId,
}

impl TransactionContext {
    /// Context with a fresh nonce.
    pub fn new(identity: Identity) -> Self {
        Self::with_nonce(identity, Nonce::random())
    }

    /// Context with a given nonce.
    pub fn with_nonce(identity: Identity, nonce: Nonce) -> Self {
        let tx_id = TransactionId::derive(&identity, &nonce);
        Self {
            identity,
            nonce,
            tx_id,
        }
    }

    /// Derived transaction id.
    pub fn tx_id(&self) -> &TransactionId {
        &self.tx_id
    }

    /// Signer identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Nonce.
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }
}

/// One chaincode argument.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProposalArg {
    /// UTF-8 argument.
    Text(String),
    /// Binary argument.
    Bytes(Vec<u8>),
}

impl ProposalArg {
    /// Wire bytes of the argument.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Bytes(b) => b,
        }
    }
}

impl From<&str> for ProposalArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ProposalArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for ProposalArg {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for ProposalArg {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

/// Who a proposal should be endorsed by.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum EndorsementTargets {
    /// Discovery plan if enabled, else all endorsing peers.
    #[default]
    Default,
    /// Explicit peer names.
    Peers(Vec<String>),
    /// Explicit organizations.
    Organizations(Vec<String>),
}

/// Client-signed request to execute chaincode. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    channel: String,
    chaincode_id: String,
    function: String,
    args: Vec<ProposalArg>,
    transient: BTreeMap<String, Vec<u8>>,
    targets: EndorsementTargets,
    context: TransactionContext,
}

impl Proposal {
    /// Build a proposal.
    ///
    /// # Errors
    /// - `InvalidArgument` if the chaincode id or function name is empty
    pub fn new(
        context: TransactionContext,
        channel: impl Into<String>,
        chaincode_id: impl Into<String>,
        function: impl Into<String>,
        args: Vec<ProposalArg>,
    ) -> GatewayResult<Self> {
        let chaincode_id = chaincode_id.into();
        let function = function.into();
        invariant_proposal_named(&chaincode_id, &function)?;
        Ok(Self {
            channel: channel.into(),
            chaincode_id,
            function,
            args,
            transient: BTreeMap::new(),
            targets: EndorsementTargets::Default,
            context,
        })
    }

    /// Attach transient data.
    pub fn with_transient(mut self, transient: BTreeMap<String, Vec<u8>>) -> Self {
        self.transient = transient;
        self
    }

    /// Attach endorsement targets.
    pub fn with_targets(mut self, targets: EndorsementTargets) -> Self {
        self.targets = targets;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn chaincode_id(&self) -> &str {
        &self.chaincode_id
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn args(&self) -> &[ProposalArg] {
        &self.args
    }

    pub fn transient(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.transient
    }

    pub fn targets(&self) -> &EndorsementTargets {
        &self.targets
    }

    pub fn tx_id(&self) -> &TransactionId {
        self.context.tx_id()
    }

    pub fn nonce(&self) -> &Nonce {
        self.context.nonce()
    }

    pub fn creator(&self) -> &Identity {
        self.context.identity()
    }
}

/// What a peer returned for a proposal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalResponse {
    /// Response status code.
    pub status: u32,
    /// Status message.
    pub message: String,
    /// Chaincode result. `None` when the response had no payload field.
    pub payload: Option<Vec<u8>>,
    /// Endorsement signature.
    pub endorsement: Option<Vec<u8>>,
}

impl ProposalResponse {
    /// A successful response.
    pub fn success(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: SUCCESS_STATUS,
            message: String::new(),
            payload: Some(payload.into()),
            endorsement: Some(b"signature".to_vec()),
        }
    }

    /// A chaincode-level error response.
    pub fn error(status: u32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            payload: None,
            endorsement: None,
        }
    }
}

/// One contacted peer's endorsement outcome.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndorsementResponse {
    /// Originating peer.
    pub peer: String,
    /// Status code (0 when the peer was not reached).
    pub status: u32,
    /// Status or error message.
    pub message: String,
    /// Chaincode result.
    pub payload: Option<Vec<u8>>,
    /// Raw endorsement signature.
    pub endorsement: Option<Vec<u8>>,
    /// Transport failure, if the peer was not reached.
    pub transport_error: Option<TransportError>,
}

impl EndorsementResponse {
    /// Wrap a response returned by `peer`.
    pub fn from_response(peer: impl Into<String>, response: ProposalResponse) -> Self {
        Self {
            peer: peer.into(),
            status: response.status,
            message: response.message,
            payload: response.payload,
            endorsement: response.endorsement,
            transport_error: None,
        }
    }

    /// Record a transport failure for `peer`.
    pub fn from_transport_error(peer: impl Into<String>, error: TransportError) -> Self {
        Self {
            peer: peer.into(),
            status: 0,
            message: error.to_string(),
            payload: None,
            endorsement: None,
            transport_error: Some(error),
        }
    }

    /// Whether this response counts toward endorsement.
    pub fn is_valid(&self) -> bool {
        invariant_response_valid(self)
    }
}

/// Endorsed transaction sent to the ordering service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionEnvelope {
    /// Transaction id.
    pub tx_id: TransactionId,
    /// Channel name.
    pub channel: String,
    /// Endorsements assembled from valid responses.
    pub endorsements: Vec<EndorsementResponse>,
}

/// Ordering service verdict.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommitStatus {
    /// Exact "SUCCESS" marker received.
    Accepted,
    /// Anything else, including no status at all.
    Rejected(Option<String>),
}

/// Result of a commit submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitResult {
    /// Ordering verdict.
    pub status: CommitStatus,
    /// Endorsement responses that were submitted.
    pub responses: Vec<EndorsementResponse>,
}

impl CommitResult {
    /// Interpret a raw ordering status.
    pub fn from_status(status: Option<String>, responses: Vec<EndorsementResponse>) -> Self {
        let status = if invariant_commit_accepted(status.as_deref()) {
            CommitStatus::Accepted
        } else {
            CommitStatus::Rejected(status)
        };
        Self { status, responses }
    }

    /// Whether the ordering service accepted the transaction.
    pub fn is_accepted(&self) -> bool {
        self.status == CommitStatus::Accepted
    }

    /// Turn a rejection into `CommitRejected`, keeping the responses.
    pub fn into_result(self, tx_id: &TransactionId) -> GatewayResult<Self> {
        match self.status {
            CommitStatus::Accepted => Ok(self),
            CommitStatus::Rejected(status) => Err(GatewayError::CommitRejected {
                tx_id: tx_id.to_string(),
                status,
                responses: self.responses,
            }),
        }
    }
}

/// A transaction observed committed by a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitEvent {
    /// Reporting peer.
    pub peer: String,
    /// Block containing the transaction.
    pub block_number: u64,
    /// Transaction details.
    pub transaction: TransactionNotification,
}

/// A block observed by a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEvent {
    /// Reporting peer.
    pub peer: String,
    /// Block number.
    pub block_number: u64,
    /// Transactions in the block.
    pub transactions: Vec<TransactionNotification>,
    /// Full block bytes; `None` for filtered registrations.
    pub payload: Option<Vec<u8>>,
}

/// What a listener callback receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerEvent {
    /// A matching transaction committed.
    Commit(CommitEvent),
    /// A block in the registration window.
    Block(BlockEvent),
    /// The registration's end block was reached; it is now unregistered.
    Completed {
        /// Block carrying the end marker
        block_number: u64,
    },
}
