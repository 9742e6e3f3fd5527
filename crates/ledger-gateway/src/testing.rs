//! Centralized Testing Utilities
//!
//! Mock transports, a scriptable event hub and fixtures used across the
//! crate and its integration tests. Available with the `test-utils` feature.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::adapters::ChannelTopology;
use crate::domain::{
    BlockNotification, GatewayResult, Identity, PeerInfo, Proposal, ProposalResponse,
    StartPosition, TransactionContext, TransactionEnvelope, TransactionNotification,
    TransportError, COMMIT_SUCCESS,
};
use crate::ports::{
    DiscoveryProvider, EventStreamConnector, NotificationStream, OrdererTransport, PeerTransport,
};

// =============================================================================
// FIXTURES
// =============================================================================

/// Channel name used by the fixtures.
pub const CHANNEL: &str = "mychannel";

/// Chaincode name used by the fixtures.
pub const CHAINCODE: &str = "basic";

/// Signer of `Org1MSP`.
pub fn test_identity() -> Identity {
    Identity::new("Org1MSP", b"-----BEGIN CERTIFICATE-----org1-user".to_vec())
}

/// `mychannel` with the named peers (all roles, `Org1MSP`) and `orderer0`.
pub fn channel_with_peers(names: &[&str]) -> ChannelTopology {
    names
        .iter()
        .fold(ChannelTopology::new(CHANNEL), |topology, name| {
            topology.with_peer(PeerInfo::new(*name, "Org1MSP"))
        })
        .with_orderer("orderer0")
}

/// Proposal for `function` on the fixture chaincode with a fresh id.
pub fn proposal_for(function: &str) -> Proposal {
    Proposal::new(
        TransactionContext::new(test_identity()),
        CHANNEL,
        CHAINCODE,
        function,
        vec![],
    )
    .expect("fixture proposal is well formed")
}

// =============================================================================
// PEER TRANSPORT
// =============================================================================

#[derive(Clone, Debug)]
enum Scripted {
    Respond(ProposalResponse),
    Fail(TransportError),
}

/// Scriptable proposal transport.
///
/// Unscripted peers answer status 200 with their own name as payload. Every
/// call is recorded, failures included.
#[derive(Debug, Default)]
pub struct MockPeerTransport {
    scripts: Mutex<HashMap<String, Scripted>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl MockPeerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `response` from `peer`.
    pub fn respond(&self, peer: &str, response: ProposalResponse) {
        self.scripts
            .lock()
            .insert(peer.to_string(), Scripted::Respond(response));
    }

    /// Make `peer` unreachable.
    pub fn fail(&self, peer: &str) {
        self.fail_with(
            peer,
            TransportError::Unreachable {
                peer: peer.to_string(),
                message: format!("connection to {peer} refused"),
            },
        );
    }

    /// Fail calls to `peer` with `error`.
    pub fn fail_with(&self, peer: &str, error: TransportError) {
        self.scripts
            .lock()
            .insert(peer.to_string(), Scripted::Fail(error));
    }

    /// Restore the default answer for `peer`.
    pub fn heal(&self, peer: &str) {
        self.scripts.lock().remove(peer);
    }

    /// Hold every answer from `peer` for `delay`.
    pub fn delay(&self, peer: &str, delay: Duration) {
        self.delays.lock().insert(peer.to_string(), delay);
    }

    /// Peers called so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PeerTransport for MockPeerTransport {
    async fn send_proposal(
        &self,
        _proposal: &Proposal,
        peer: &PeerInfo,
        _timeout: Duration,
    ) -> Result<ProposalResponse, TransportError> {
        self.calls.lock().push(peer.name.clone());
        let delay = self.delays.lock().get(&peer.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let script = self.scripts.lock().get(&peer.name).cloned();
        match script {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(error)) => Err(error),
            None => Ok(ProposalResponse::success(peer.name.as_bytes().to_vec())),
        }
    }
}

// =============================================================================
// ORDERER
// =============================================================================

struct Confirmation {
    hub: Arc<MockEventHub>,
    peers: Vec<String>,
    code: String,
}

/// Scriptable ordering service.
///
/// Optionally confirms accepted transactions through a [`MockEventHub`], the
/// way committing peers would.
pub struct MockOrderer {
    outcome: Result<Option<String>, TransportError>,
    submissions: Mutex<Vec<TransactionEnvelope>>,
    confirmation: Option<Confirmation>,
}

impl Default for MockOrderer {
    fn default() -> Self {
        Self::with_status(Some(COMMIT_SUCCESS))
    }
}

impl MockOrderer {
    /// Accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `status` to every submission.
    pub fn with_status(status: Option<&str>) -> Self {
        Self {
            outcome: Ok(status.map(str::to_string)),
            submissions: Mutex::new(Vec::new()),
            confirmation: None,
        }
    }

    /// Fails every submission with a transport error.
    pub fn failing() -> Self {
        Self {
            outcome: Err(TransportError::Unreachable {
                peer: "orderer0".to_string(),
                message: "connection reset".to_string(),
            }),
            ..Self::default()
        }
    }

    /// After an accepted submission, push the transaction with `code` to
    /// `peers` through `hub`.
    pub fn confirming(mut self, hub: Arc<MockEventHub>, peers: &[&str], code: &str) -> Self {
        self.confirmation = Some(Confirmation {
            hub,
            peers: peers.iter().map(|p| p.to_string()).collect(),
            code: code.to_string(),
        });
        self
    }

    /// Envelopes submitted so far.
    pub fn submissions(&self) -> Vec<TransactionEnvelope> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl OrdererTransport for MockOrderer {
    async fn send_commit(
        &self,
        envelope: &TransactionEnvelope,
        _committers: &[String],
        _timeout: Duration,
    ) -> Result<Option<String>, TransportError> {
        self.submissions.lock().push(envelope.clone());
        let status = self.outcome.clone()?;
        if let (Some(confirmation), Some(COMMIT_SUCCESS)) = (&self.confirmation, status.as_deref()) {
            let peers: Vec<&str> = confirmation.peers.iter().map(String::as_str).collect();
            confirmation
                .hub
                .commit(&peers, envelope.tx_id.as_str(), &confirmation.code);
        }
        Ok(status)
    }
}

// =============================================================================
// EVENT HUB
// =============================================================================

type Item = Result<BlockNotification, TransportError>;

#[derive(Default)]
struct PeerFeed {
    sender: Option<mpsc::UnboundedSender<Item>>,
    pending: Vec<Item>,
    failing_opens: usize,
    unreachable: bool,
}

#[derive(Default)]
struct HubState {
    feeds: HashMap<String, PeerFeed>,
    opened: Vec<(String, StartPosition)>,
    next_block: u64,
    open_delay: Option<Duration>,
}

/// Scriptable event source for every peer of a channel.
///
/// Notifications pushed while a peer has no open stream are buffered and
/// delivered when the next stream opens. A [`live`](Self::live) hub behaves
/// like a peer instead: a stream opened at the newest block only sees what
/// is pushed after it opens, and a stream opened at block `n` gets the
/// buffered blocks from `n` on.
#[derive(Default)]
pub struct MockEventHub {
    state: Mutex<HubState>,
    live: bool,
}

impl MockEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live() -> Self {
        Self {
            live: true,
            ..Self::default()
        }
    }

    /// Hold every following stream open for `delay` before it connects.
    pub fn delay_opens(&self, delay: Duration) {
        self.state.lock().open_delay = Some(delay);
    }

    /// Deliver `notification` on `peer`'s stream.
    pub fn push(&self, peer: &str, notification: BlockNotification) {
        self.send(peer, Ok(notification));
    }

    /// Deliver a stream error on `peer`'s stream.
    pub fn push_error(&self, peer: &str, error: TransportError) {
        self.send(peer, Err(error));
    }

    /// Push a block containing `tx_id` with `code` to each peer.
    pub fn commit(&self, peers: &[&str], tx_id: &str, code: &str) {
        let block_number = {
            let mut state = self.state.lock();
            state.next_block += 1;
            state.next_block
        };
        for peer in peers {
            let tx = TransactionNotification::with_code(tx_id, code);
            self.push(peer, BlockNotification::new(block_number, vec![tx]));
        }
    }

    /// Drop `peer`'s open stream. Buffered items are still delivered first.
    pub fn disconnect(&self, peer: &str) {
        if let Some(feed) = self.state.lock().feeds.get_mut(peer) {
            feed.sender = None;
        }
    }

    /// Fail the next `count` stream opens against `peer`.
    pub fn fail_opens(&self, peer: &str, count: usize) {
        self.state
            .lock()
            .feeds
            .entry(peer.to_string())
            .or_default()
            .failing_opens = count;
    }

    /// Fail every stream open against `peer` until cleared.
    pub fn set_unreachable(&self, peer: &str, unreachable: bool) {
        self.state
            .lock()
            .feeds
            .entry(peer.to_string())
            .or_default()
            .unreachable = unreachable;
    }

    /// Every open attempt so far, failed ones included.
    pub fn opened(&self) -> Vec<(String, StartPosition)> {
        self.state.lock().opened.clone()
    }

    /// Start positions requested from `peer`.
    pub fn opened_for(&self, peer: &str) -> Vec<StartPosition> {
        self.state
            .lock()
            .opened
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, start)| *start)
            .collect()
    }

    /// Wait until `peer` saw `count` open attempts. False on timeout.
    pub async fn wait_for_opens(&self, peer: &str, count: usize) -> bool {
        for _ in 0..400 {
            if self.opened_for(peer).len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    fn send(&self, peer: &str, item: Item) {
        let mut state = self.state.lock();
        let feed = state.feeds.entry(peer.to_string()).or_default();
        let item = match &feed.sender {
            Some(sender) => match sender.send(item) {
                Ok(()) => return,
                Err(mpsc::error::SendError(item)) => item,
            },
            None => item,
        };
        feed.sender = None;
        feed.pending.push(item);
    }
}

#[async_trait]
impl EventStreamConnector for MockEventHub {
    async fn open_event_stream(
        &self,
        peer: &PeerInfo,
        start: StartPosition,
    ) -> Result<NotificationStream, TransportError> {
        let delay = self.state.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.opened.push((peer.name.clone(), start));
        let feed = state.feeds.entry(peer.name.clone()).or_default();

        if feed.unreachable || feed.failing_opens > 0 {
            feed.failing_opens = feed.failing_opens.saturating_sub(1);
            return Err(TransportError::Unreachable {
                peer: peer.name.clone(),
                message: "event service unavailable".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        for item in feed.pending.drain(..) {
            let deliver = match (&item, start) {
                _ if !self.live => true,
                (Ok(notification), StartPosition::Block(from)) => notification.block_number >= from,
                _ => false,
            };
            if deliver {
                // Receiver is alive in this scope.
                let _ = sender.send(item);
            }
        }
        feed.sender = Some(sender);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}

// =============================================================================
// DISCOVERY
// =============================================================================

/// Discovery returning fixed plans.
#[derive(Debug, Default)]
pub struct MockDiscovery {
    plan: Vec<PeerInfo>,
    committers: Vec<String>,
}

impl MockDiscovery {
    /// Plan of `Org1MSP` peers named `plan`, committing to `committers`.
    pub fn new(plan: Vec<&str>, committers: Vec<&str>) -> Self {
        Self {
            plan: plan
                .into_iter()
                .map(|name| PeerInfo::new(name, "Org1MSP"))
                .collect(),
            committers: committers.into_iter().map(str::to_string).collect(),
        }
    }
}

#[async_trait]
impl DiscoveryProvider for MockDiscovery {
    async fn endorsement_plan(&self, _proposal: &Proposal) -> GatewayResult<Vec<PeerInfo>> {
        Ok(self.plan.clone())
    }

    async fn committers(&self) -> GatewayResult<Vec<String>> {
        Ok(self.committers.clone())
    }
}
