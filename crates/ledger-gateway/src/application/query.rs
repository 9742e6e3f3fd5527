//! # Query Dispatcher
//!
//! Read-only chaincode calls against one peer at a time.
//!
//! ## Failover rule
//!
//! - Transport failure (unreachable, timeout, dropped): try the next peer.
//! - Chaincode failure (reached peer, non-200 status): surface immediately.
//!   Every peer runs the same chaincode, so another peer gives the same answer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::ChannelTopology;
use crate::config::QueryScope;
use crate::domain::{
    GatewayError, GatewayResult, PeerInfo, Proposal, TransportError, SUCCESS_STATUS,
};
use crate::ports::PeerTransport;

/// Runs a read-only proposal and returns its payload.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Evaluate `proposal`. `None` means the response had no payload field.
    async fn evaluate(
        &self,
        proposal: &Proposal,
        timeout: Duration,
    ) -> GatewayResult<Option<Vec<u8>>>;
}

/// Query peer selection, resolved once when the network is built.
#[derive(Clone)]
pub enum QueryStrategy {
    /// Sticky cursor over the organization's query peers.
    SinglePeer,
    /// Rotate the first peer tried on every call.
    RoundRobin,
    /// Caller-supplied handler.
    Custom(Arc<dyn QueryHandler>),
}

impl From<QueryScope> for QueryStrategy {
    fn from(scope: QueryScope) -> Self {
        match scope {
            QueryScope::SinglePeer => Self::SinglePeer,
            QueryScope::RoundRobin => Self::RoundRobin,
        }
    }
}

impl std::fmt::Debug for QueryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SinglePeer => f.write_str("SinglePeer"),
            Self::RoundRobin => f.write_str("RoundRobin"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl QueryStrategy {
    /// Build the handler for the caller's organization.
    pub fn into_handler(
        self,
        transport: Arc<dyn PeerTransport>,
        topology: &ChannelTopology,
        msp_id: &str,
    ) -> Arc<dyn QueryHandler> {
        let mode = match self {
            Self::Custom(handler) => return handler,
            Self::SinglePeer => Selection::Sticky,
            Self::RoundRobin => Selection::RoundRobin,
        };
        Arc::new(QueryDispatcher::new(transport, topology, msp_id, mode))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Selection {
    Sticky,
    RoundRobin,
}

/// Built-in query handler over a fixed peer list.
pub struct QueryDispatcher {
    transport: Arc<dyn PeerTransport>,
    channel: String,
    msp_id: String,
    peers: Vec<PeerInfo>,
    selection: Selection,
    /// Index of the last peer that answered. `None` until the first success.
    cursor: Mutex<Option<usize>>,
    rotation: AtomicUsize,
}

impl QueryDispatcher {
    /// Sticky dispatcher over `msp_id`'s query peers (or the channel's).
    pub fn sticky(
        transport: Arc<dyn PeerTransport>,
        topology: &ChannelTopology,
        msp_id: &str,
    ) -> Self {
        Self::new(transport, topology, msp_id, Selection::Sticky)
    }

    /// Round-robin dispatcher over the same peer list.
    pub fn round_robin(
        transport: Arc<dyn PeerTransport>,
        topology: &ChannelTopology,
        msp_id: &str,
    ) -> Self {
        Self::new(transport, topology, msp_id, Selection::RoundRobin)
    }

    fn new(
        transport: Arc<dyn PeerTransport>,
        topology: &ChannelTopology,
        msp_id: &str,
        selection: Selection,
    ) -> Self {
        Self {
            transport,
            channel: topology.name().to_string(),
            msp_id: msp_id.to_string(),
            peers: topology.query_peers(msp_id),
            selection,
            cursor: Mutex::new(None),
            rotation: AtomicUsize::new(0),
        }
    }

    /// Peers in selection order.
    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    /// Index of the peer the next sticky call starts at.
    pub fn current_index(&self) -> Option<usize> {
        *self.cursor.lock()
    }

    fn first_index(&self) -> (usize, Option<usize>) {
        match self.selection {
            Selection::Sticky => {
                let observed = *self.cursor.lock();
                (observed.unwrap_or(0), observed)
            }
            Selection::RoundRobin => {
                let next = self.rotation.fetch_add(1, Ordering::Relaxed) % self.peers.len();
                (next, None)
            }
        }
    }

    /// Move the cursor to `index` unless another call already moved it.
    fn settle_cursor(&self, observed: Option<usize>, index: usize) {
        if self.selection != Selection::Sticky {
            return;
        }
        let mut cursor = self.cursor.lock();
        if *cursor == observed {
            *cursor = Some(index);
        }
    }

    async fn try_peer(
        &self,
        proposal: &Proposal,
        peer: &PeerInfo,
        timeout: Duration,
    ) -> Result<GatewayResult<Option<Vec<u8>>>, TransportError> {
        let call = self.transport.send_proposal(proposal, peer, timeout);
        let response = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    peer: peer.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        };
        if response.status == SUCCESS_STATUS {
            Ok(Ok(response.payload))
        } else {
            Ok(Err(GatewayError::Chaincode {
                peer: peer.name.clone(),
                status: response.status,
                message: response.message,
            }))
        }
    }
}

#[async_trait]
impl QueryHandler for QueryDispatcher {
    async fn evaluate(
        &self,
        proposal: &Proposal,
        timeout: Duration,
    ) -> GatewayResult<Option<Vec<u8>>> {
        if self.peers.is_empty() {
            return Err(GatewayError::NoQueryablePeers {
                channel: self.channel.clone(),
                msp_id: self.msp_id.clone(),
            });
        }

        let (start, observed) = self.first_index();
        let mut last_failure: Option<TransportError> = None;

        for offset in 0..self.peers.len() {
            let index = (start + offset) % self.peers.len();
            let peer = &self.peers[index];

            match self.try_peer(proposal, peer, timeout).await {
                Ok(outcome) => {
                    // A reached peer settles the call, whatever the chaincode said.
                    self.settle_cursor(observed, index);
                    debug!(
                        tx_id = %proposal.tx_id(),
                        peer = %peer.name,
                        index,
                        ok = outcome.is_ok(),
                        "[gateway] Query answered"
                    );
                    return outcome;
                }
                Err(e) if !e.is_failover_trigger() => {
                    return Err(GatewayError::Transport {
                        operation: "query",
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(
                        tx_id = %proposal.tx_id(),
                        peer = %peer.name,
                        error = %e,
                        "[gateway] Query peer failed, trying next"
                    );
                    last_failure = Some(e);
                }
            }
        }

        let (last_peer, last_error) = last_failure
            .map(|e| (e.peer().to_string(), e.to_string()))
            .unwrap_or_default();
        Err(GatewayError::NoPeersAvailable {
            attempted: self.peers.len(),
            last_peer,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PeerRoles, ProposalResponse};
    use crate::testing::{channel_with_peers, proposal_for, MockPeerTransport};
    use proptest::prelude::*;

    const PEERS: [&str; 4] = ["p1", "p2", "p3", "p4"];

    fn dispatcher(transport: Arc<MockPeerTransport>) -> QueryDispatcher {
        QueryDispatcher::sticky(transport, &channel_with_peers(&PEERS), "Org1MSP")
    }

    async fn query(d: &QueryDispatcher) -> GatewayResult<Option<Vec<u8>>> {
        d.evaluate(&proposal_for("ReadAsset"), Duration::from_millis(100))
            .await
    }

    #[tokio::test]
    async fn test_sticky_after_success() {
        let transport = Arc::new(MockPeerTransport::new());
        let d = dispatcher(transport.clone());
        for _ in 0..3 {
            query(&d).await.unwrap();
        }
        assert_eq!(transport.calls(), vec!["p1", "p1", "p1"]);
        assert_eq!(d.current_index(), Some(0));
    }

    #[tokio::test]
    async fn test_failover_moves_cursor() {
        let transport = Arc::new(MockPeerTransport::new());
        transport.respond("p2", ProposalResponse::success(b"from p2".to_vec()));
        transport.fail("p1");
        let d = dispatcher(transport.clone());

        assert_eq!(query(&d).await.unwrap(), Some(b"from p2".to_vec()));
        assert_eq!(d.current_index(), Some(1));

        query(&d).await.unwrap();
        assert_eq!(transport.calls(), vec!["p1", "p2", "p2"]);
    }

    #[tokio::test]
    async fn test_chaincode_error_short_circuits() {
        let transport = Arc::new(MockPeerTransport::new());
        transport.respond("p1", ProposalResponse::error(500, "asset not found"));
        let d = dispatcher(transport.clone());

        let err = query(&d).await.unwrap_err();
        assert!(matches!(err, GatewayError::Chaincode { status: 500, .. }));
        assert!(err.to_string().contains("asset not found"));
        assert_eq!(transport.calls(), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_all_fail_reports_last_reason() {
        let transport = Arc::new(MockPeerTransport::new());
        for peer in PEERS {
            transport.fail(peer);
        }
        let err = query(&dispatcher(transport)).await.unwrap_err();
        match err {
            GatewayError::NoPeersAvailable {
                attempted,
                last_peer,
                last_error,
            } => {
                assert_eq!(attempted, 4);
                assert_eq!(last_peer, "p4");
                assert!(last_error.contains("p4"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_access_denied_not_failed_over() {
        let transport = Arc::new(MockPeerTransport::new());
        transport.fail_with(
            "p1",
            TransportError::AccessDenied {
                peer: "p1".into(),
                message: "creator unknown".into(),
            },
        );
        let err = query(&dispatcher(transport.clone())).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { operation: "query", .. }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_queryable_peers() {
        let no_query = PeerRoles {
            chaincode_query: false,
            ..PeerRoles::all()
        };
        let topology = ChannelTopology::new("mychannel")
            .with_peer(PeerInfo::new("p1", "Org1MSP").with_roles(no_query));
        let d = QueryDispatcher::sticky(Arc::new(MockPeerTransport::new()), &topology, "Org1MSP");
        assert!(matches!(
            query(&d).await,
            Err(GatewayError::NoQueryablePeers { .. })
        ));
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let transport = Arc::new(MockPeerTransport::new());
        let d = QueryDispatcher::round_robin(
            transport.clone(),
            &channel_with_peers(&PEERS),
            "Org1MSP",
        );
        for _ in 0..5 {
            query(&d).await.unwrap();
        }
        assert_eq!(transport.calls(), vec!["p1", "p2", "p3", "p4", "p1"]);
    }

    proptest! {
        #[test]
        fn prop_sticks_to_first_reachable(down in 0usize..4, calls in 1usize..6) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let transport = Arc::new(MockPeerTransport::new());
                for peer in PEERS.iter().take(down) {
                    transport.fail(peer);
                }
                let d = dispatcher(transport.clone());
                for _ in 0..calls {
                    query(&d).await.unwrap();
                }
                let expected = PEERS[down].to_string();
                let recorded = transport.calls();
                // First call walks past the down peers; the rest go straight to the survivor.
                prop_assert_eq!(recorded.len(), down + calls);
                prop_assert!(recorded[down..].iter().all(|p| *p == expected));
                prop_assert_eq!(d.current_index(), Some(down));
                Ok(())
            })?;
        }
    }
}
