//! # Commit Strategies
//!
//! How `submit` confirms that a transaction committed. Built-in handlers
//! listen on the event peers of the caller's organization or of the whole
//! channel and resolve when any or all of them report the transaction.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::EventSubscription;
use crate::adapters::ChannelTopology;
use crate::config::CommitScope;
use crate::domain::{GatewayError, GatewayResult, ListenerEvent, PeerInfo, TransactionId};
use crate::ports::{listener_fn, EventApi, ListenerHandle, ListenerOptions, TxFilter};

/// Confirms one transaction.
///
/// Lifecycle: `start_listening` before endorsement, then either `wait` after
/// an accepted submission or `cancel` when the pipeline fails.
#[async_trait]
pub trait CommitHandler: Send {
    /// Register whatever listeners the handler needs.
    async fn start_listening(&mut self) -> GatewayResult<()>;

    /// Wait for confirmation. Listeners are gone when this returns.
    async fn wait(&mut self, timeout: Duration) -> GatewayResult<()>;

    /// Drop all listeners without waiting.
    fn cancel(&mut self);
}

/// What a handler factory may use.
#[derive(Clone)]
pub struct CommitContext {
    pub events: Arc<EventSubscription>,
    pub topology: Arc<ChannelTopology>,
    /// Caller's organization.
    pub msp_id: String,
}

/// Creates a handler per transaction.
pub trait CommitHandlerFactory: Send + Sync {
    fn create(&self, tx_id: &TransactionId, context: &CommitContext) -> Box<dyn CommitHandler>;
}

/// Commit confirmation strategy, resolved once per transaction.
#[derive(Clone)]
pub enum CommitStrategy {
    NoWait,
    OrgAnyForTx,
    OrgAllForTx,
    NetworkAnyForTx,
    NetworkAllForTx,
    Custom(Arc<dyn CommitHandlerFactory>),
}

impl From<CommitScope> for CommitStrategy {
    fn from(scope: CommitScope) -> Self {
        match scope {
            CommitScope::NoWait => Self::NoWait,
            CommitScope::OrgAnyForTx => Self::OrgAnyForTx,
            CommitScope::OrgAllForTx => Self::OrgAllForTx,
            CommitScope::NetworkAnyForTx => Self::NetworkAnyForTx,
            CommitScope::NetworkAllForTx => Self::NetworkAllForTx,
        }
    }
}

impl std::fmt::Debug for CommitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoWait => "NoWait",
            Self::OrgAnyForTx => "OrgAnyForTx",
            Self::OrgAllForTx => "OrgAllForTx",
            Self::NetworkAnyForTx => "NetworkAnyForTx",
            Self::NetworkAllForTx => "NetworkAllForTx",
            Self::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

impl CommitStrategy {
    /// Handler confirming `tx_id`.
    pub fn handler(&self, tx_id: &TransactionId, context: &CommitContext) -> Box<dyn CommitHandler> {
        let (org, mode) = match self {
            Self::NoWait => return Box::new(NoWaitHandler),
            Self::Custom(factory) => return factory.create(tx_id, context),
            Self::OrgAnyForTx => (Some(context.msp_id.as_str()), WaitMode::Any),
            Self::OrgAllForTx => (Some(context.msp_id.as_str()), WaitMode::All),
            Self::NetworkAnyForTx => (None, WaitMode::Any),
            Self::NetworkAllForTx => (None, WaitMode::All),
        };
        Box::new(TxEventHandler::new(
            tx_id,
            context.events.clone(),
            context.topology.event_peers(org),
            mode,
        ))
    }
}

/// Returns as soon as the ordering service accepted.
pub struct NoWaitHandler;

#[async_trait]
impl CommitHandler for NoWaitHandler {
    async fn start_listening(&mut self) -> GatewayResult<()> {
        Ok(())
    }

    async fn wait(&mut self, _timeout: Duration) -> GatewayResult<()> {
        Ok(())
    }

    fn cancel(&mut self) {}
}

/// Resolution rule of a [`TxEventHandler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitMode {
    /// First peer to report the transaction.
    Any,
    /// Every peer reports it, or its stream is lost.
    All,
}

type PeerEvent = (String, Result<ListenerEvent, GatewayError>);

/// Waits for commit events of one transaction on a set of peers.
pub struct TxEventHandler {
    tx_id: String,
    events: Arc<EventSubscription>,
    peers: Vec<PeerInfo>,
    mode: WaitMode,
    handles: Vec<ListenerHandle>,
    receiver: Option<mpsc::UnboundedReceiver<PeerEvent>>,
}

impl TxEventHandler {
    pub fn new(
        tx_id: &TransactionId,
        events: Arc<EventSubscription>,
        peers: Vec<PeerInfo>,
        mode: WaitMode,
    ) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            events,
            peers,
            mode,
            handles: Vec::new(),
            receiver: None,
        }
    }

    async fn collect(&self, receiver: &mut mpsc::UnboundedReceiver<PeerEvent>) -> GatewayResult<()> {
        let total = self.peers.len();
        let mut answered: HashSet<String> = HashSet::new();
        let mut lost: Vec<GatewayError> = Vec::new();

        while let Some((peer, event)) = receiver.recv().await {
            match event {
                Ok(ListenerEvent::Commit(commit)) => {
                    if !commit.transaction.is_valid() {
                        return Err(GatewayError::TransactionInvalid {
                            tx_id: self.tx_id.clone(),
                            peer,
                            code: commit.transaction.validation_code,
                        });
                    }
                    debug!(tx_id = %self.tx_id, peer = %peer, "[gateway] Commit event received");
                    answered.insert(peer);
                    if self.mode == WaitMode::Any {
                        return Ok(());
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(tx_id = %self.tx_id, peer = %peer, error = %e, "[gateway] Commit listener lost");
                    lost.push(e);
                }
            }

            if answered.len() + lost.len() >= total {
                return match (answered.is_empty(), lost.pop()) {
                    (false, _) => Ok(()),
                    (true, Some(e)) => Err(e),
                    (true, None) => Ok(()),
                };
            }
        }
        Err(GatewayError::StreamDisconnected {
            peer: self.peers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(","),
            reason: "commit listeners closed".to_string(),
        })
    }
}

#[async_trait]
impl CommitHandler for TxEventHandler {
    /// Registers on every peer at once. A peer whose stream does not connect
    /// counts as lost; only when none connects does this fail.
    async fn start_listening(&mut self) -> GatewayResult<()> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let registrations = self.peers.iter().map(|peer| {
            let events_out = sender.clone();
            let name = peer.name.clone();
            let callback = listener_fn(move |event| {
                // The handler may have returned already.
                let _ = events_out.send((name.clone(), event));
                Ok(())
            });
            let options = ListenerOptions {
                peer: Some(peer.name.clone()),
                unregister_after_event: Some(true),
                ..Default::default()
            };
            self.events
                .add_commit_listener(TxFilter::Id(self.tx_id.clone()), callback, options)
        });
        let outcomes = join_all(registrations).await;

        let mut last_error = None;
        for (peer, outcome) in self.peers.iter().zip(outcomes) {
            match outcome {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    warn!(
                        tx_id = %self.tx_id,
                        peer = %peer.name,
                        error = %e,
                        "[gateway] Commit listener not connected"
                    );
                    let _ = sender.send((peer.name.clone(), Err(e.clone())));
                    last_error = Some(e);
                }
            }
        }
        if self.handles.is_empty() {
            if let Some(e) = last_error {
                self.cancel();
                return Err(e);
            }
            warn!(tx_id = %self.tx_id, "[gateway] No event peers in scope, commit not awaited");
        }
        self.receiver = Some(receiver);
        Ok(())
    }

    async fn wait(&mut self, timeout: Duration) -> GatewayResult<()> {
        if self.handles.is_empty() {
            return Ok(());
        }
        let Some(mut receiver) = self.receiver.take() else {
            return Ok(());
        };
        let outcome = tokio::time::timeout(timeout, self.collect(&mut receiver)).await;
        self.cancel();
        match outcome {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                operation: "commit event",
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn cancel(&mut self) {
        for handle in self.handles.drain(..) {
            // One-shot listeners that fired are already gone.
            let _ = self.events.unregister(&handle);
        }
        self.receiver = None;
    }
}

impl Drop for TxEventHandler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::domain::PeerRoles;
    use crate::testing::{proposal_for, MockEventHub};

    fn context(hub: Arc<MockEventHub>) -> CommitContext {
        let topology = Arc::new(
            ChannelTopology::new("mychannel")
                .with_peer(PeerInfo::new("p1", "Org1MSP"))
                .with_peer(PeerInfo::new("p2", "Org1MSP"))
                .with_peer(PeerInfo::new("p3", "Org2MSP"))
                .with_peer(PeerInfo::new("p4", "Org2MSP").with_roles(PeerRoles {
                    event_source: false,
                    ..PeerRoles::all()
                })),
        );
        let events = Arc::new(EventSubscription::new(
            hub,
            topology.clone(),
            &GatewayConfig::for_testing(),
        ));
        CommitContext {
            events,
            topology,
            msp_id: "Org1MSP".into(),
        }
    }

    #[tokio::test]
    async fn test_org_all_waits_for_every_org_peer() {
        let hub = Arc::new(MockEventHub::new());
        let ctx = context(hub.clone());
        let tx_id = proposal_for("Move").tx_id().clone();
        let mut handler = CommitStrategy::OrgAllForTx.handler(&tx_id, &ctx);
        handler.start_listening().await.unwrap();
        assert_eq!(ctx.events.listener_count(), 2);

        hub.commit(&["p1"], tx_id.as_str(), "VALID");
        let early = handler.wait(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(early, GatewayError::Timeout { .. }));
        assert_eq!(ctx.events.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_network_any_resolves_on_first() {
        let hub = Arc::new(MockEventHub::new());
        let ctx = context(hub.clone());
        let tx_id = proposal_for("Move").tx_id().clone();
        let mut handler = CommitStrategy::NetworkAnyForTx.handler(&tx_id, &ctx);
        handler.start_listening().await.unwrap();
        assert_eq!(ctx.events.listener_count(), 3);

        hub.commit(&["p3"], tx_id.as_str(), "VALID");
        handler.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(ctx.events.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_code_fails() {
        let hub = Arc::new(MockEventHub::new());
        let ctx = context(hub.clone());
        let tx_id = proposal_for("Move").tx_id().clone();
        let mut handler = CommitStrategy::OrgAnyForTx.handler(&tx_id, &ctx);
        handler.start_listening().await.unwrap();

        hub.commit(&["p2"], tx_id.as_str(), "MVCC_READ_CONFLICT");
        match handler.wait(Duration::from_secs(1)).await {
            Err(GatewayError::TransactionInvalid { code, peer, .. }) => {
                assert_eq!(code, "MVCC_READ_CONFLICT");
                assert_eq!(peer, "p2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_all_tolerates_lost_peer() {
        let hub = Arc::new(MockEventHub::new());
        let ctx = context(hub.clone());
        let tx_id = proposal_for("Move").tx_id().clone();
        let mut handler = CommitStrategy::OrgAllForTx.handler(&tx_id, &ctx);
        handler.start_listening().await.unwrap();
        assert!(hub.wait_for_opens("p2", 1).await);

        hub.set_unreachable("p2", true);
        hub.disconnect("p2");
        hub.commit(&["p1"], tx_id.as_str(), "VALID");
        handler.wait(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unconnected_peer_counts_as_lost() {
        let hub = Arc::new(MockEventHub::new());
        hub.set_unreachable("p2", true);
        let ctx = context(hub.clone());
        let tx_id = proposal_for("Move").tx_id().clone();
        let mut handler = CommitStrategy::OrgAllForTx.handler(&tx_id, &ctx);
        handler.start_listening().await.unwrap();
        assert_eq!(ctx.events.listener_count(), 1);

        hub.commit(&["p1"], tx_id.as_str(), "VALID");
        handler.wait(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_connected_peer_fails_listening() {
        let hub = Arc::new(MockEventHub::new());
        hub.set_unreachable("p1", true);
        hub.set_unreachable("p2", true);
        let ctx = context(hub);
        let tx_id = proposal_for("Move").tx_id().clone();
        let mut handler = CommitStrategy::OrgAnyForTx.handler(&tx_id, &ctx);

        assert!(matches!(
            handler.start_listening().await,
            Err(GatewayError::StreamDisconnected { .. })
        ));
        assert_eq!(ctx.events.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unregisters() {
        let hub = Arc::new(MockEventHub::new());
        let ctx = context(hub);
        let tx_id = proposal_for("Move").tx_id().clone();
        let mut handler = CommitStrategy::NetworkAllForTx.handler(&tx_id, &ctx);
        handler.start_listening().await.unwrap();
        handler.cancel();
        assert_eq!(ctx.events.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_no_wait_never_listens() {
        let ctx = context(Arc::new(MockEventHub::new()));
        let tx_id = proposal_for("Move").tx_id().clone();
        let mut handler = CommitStrategy::NoWait.handler(&tx_id, &ctx);
        handler.start_listening().await.unwrap();
        assert_eq!(ctx.events.listener_count(), 0);
        handler.wait(Duration::from_millis(1)).await.unwrap();
    }
}
