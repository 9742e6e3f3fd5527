//! # Endorsement Coordinator
//!
//! Fans a proposal out to its resolved targets in parallel and reconciles
//! the complete result set.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::ChannelTopology;
use crate::algorithms::{reconcile, resolve_targets, EndorsementResult};
use crate::config::GatewayConfig;
use crate::domain::{
    EndorsementResponse, EndorsementTargets, GatewayResult, PeerInfo, Proposal, TransportError,
};
use crate::ports::{DiscoveryProvider, PeerTransport};

/// Sends proposals to endorsing peers.
pub struct EndorsementCoordinator {
    transport: Arc<dyn PeerTransport>,
    topology: Arc<ChannelTopology>,
    discovery: Option<Arc<dyn DiscoveryProvider>>,
    require_payload_agreement: bool,
    default_timeout: Duration,
}

impl EndorsementCoordinator {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        topology: Arc<ChannelTopology>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            transport,
            topology,
            discovery: None,
            require_payload_agreement: config.endorsement.require_payload_agreement,
            default_timeout: config.endorse_timeout(),
        }
    }

    /// Use a discovery plan when the proposal names no explicit targets.
    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoveryProvider>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Per-peer timeout used when the caller sets none.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Endorse `proposal`, waiting for every target to settle.
    ///
    /// # Errors
    /// - `InvalidArgument` if an explicit target peer is unknown
    /// - `NoResponses` if the targets resolve to nothing
    /// - `NoValidResponses` / `EndorsementMismatch` from reconciliation
    pub async fn endorse(
        &self,
        proposal: &Proposal,
        timeout: Duration,
    ) -> GatewayResult<EndorsementResult> {
        let plan = match (&self.discovery, proposal.targets()) {
            (Some(discovery), EndorsementTargets::Default) => {
                Some(discovery.endorsement_plan(proposal).await?)
            }
            _ => None,
        };
        let (peers, source) = resolve_targets(proposal.targets(), &self.topology, plan)?;

        debug!(
            tx_id = %proposal.tx_id(),
            targets = peers.len(),
            ?source,
            "[gateway] Sending proposal"
        );

        let calls = peers.iter().map(|peer| self.endorse_one(proposal, peer, timeout));
        let responses = join_all(calls).await;

        let result = reconcile(proposal.tx_id(), responses, self.require_payload_agreement)?;
        debug!(
            tx_id = %proposal.tx_id(),
            valid = result.valid.len(),
            invalid = result.invalid.len(),
            "[gateway] Endorsement complete"
        );
        Ok(result)
    }

    async fn endorse_one(
        &self,
        proposal: &Proposal,
        peer: &PeerInfo,
        timeout: Duration,
    ) -> EndorsementResponse {
        let call = self.transport.send_proposal(proposal, peer, timeout);
        let error = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => return EndorsementResponse::from_response(&peer.name, response),
            Ok(Err(e)) => e,
            Err(_) => TransportError::Timeout {
                peer: peer.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            },
        };
        warn!(
            tx_id = %proposal.tx_id(),
            peer = %peer.name,
            error = %error,
            "[gateway] Endorsement call failed"
        );
        EndorsementResponse::from_transport_error(&peer.name, error)
    }
}
