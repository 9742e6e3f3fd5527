//! # Commit Submitter
//!
//! Sends an endorsed transaction to the ordering service exactly once.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::ChannelTopology;
use crate::config::GatewayConfig;
use crate::domain::{
    CommitResult, EndorsementResponse, GatewayError, GatewayResult, Proposal,
    TransactionEnvelope, TransportError,
};
use crate::ports::{DiscoveryProvider, OrdererTransport};

/// Submits endorsed transactions for ordering.
pub struct CommitSubmitter {
    orderer: Arc<dyn OrdererTransport>,
    topology: Arc<ChannelTopology>,
    discovery: Option<Arc<dyn DiscoveryProvider>>,
    default_timeout: Duration,
}

impl CommitSubmitter {
    pub fn new(
        orderer: Arc<dyn OrdererTransport>,
        topology: Arc<ChannelTopology>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            orderer,
            topology,
            discovery: None,
            default_timeout: config.commit_timeout(),
        }
    }

    /// Take committers from discovery instead of the channel's orderers.
    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoveryProvider>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Submit the valid responses of `proposal`.
    ///
    /// No retry: a transport failure surfaces as `Transport` and a status
    /// other than `SUCCESS` as `CommitRejected` carrying `valid` unchanged.
    pub async fn commit(
        &self,
        proposal: &Proposal,
        valid: Vec<EndorsementResponse>,
        timeout: Duration,
    ) -> GatewayResult<CommitResult> {
        let committers = self.committers().await?;
        let envelope = TransactionEnvelope {
            tx_id: proposal.tx_id().clone(),
            channel: proposal.channel().to_string(),
            endorsements: valid,
        };

        debug!(
            tx_id = %envelope.tx_id,
            committers = ?committers,
            endorsements = envelope.endorsements.len(),
            "[gateway] Submitting transaction"
        );

        let call = self.orderer.send_commit(&envelope, &committers, timeout);
        let status = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => return Err(self.transport_failure(&envelope, source)),
            Err(_) => {
                let source = TransportError::Timeout {
                    peer: committers.join(","),
                    timeout_ms: timeout.as_millis() as u64,
                };
                return Err(self.transport_failure(&envelope, source));
            }
        };

        CommitResult::from_status(status, envelope.endorsements).into_result(&envelope.tx_id)
    }

    async fn committers(&self) -> GatewayResult<Vec<String>> {
        let committers = match &self.discovery {
            Some(discovery) => discovery.committers().await?,
            None => self.topology.orderers().to_vec(),
        };
        if committers.is_empty() {
            return Err(GatewayError::Config(format!(
                "no ordering nodes for channel {}",
                self.topology.name()
            )));
        }
        Ok(committers)
    }

    fn transport_failure(&self, envelope: &TransactionEnvelope, source: TransportError) -> GatewayError {
        warn!(
            tx_id = %envelope.tx_id,
            error = %source,
            "[gateway] Commit submission failed"
        );
        GatewayError::Transport {
            operation: "commit",
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProposalResponse;
    use crate::testing::{channel_with_peers, proposal_for, MockOrderer};

    fn responses() -> Vec<EndorsementResponse> {
        ["p1", "p2"]
            .iter()
            .map(|p| EndorsementResponse::from_response(*p, ProposalResponse::success(b"ok".to_vec())))
            .collect()
    }

    fn submitter(orderer: Arc<MockOrderer>) -> CommitSubmitter {
        let topology = Arc::new(channel_with_peers(&["p1", "p2"]));
        CommitSubmitter::new(orderer, topology, &GatewayConfig::for_testing())
    }

    #[tokio::test]
    async fn test_success_accepted() {
        let orderer = Arc::new(MockOrderer::new());
        let result = submitter(orderer.clone())
            .commit(&proposal_for("Move"), responses(), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(result.is_accepted());
        assert_eq!(orderer.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_keeps_exact_responses() {
        let orderer = Arc::new(MockOrderer::with_status(Some("BAD_REQUEST")));
        let err = submitter(orderer)
            .commit(&proposal_for("Move"), responses(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CommitRejected { .. }));
        assert_eq!(err.responses(), responses().as_slice());
    }

    #[tokio::test]
    async fn test_missing_status_rejected() {
        let orderer = Arc::new(MockOrderer::with_status(None));
        let err = submitter(orderer)
            .commit(&proposal_for("Move"), responses(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CommitRejected { status: None, .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_not_retried() {
        let orderer = Arc::new(MockOrderer::failing());
        let err = submitter(orderer.clone())
            .commit(&proposal_for("Move"), responses(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport { operation: "commit", .. }));
        assert_eq!(orderer.submissions().len(), 1);
    }
}
