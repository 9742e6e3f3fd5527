//! # Transaction
//!
//! Single-use orchestrator for one logical transaction:
//! listen → endorse → order → confirm.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::network::ChannelServices;
use super::strategies::{CommitContext, CommitStrategy};
use crate::domain::{
    EndorsementTargets, GatewayError, GatewayResult, Proposal, ProposalArg, TransactionContext,
    TransactionId,
};

/// One chaincode invocation.
///
/// The transaction id is fixed at creation and exposed before `submit`, so
/// callers can register their own listeners on it. Settings are frozen once
/// `submit` or `evaluate` was called, and a second call fails with
/// `AlreadyInvoked`.
pub struct Transaction {
    services: Arc<ChannelServices>,
    chaincode_id: String,
    name: String,
    context: TransactionContext,
    transient: BTreeMap<String, Vec<u8>>,
    targets: EndorsementTargets,
    strategy: CommitStrategy,
    endorse_timeout: Duration,
    commit_timeout: Duration,
    event_timeout: Duration,
    invoked: AtomicBool,
}

impl Transaction {
    pub(crate) fn new(services: Arc<ChannelServices>, chaincode_id: &str, name: &str) -> Self {
        let context = TransactionContext::new(services.identity.clone());
        Self {
            chaincode_id: chaincode_id.to_string(),
            name: name.to_string(),
            context,
            transient: BTreeMap::new(),
            targets: EndorsementTargets::Default,
            strategy: services.commit_strategy.clone(),
            endorse_timeout: services.config.endorse_timeout(),
            commit_timeout: services.config.commit_timeout(),
            event_timeout: services.config.event_timeout(),
            invoked: AtomicBool::new(false),
            services,
        }
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transaction_id(&self) -> &TransactionId {
        self.context.tx_id()
    }

    /// Private data passed to the chaincode but not recorded on the ledger.
    pub fn set_transient(&mut self, transient: BTreeMap<String, Vec<u8>>) -> GatewayResult<&mut Self> {
        self.ensure_configurable()?;
        self.transient = transient;
        Ok(self)
    }

    /// Endorse on exactly these peers.
    pub fn set_endorsing_peers(&mut self, peers: Vec<String>) -> GatewayResult<&mut Self> {
        self.ensure_configurable()?;
        if peers.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "endorsing peer list must not be empty".to_string(),
            ));
        }
        self.targets = EndorsementTargets::Peers(peers);
        Ok(self)
    }

    /// Endorse on the peers of these organizations.
    pub fn set_endorsing_organizations(&mut self, orgs: Vec<String>) -> GatewayResult<&mut Self> {
        self.ensure_configurable()?;
        if orgs.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "endorsing organization list must not be empty".to_string(),
            ));
        }
        self.targets = EndorsementTargets::Organizations(orgs);
        Ok(self)
    }

    pub fn set_commit_strategy(&mut self, strategy: CommitStrategy) -> GatewayResult<&mut Self> {
        self.ensure_configurable()?;
        self.strategy = strategy;
        Ok(self)
    }

    /// Per-peer endorsement budget.
    pub fn set_endorse_timeout(&mut self, timeout: Duration) -> GatewayResult<&mut Self> {
        self.ensure_configurable()?;
        self.endorse_timeout = positive(timeout, "endorse timeout")?;
        Ok(self)
    }

    /// Ordering submission budget.
    pub fn set_commit_timeout(&mut self, timeout: Duration) -> GatewayResult<&mut Self> {
        self.ensure_configurable()?;
        self.commit_timeout = positive(timeout, "commit timeout")?;
        Ok(self)
    }

    /// Budget for the awaited commit event.
    pub fn set_event_timeout(&mut self, timeout: Duration) -> GatewayResult<&mut Self> {
        self.ensure_configurable()?;
        self.event_timeout = positive(timeout, "event timeout")?;
        Ok(self)
    }

    /// Endorse, order and confirm. Returns the first valid endorsement's
    /// payload; `None` if that response had no payload field.
    ///
    /// # Errors
    /// - `AlreadyInvoked` on reuse
    /// - endorsement errors, without contacting the ordering service
    /// - `CommitRejected` / `Transport` from ordering
    /// - `Timeout` / `TransactionInvalid` from confirmation
    pub async fn submit(&self, args: Vec<ProposalArg>) -> GatewayResult<Option<Vec<u8>>> {
        let proposal = self.build_proposal(args)?;
        self.mark_invoked()?;
        let tx_id = proposal.tx_id().clone();

        let context = CommitContext {
            events: self.services.events.clone(),
            topology: self.services.topology.clone(),
            msp_id: self.services.identity.msp_id.clone(),
        };
        let mut handler = self.strategy.handler(&tx_id, &context);
        // Listeners go up before the proposal leaves, so no commit event is missed.
        handler.start_listening().await?;

        let endorsement = match self
            .services
            .endorser
            .endorse(&proposal, self.endorse_timeout)
            .await
        {
            Ok(endorsement) => endorsement,
            Err(e) => {
                handler.cancel();
                return Err(e);
            }
        };
        let payload = endorsement.first_payload();

        if let Err(e) = self
            .services
            .submitter
            .commit(&proposal, endorsement.valid, self.commit_timeout)
            .await
        {
            handler.cancel();
            return Err(e);
        }
        debug!(tx_id = %tx_id, strategy = ?self.strategy, "[gateway] Awaiting commit");

        handler.wait(self.event_timeout).await?;
        info!(
            tx_id = %tx_id,
            function = %self.name,
            "[gateway] Transaction committed"
        );
        Ok(payload)
    }

    /// Read-only query through the channel's query handler.
    pub async fn evaluate(&self, args: Vec<ProposalArg>) -> GatewayResult<Option<Vec<u8>>> {
        let proposal = self.build_proposal(args)?;
        self.mark_invoked()?;
        self.services
            .query
            .evaluate(&proposal, self.services.config.query_timeout())
            .await
    }

    fn build_proposal(&self, args: Vec<ProposalArg>) -> GatewayResult<Proposal> {
        Ok(Proposal::new(
            self.context.clone(),
            self.services.topology.name(),
            &self.chaincode_id,
            &self.name,
            args,
        )?
        .with_transient(self.transient.clone())
        .with_targets(self.targets.clone()))
    }

    fn ensure_configurable(&self) -> GatewayResult<()> {
        if self.invoked.load(Ordering::Acquire) {
            return Err(self.already_invoked());
        }
        Ok(())
    }

    fn mark_invoked(&self) -> GatewayResult<()> {
        if self.invoked.swap(true, Ordering::AcqRel) {
            return Err(self.already_invoked());
        }
        Ok(())
    }

    fn already_invoked(&self) -> GatewayError {
        GatewayError::AlreadyInvoked {
            tx_id: self.transaction_id().to_string(),
        }
    }
}

fn positive(timeout: Duration, what: &str) -> GatewayResult<Duration> {
    if timeout.is_zero() {
        return Err(GatewayError::InvalidArgument(format!("{what} must be positive")));
    }
    Ok(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::network::Network;
    use crate::config::GatewayConfig;
    use crate::testing::{channel_with_peers, test_identity, MockEventHub, MockOrderer, MockPeerTransport};

    fn network() -> Network {
        Network::builder(
            channel_with_peers(&["p1", "p2"]),
            test_identity(),
            Arc::new(MockPeerTransport::new()),
            Arc::new(MockOrderer::new()),
            Arc::new(MockEventHub::new()),
        )
        .config(GatewayConfig::for_testing())
        .commit_strategy(CommitStrategy::NoWait)
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_settings_frozen_after_invoke() {
        let network = network();
        let mut tx = network.contract("basic").create_transaction("Move");
        tx.set_endorsing_peers(vec!["p2".into()]).unwrap();
        tx.submit(vec![]).await.unwrap();

        assert!(matches!(
            tx.set_transient(BTreeMap::new()),
            Err(GatewayError::AlreadyInvoked { .. })
        ));
        assert!(matches!(
            tx.evaluate(vec![]).await,
            Err(GatewayError::AlreadyInvoked { .. })
        ));
    }

    #[test]
    fn test_empty_peer_list_rejected() {
        let network = network();
        let mut tx = network.contract("basic").create_transaction("Move");
        assert!(matches!(
            tx.set_endorsing_peers(vec![]),
            Err(GatewayError::InvalidArgument(_))
        ));
        assert!(tx.set_event_timeout(Duration::ZERO).is_err());
    }

    #[test]
    fn test_id_known_before_submit() {
        let network = network();
        let tx = network.contract("basic").create_transaction("Move");
        let proposal = tx.build_proposal(vec!["a".into()]).unwrap();
        assert_eq!(proposal.tx_id(), tx.transaction_id());
    }
}
