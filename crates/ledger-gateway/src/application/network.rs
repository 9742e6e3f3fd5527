//! # Network
//!
//! Per-channel entry point: wires the transports into the pipelines and
//! hands out `Contract`s and event registrations.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::commit::CommitSubmitter;
use super::endorsement::EndorsementCoordinator;
use super::events::EventSubscription;
use super::query::{QueryHandler, QueryStrategy};
use super::strategies::CommitStrategy;
use super::transaction::Transaction;
use crate::adapters::ChannelTopology;
use crate::config::GatewayConfig;
use crate::domain::{ConnectionState, GatewayError, GatewayResult, Identity, ProposalArg};
use crate::ports::{
    ContractApi, DiscoveryProvider, EventApi, EventStreamConnector, ListenerCallback,
    ListenerHandle, ListenerOptions, OrdererTransport, PeerTransport, TxFilter,
};

/// Everything the transactions of one channel share.
pub(crate) struct ChannelServices {
    pub identity: Identity,
    pub config: GatewayConfig,
    pub topology: Arc<ChannelTopology>,
    pub endorser: EndorsementCoordinator,
    pub submitter: CommitSubmitter,
    pub query: Arc<dyn QueryHandler>,
    pub events: Arc<EventSubscription>,
    pub commit_strategy: CommitStrategy,
}

/// Builder for [`Network`].
pub struct NetworkBuilder {
    topology: ChannelTopology,
    identity: Identity,
    peer_transport: Arc<dyn PeerTransport>,
    orderer: Arc<dyn OrdererTransport>,
    connector: Arc<dyn EventStreamConnector>,
    config: GatewayConfig,
    discovery: Option<Arc<dyn DiscoveryProvider>>,
    query_strategy: Option<QueryStrategy>,
    commit_strategy: Option<CommitStrategy>,
}

impl NetworkBuilder {
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Used only when `config.discovery.enabled` is set.
    pub fn discovery(mut self, discovery: Arc<dyn DiscoveryProvider>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Overrides `config.query.strategy`.
    pub fn query_strategy(mut self, strategy: QueryStrategy) -> Self {
        self.query_strategy = Some(strategy);
        self
    }

    /// Overrides `config.commit.strategy`.
    pub fn commit_strategy(mut self, strategy: CommitStrategy) -> Self {
        self.commit_strategy = Some(strategy);
        self
    }

    /// Validate the configuration and wire the pipelines.
    ///
    /// # Errors
    /// `Config` for invalid settings, or discovery enabled without a provider.
    pub fn build(self) -> GatewayResult<Network> {
        self.config.validate()?;
        let discovery = match (self.config.discovery.enabled, self.discovery) {
            (true, Some(discovery)) => Some(discovery),
            (true, None) => {
                return Err(GatewayError::Config(
                    "discovery.enabled is set but no discovery provider was given".to_string(),
                ))
            }
            (false, _) => None,
        };

        let topology = Arc::new(self.topology);
        let mut endorser =
            EndorsementCoordinator::new(self.peer_transport.clone(), topology.clone(), &self.config);
        let mut submitter = CommitSubmitter::new(self.orderer, topology.clone(), &self.config);
        if let Some(discovery) = discovery {
            endorser = endorser.with_discovery(discovery.clone());
            submitter = submitter.with_discovery(discovery);
        }

        let query = self
            .query_strategy
            .unwrap_or_else(|| self.config.query.strategy.into())
            .into_handler(self.peer_transport, &topology, &self.identity.msp_id);
        let commit_strategy = self
            .commit_strategy
            .unwrap_or_else(|| self.config.commit.strategy.into());
        let events = Arc::new(EventSubscription::new(
            self.connector,
            topology.clone(),
            &self.config,
        ));

        info!(
            channel = %topology.name(),
            msp_id = %self.identity.msp_id,
            commit_strategy = ?commit_strategy,
            "[gateway] Network ready"
        );
        Ok(Network {
            services: Arc::new(ChannelServices {
                identity: self.identity,
                config: self.config,
                topology,
                endorser,
                submitter,
                query,
                events,
                commit_strategy,
            }),
        })
    }
}

/// One channel as seen by one identity.
pub struct Network {
    services: Arc<ChannelServices>,
}

impl Network {
    pub fn builder(
        topology: ChannelTopology,
        identity: Identity,
        peer_transport: Arc<dyn PeerTransport>,
        orderer: Arc<dyn OrdererTransport>,
        connector: Arc<dyn EventStreamConnector>,
    ) -> NetworkBuilder {
        NetworkBuilder {
            topology,
            identity,
            peer_transport,
            orderer,
            connector,
            config: GatewayConfig::default(),
            discovery: None,
            query_strategy: None,
            commit_strategy: None,
        }
    }

    pub fn channel(&self) -> &str {
        self.services.topology.name()
    }

    pub fn contract(&self, chaincode_id: &str) -> Contract {
        Contract {
            services: self.services.clone(),
            chaincode_id: chaincode_id.to_string(),
        }
    }

    /// Shared event subscription of the channel.
    pub fn events(&self) -> &Arc<EventSubscription> {
        &self.services.events
    }

    pub fn connection_state(&self, peer: &str) -> Option<ConnectionState> {
        self.services.events.connection_state(peer)
    }

    /// Stop all event streams and drop every registration.
    pub fn close(&self) {
        self.services.events.close();
    }
}

#[async_trait]
impl EventApi for Network {
    async fn add_commit_listener(
        &self,
        filter: TxFilter,
        callback: ListenerCallback,
        options: ListenerOptions,
    ) -> GatewayResult<ListenerHandle> {
        self.services
            .events
            .add_commit_listener(filter, callback, options)
            .await
    }

    async fn add_block_listener(
        &self,
        callback: ListenerCallback,
        options: ListenerOptions,
    ) -> GatewayResult<ListenerHandle> {
        self.services.events.add_block_listener(callback, options).await
    }

    fn unregister(&self, handle: &ListenerHandle) -> GatewayResult<()> {
        self.services.events.unregister(handle)
    }
}

/// A chaincode on the channel.
#[derive(Clone)]
pub struct Contract {
    services: Arc<ChannelServices>,
    chaincode_id: String,
}

impl Contract {
    pub fn chaincode_id(&self) -> &str {
        &self.chaincode_id
    }

    /// A fresh single-use transaction with its own id.
    pub fn create_transaction(&self, name: &str) -> Transaction {
        Transaction::new(self.services.clone(), &self.chaincode_id, name)
    }
}

#[async_trait]
impl ContractApi for Contract {
    async fn submit_transaction(
        &self,
        name: &str,
        args: Vec<ProposalArg>,
    ) -> GatewayResult<Option<Vec<u8>>> {
        self.create_transaction(name).submit(args).await
    }

    async fn evaluate_transaction(
        &self,
        name: &str,
        args: Vec<ProposalArg>,
    ) -> GatewayResult<Option<Vec<u8>>> {
        self.create_transaction(name).evaluate(args).await
    }
}
