//! Channel Topology Adapter
//!
//! Static view of a channel's peers and ordering nodes, as produced by the
//! external connection-profile loader.

use serde::{Deserialize, Serialize};

use crate::domain::{GatewayError, GatewayResult, PeerInfo};

/// Peers and orderers of one channel.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChannelTopology {
    name: String,
    peers: Vec<PeerInfo>,
    orderers: Vec<String>,
}

impl ChannelTopology {
    /// Empty topology for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            peers: Vec::new(),
            orderers: Vec::new(),
        }
    }

    /// Add or replace a peer (matched by name).
    pub fn with_peer(mut self, peer: PeerInfo) -> Self {
        match self.peers.iter_mut().find(|p| p.name == peer.name) {
            Some(existing) => *existing = peer,
            None => self.peers.push(peer),
        }
        self
    }

    /// Add an ordering node.
    pub fn with_orderer(mut self, orderer: impl Into<String>) -> Self {
        let orderer = orderer.into();
        if !self.orderers.contains(&orderer) {
            self.orderers.push(orderer);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    pub fn orderers(&self) -> &[String] {
        &self.orderers
    }

    /// Look a peer up by name.
    pub fn peer(&self, name: &str) -> GatewayResult<&PeerInfo> {
        self.peers.iter().find(|p| p.name == name).ok_or_else(|| {
            GatewayError::InvalidArgument(format!(
                "peer {name} is not part of channel {}",
                self.name
            ))
        })
    }

    /// Peers with the endorsing role.
    pub fn endorsing_peers(&self) -> Vec<PeerInfo> {
        self.filtered(|p| p.roles.endorsing)
    }

    /// Endorsing peers of one organization.
    pub fn endorsing_peers_for_org(&self, msp_id: &str) -> Vec<PeerInfo> {
        self.filtered(|p| p.roles.endorsing && p.msp_id == msp_id)
    }

    /// Chaincode-query peers of `msp_id`, or of the whole channel when the
    /// organization has none.
    pub fn query_peers(&self, msp_id: &str) -> Vec<PeerInfo> {
        let own = self.filtered(|p| p.roles.chaincode_query && p.msp_id == msp_id);
        if own.is_empty() {
            self.filtered(|p| p.roles.chaincode_query)
        } else {
            own
        }
    }

    /// Event-source peers, optionally restricted to one organization.
    pub fn event_peers(&self, msp_id: Option<&str>) -> Vec<PeerInfo> {
        self.filtered(|p| p.roles.event_source && msp_id.map_or(true, |m| p.msp_id == m))
    }

    fn filtered(&self, keep: impl Fn(&PeerInfo) -> bool) -> Vec<PeerInfo> {
        self.peers.iter().filter(|p| keep(p)).cloned().collect()
    }
}
