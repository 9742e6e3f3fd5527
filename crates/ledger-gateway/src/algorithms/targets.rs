//! # Endorsement Target Resolution
//!
//! Precedence: explicit peers > explicit organizations > discovery plan >
//! every endorsing peer on the channel.

use crate::adapters::ChannelTopology;
use crate::domain::{EndorsementTargets, GatewayResult, PeerInfo};

/// Where the resolved target set came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetSource {
    /// Caller named the peers.
    ExplicitPeers,
    /// Caller named organizations.
    Organizations,
    /// Discovery plan.
    Discovery,
    /// All endorsing peers on the channel.
    Channel,
}

/// Resolve the peers a proposal is sent to.
///
/// `discovery_plan` is consulted only when no explicit targets were given.
///
/// # Errors
/// - `InvalidArgument` if an explicit peer is not on the channel
pub fn resolve_targets(
    targets: &EndorsementTargets,
    topology: &ChannelTopology,
    discovery_plan: Option<Vec<PeerInfo>>,
) -> GatewayResult<(Vec<PeerInfo>, TargetSource)> {
    match targets {
        EndorsementTargets::Peers(names) => {
            let mut peers = Vec::with_capacity(names.len());
            for name in names {
                let peer = topology.peer(name)?;
                if !peers.contains(peer) {
                    peers.push(peer.clone());
                }
            }
            Ok((peers, TargetSource::ExplicitPeers))
        }
        EndorsementTargets::Organizations(orgs) => {
            let mut peers: Vec<PeerInfo> = Vec::new();
            for org in orgs {
                for peer in topology.endorsing_peers_for_org(org) {
                    if !peers.contains(&peer) {
                        peers.push(peer);
                    }
                }
            }
            Ok((peers, TargetSource::Organizations))
        }
        EndorsementTargets::Default => match discovery_plan {
            Some(plan) => Ok((plan, TargetSource::Discovery)),
            None => Ok((topology.endorsing_peers(), TargetSource::Channel)),
        },
    }
}
