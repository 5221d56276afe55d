//! Joining the overlay.
//!
//! A newcomer asks a landmark peer to split. The landmark:
//! 1. picks the dimension `depth % dimensions`,
//! 2. splits at the estimated data center of that dimension, or at the
//!    middle when the estimate does not lie strictly inside its zone,
//! 3. keeps the lower half and grants the upper half together with the
//!    quadruples, index entries and partial matches that now belong to it,
//! 4. tells its old neighbors about both new zones.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::OverlayConfig;
use crate::geometry::{Element, Zone};
use crate::model::Quadruple;
use crate::pubsub::{PartialBinding, SubscriberDirectory, Subscription};
use crate::routing::Operation;
use crate::storage::Dataset;
use crate::{Error, Result};
use super::neighbor::{NeighborEntry, NeighborTable};
use super::peer::{Peer, Topology};
use super::transport::Transport;
use super::PeerId;

/// What a landmark hands over to a newcomer.
#[derive(Debug, Clone)]
pub struct JoinGrant {
    pub zone: Zone,
    pub depth: u32,
    pub neighbors: Vec<NeighborEntry>,
    pub quadruples: Vec<Quadruple>,
    pub subscriptions: Vec<(Arc<Subscription>, usize)>,
    pub partials: Vec<PartialBinding>,
}

pub(crate) async fn accept_join<D: Dataset>(peer: &Arc<Peer<D>>, newcomer: PeerId) -> Result<JoinGrant> {
    let _membership = peer.membership.lock().await;
    let topology = peer.topology();
    let dims = topology.zone.dimensions();
    let dim = topology.depth as usize % dims;

    peer.stats.sync().await;
    let at = split_element(peer, &topology.zone, dim)?;
    let (kept, given) = topology.zone.split_at(dim, at.clone());

    let quadruples = peer.take_quadruples_in(&given).await?;
    let subscriptions = peer.index.read().entries_intersecting(&given);
    peer.index.write().retain_intersecting(&kept);
    let partials = peer.partials.lock().take_in(&given);

    let mut granted = NeighborTable::new(dims);
    for entry in topology.neighbors.iter() {
        granted.update(&given, entry.peer, entry.zone);
    }
    granted.update(&given, peer.id(), kept.clone());

    let mut local = topology.neighbors.clone();
    local.refresh(&kept);
    local.update(&kept, newcomer, given.clone());
    peer.set_topology(Topology { zone: kept.clone(), neighbors: local, depth: topology.depth + 1 });

    info!(
        peer = %peer.id(),
        %newcomer,
        dim,
        at = %at,
        quadruples = quadruples.len(),
        subscriptions = subscriptions.len(),
        partials = partials.len(),
        "zone split"
    );

    for entry in topology.neighbors.iter() {
        let updates = [
            Operation::UpdateNeighbor { peer: peer.id(), zone: kept.clone() },
            Operation::UpdateNeighbor { peer: newcomer, zone: given.clone() },
        ];
        for update in updates {
            if let Err(err) = peer.send_direct(entry.peer, update).await {
                warn!(peer = %peer.id(), neighbor = %entry.peer, error = %err, "neighbor update failed");
            }
        }
    }

    Ok(JoinGrant {
        zone: given,
        depth: topology.depth + 1,
        neighbors: granted.iter().collect(),
        quadruples,
        subscriptions,
        partials,
    })
}

/// The statistics estimate when it can split `zone`, else the middle.
fn split_element<D: Dataset>(peer: &Peer<D>, zone: &Zone, dim: usize) -> Result<Element> {
    if let Some(estimate) = peer.stats.estimate_split(dim)? {
        if zone.can_split_at(dim, &estimate) {
            return Ok(estimate);
        }
    }
    let middle = zone.lower_bound(dim).middle(zone.upper_bound(dim));
    if zone.can_split_at(dim, &middle) {
        Ok(middle)
    } else {
        Err(Error::MembershipError(format!("zone {zone} cannot be split on dimension {dim}")))
    }
}

impl<D: Dataset> Peer<D> {
    /// Builds the newcomer's peer from what the landmark handed over.
    pub async fn from_grant(
        id: PeerId,
        grant: JoinGrant,
        dataset: D,
        config: Arc<OverlayConfig>,
        transport: Arc<dyn Transport>,
        directory: Arc<SubscriberDirectory>,
    ) -> Result<Self> {
        let mut neighbors = NeighborTable::new(config.dimensions);
        for entry in grant.neighbors {
            neighbors.update(&grant.zone, entry.peer, entry.zone);
        }
        let topology = Topology { zone: grant.zone, neighbors, depth: grant.depth };
        let peer = Peer::new(id, topology, dataset, config, transport, directory);

        for quad in grant.quadruples {
            peer.store(quad).await?;
        }
        {
            let mut index = peer.index.write();
            for (subscription, ordinal) in grant.subscriptions {
                index.insert(subscription, ordinal);
            }
        }
        {
            let mut partials = peer.partials.lock();
            for mut record in grant.partials {
                record.holder = id;
                partials.insert(record);
            }
        }
        Ok(peer)
    }
}
