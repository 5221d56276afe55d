//! Unicast forward: greedy routing toward the peer owning a coordinate.
//!
//! At each hop the first dimension whose interval misses the target picks
//! the side to move to. Among the neighbors on that side, the one that
//! already contains the target on the most leading dimensions wins, so a
//! hop never loses the progress made on lower dimensions.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::geometry::{Containment, Coordinate, Direction, Zone};
use crate::overlay::{NeighborTable, Peer, PeerId};
use crate::storage::Dataset;
use crate::{Error, Result};
use super::{evaluate_branch, Envelope, Response};

pub(crate) async fn route<D: Dataset>(
    peer: &Arc<Peer<D>>,
    envelope: Envelope,
    target: &Coordinate,
) -> Result<Response> {
    let topology = peer.topology();
    if topology.zone.contains(target) {
        trace!(peer = %peer.id(), message = %envelope.id, hops = envelope.hop_count, "unicast delivered");
        if envelope.reply_expected {
            return Ok(evaluate_branch(peer, &envelope).await);
        }
        let hops = envelope.hop_count;
        let peer = Arc::clone(peer);
        tokio::spawn(async move {
            evaluate_branch(&peer, &envelope).await;
        });
        return Ok(Response::ack(hops));
    }

    let next = next_step(peer, &envelope, &topology.zone, &topology.neighbors, target)?;
    let forwarded = envelope.forwarded(peer.id());
    if envelope.reply_expected {
        return peer.forward(next, forwarded).await;
    }
    let hops = envelope.hop_count;
    let sender = Arc::clone(peer);
    tokio::spawn(async move {
        if let Err(err) = sender.forward(next, forwarded).await {
            warn!(peer = %sender.id(), neighbor = %next, error = %err, "background forward failed");
        }
    });
    Ok(Response::ack(hops))
}

/// Checks the hop budget and picks the neighbor to forward to.
pub(crate) fn next_step<D: Dataset>(
    peer: &Peer<D>,
    envelope: &Envelope,
    zone: &Zone,
    neighbors: &NeighborTable,
    target: &Coordinate,
) -> Result<PeerId> {
    if envelope.hop_count >= peer.config().max_hops {
        return Err(Error::RoutingError(format!(
            "message {} exceeded {} hops toward {target}",
            envelope.id,
            peer.config().max_hops
        )));
    }
    let next = next_hop(zone, neighbors, target).ok_or_else(|| {
        Error::RoutingError(format!("{} has no neighbor toward {target}", peer.id()))
    })?;
    debug!(peer = %peer.id(), next = %next, message = %envelope.id, "forwarding");
    Ok(next)
}

/// The neighbor to forward to, or `None` when the zone already contains
/// the target or no neighbor lies on the required side.
pub fn next_hop(zone: &Zone, neighbors: &NeighborTable, target: &Coordinate) -> Option<PeerId> {
    let dim = (0..zone.dimensions()).find(|&d| !zone.contains_element(d, &target[d]))?;
    let direction = match zone.containment(dim, &target[dim]) {
        Containment::Below => Direction::Lower,
        _ => Direction::Upper,
    };
    neighbors
        .in_direction(dim, direction)
        .into_iter()
        .min_by_key(|entry| {
            (0..zone.dimensions())
                .filter(|&d| d != dim)
                .map(|d| !entry.zone.contains_element(d, &target[d]))
                .collect::<Vec<bool>>()
        })
        .map(|entry| entry.peer)
}
