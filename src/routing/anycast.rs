//! Anycast: every peer whose zone intersects a region evaluates the
//! operation, and the replies are merged back along the reverse path.
//!
//! Outside the region the envelope travels like a unicast toward a point
//! of the region. The first peer inside starts the spread.

use std::sync::Arc;

use tracing::trace;

use crate::geometry::{Bound, Coordinate, Region, Zone};
use crate::overlay::Peer;
use crate::storage::Dataset;
use crate::Result;
use super::{evaluate_branch, fan_out, unicast, Envelope, Response};

pub(crate) async fn route<D: Dataset>(
    peer: &Arc<Peer<D>>,
    envelope: Envelope,
    region: &Region,
) -> Result<Response> {
    let topology = peer.topology();
    if !topology.zone.intersects(region) {
        let target = entry_point(&topology.zone, region);
        let next = unicast::next_step(peer, &envelope, &topology.zone, &topology.neighbors, &target)?;
        return peer.forward(next, envelope.forwarded(peer.id())).await;
    }
    spread(peer, envelope, region).await
}

/// Handling of an envelope by a peer inside `region`.
pub(crate) async fn spread<D: Dataset>(
    peer: &Arc<Peer<D>>,
    envelope: Envelope,
    region: &Region,
) -> Result<Response> {
    if !peer.first_receipt(envelope.id) {
        return Ok(Response::empty(envelope.hop_count));
    }

    let strategy = envelope.operation.merge_strategy();
    let forwarded = envelope.forwarded(peer.id());
    let copies: Vec<_> = peer
        .neighbors()
        .iter()
        .filter(|entry| entry.zone.intersects(region))
        .filter(|entry| !envelope.routing_list.contains(&entry.peer))
        .map(|entry| (entry.peer, forwarded.clone()))
        .collect();
    trace!(peer = %peer.id(), message = %envelope.id, branches = copies.len(), "anycast spread");

    let leaf = copies.is_empty();
    let (local, branches) = tokio::join!(evaluate_branch(peer, &envelope), fan_out(peer, copies, strategy));
    let mut response = local.merge(branches, strategy);
    if leaf {
        response.leaves += 1;
    }
    Ok(response)
}

/// A point of `region` to steer toward, as close to `zone` as the
/// region allows on every dimension.
pub(crate) fn entry_point(zone: &Zone, region: &Region) -> Coordinate {
    Coordinate::new((0..zone.dimensions()).map(|d| match region.bound(d) {
        Bound::Any => zone.lower_bound(d).clone(),
        Bound::Exact(element) => element.clone(),
        Bound::Range { lower, upper } => {
            let own = zone.lower_bound(d);
            if zone.intersects_bound(d, region.bound(d)) && own > lower && own < upper {
                own.clone()
            } else {
                lower.clone()
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Element, ElementKind};

    #[test]
    fn test_entry_point_lies_in_region() {
        let kinds = [ElementKind::String; 2];
        let (a, _) = Zone::full(&kinds).split_at(0, Element::string("m"));
        let region = Region::new([
            Bound::Exact(Element::string("x")),
            Bound::Range { lower: Element::string("c"), upper: Element::string("f") },
        ]);
        let point = entry_point(&a, &region);
        assert!(region.contains(&point));
        assert_eq!(point[0], Element::string("x"));

        let any = Region::all(2);
        assert_eq!(entry_point(&a, &any), a.lower().clone());
    }
}
