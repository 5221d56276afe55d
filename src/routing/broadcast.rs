//! Broadcast to every peer.
//!
//! | Strategy | Forwarding rule | Messages |
//! |----------|-----------------|----------|
//! | `Flooding` | anycast over the whole space | O(peers × degree) |
//! | `Efficient` | only along directions still carried by the copy | fewer, some duplicates |
//! | `Optimal` | only to neighbors this peer is the parent of | exactly one per peer |
//!
//! ## Optimal broadcast
//!
//! The split plan is the lower corner `P` of the initiator's zone. A peer
//! `S` is the parent of its neighbor `N` when, with `d` the first dimension
//! on which `N` misses `P[d]`:
//!
//! - `S` abuts `N` on `d`, on the side facing `P[d]`,
//! - `S` contains `P[e]` for every `e < d`,
//! - `S` contains `N.lower[e]` for every `e > d`.
//!
//! Exactly one zone satisfies this for every zone but the initiator's, and
//! following parents always gets closer to `P`, so parent links form a
//! spanning tree rooted at the initiator.

use std::sync::Arc;

use tracing::trace;

use crate::config::BroadcastStrategy;
use crate::geometry::{Containment, Coordinate, Direction, Region, Zone};
use crate::overlay::{Peer, PeerId};
use crate::storage::Dataset;
use crate::Result;
use super::{
    anycast, evaluate_branch, fan_out, BroadcastState, DirectionMask, Envelope, MergeStrategy, Response,
    Routing,
};

pub(crate) async fn route<D: Dataset>(
    peer: &Arc<Peer<D>>,
    envelope: Envelope,
    state: BroadcastState,
) -> Result<Response> {
    match state.strategy {
        BroadcastStrategy::Flooding => {
            let all = Region::all(peer.zone().dimensions());
            anycast::spread(peer, envelope, &all).await
        }
        BroadcastStrategy::Efficient => Ok(efficient(peer, envelope, state).await),
        BroadcastStrategy::Optimal => Ok(optimal(peer, envelope, state).await),
    }
}

// ============================================================================
// Efficient
// ============================================================================

async fn efficient<D: Dataset>(peer: &Arc<Peer<D>>, envelope: Envelope, state: BroadcastState) -> Response {
    let first = peer.first_receipt(envelope.id);
    let fresh = peer.claim_directions(envelope.id, state.directions);
    let strategy = envelope.operation.merge_strategy();

    let forwarded = envelope.forwarded(peer.id());
    let copies: Vec<_> = peer
        .neighbors()
        .slots()
        .into_iter()
        .filter(|(dim, direction, _)| fresh.contains(*dim, *direction))
        .filter(|(_, _, entry)| !envelope.routing_list.contains(&entry.peer))
        .map(|(dim, direction, entry)| {
            let mut copy = forwarded.clone();
            copy.routing = Routing::Broadcast(BroadcastState {
                directions: DirectionMask::for_child(dim, direction),
                ..state.clone()
            });
            (entry.peer, copy)
        })
        .collect();
    trace!(
        peer = %peer.id(),
        message = %envelope.id,
        first,
        branches = copies.len(),
        "efficient broadcast"
    );

    finish(peer, &envelope, first, copies, strategy).await
}

// ============================================================================
// Optimal
// ============================================================================

async fn optimal<D: Dataset>(peer: &Arc<Peer<D>>, envelope: Envelope, state: BroadcastState) -> Response {
    let first = peer.first_receipt(envelope.id);
    let strategy = envelope.operation.merge_strategy();
    let topology = peer.topology();
    let plan = state.plan.clone().unwrap_or_else(|| topology.zone.lower().clone());

    let copies: Vec<_> = if first {
        let mut forwarded = envelope.forwarded(peer.id());
        forwarded.routing = Routing::Broadcast(BroadcastState { plan: Some(plan.clone()), ..state });
        topology
            .neighbors
            .iter()
            .filter(|entry| is_parent(&topology.zone, &entry.zone, &plan))
            .map(|entry| (entry.peer, forwarded.clone()))
            .collect()
    } else {
        Vec::new()
    };
    trace!(peer = %peer.id(), message = %envelope.id, children = copies.len(), "optimal broadcast");

    finish(peer, &envelope, first, copies, strategy).await
}

/// Whether `local` is the parent of `child` in the dissemination tree of
/// the plan `plan`.
pub fn is_parent(local: &Zone, child: &Zone, plan: &Coordinate) -> bool {
    let dims = child.dimensions();
    let Some(d) = (0..dims).find(|&d| !child.contains_element(d, &plan[d])) else {
        // The child is the root.
        return false;
    };
    let faces_plan = match child.containment(d, &plan[d]) {
        Containment::Below => local.abuts(child, d, Direction::Upper),
        _ => local.abuts(child, d, Direction::Lower),
    };
    faces_plan
        && (0..d).all(|e| local.contains_element(e, &plan[e]))
        && (d + 1..dims).all(|e| local.contains_element(e, child.lower_bound(e)))
}

// ============================================================================
// Shared
// ============================================================================

async fn finish<D: Dataset>(
    peer: &Arc<Peer<D>>,
    envelope: &Envelope,
    first: bool,
    copies: Vec<(PeerId, Envelope)>,
    strategy: MergeStrategy,
) -> Response {
    let leaf = copies.is_empty();
    let local = async {
        if first {
            evaluate_branch(peer, envelope).await
        } else {
            Response::empty(envelope.hop_count)
        }
    };
    let (local, branches) = tokio::join!(local, fan_out(peer, copies, strategy));
    let mut response = local.merge(branches, strategy);
    if leaf && first {
        peer.constraint_reached();
        response.leaves += 1;
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Element, ElementKind};

    const KINDS: [ElementKind; 2] = [ElementKind::String; 2];

    /// Four quadrants: a=(lo,lo) b=(hi,lo) c=(lo,hi) d=(hi,hi).
    fn quadrants() -> [Zone; 4] {
        let (left, right) = Zone::full(&KINDS).split_at(0, Element::string("m"));
        let (a, c) = left.split_at(1, Element::string("m"));
        let (b, d) = right.split_at(1, Element::string("m"));
        [a, b, c, d]
    }

    #[test]
    fn test_every_zone_but_the_root_has_one_parent() {
        let zones = quadrants();
        for root in &zones {
            let plan = root.lower().clone();
            for child in &zones {
                let parents = zones.iter().filter(|z| is_parent(z, child, &plan)).count();
                let expected = if child == root { 0 } else { 1 };
                assert_eq!(parents, expected, "root {root}, child {child}");
            }
        }
    }

    #[test]
    fn test_parent_of_far_corner() {
        let [a, b, c, d] = quadrants();
        let plan = a.lower().clone();
        // d misses P on dimension 0 first, so its parent is c.
        assert!(is_parent(&c, &d, &plan));
        assert!(!is_parent(&b, &d, &plan));
        assert!(is_parent(&a, &b, &plan));
        assert!(is_parent(&a, &c, &plan));
    }
}
