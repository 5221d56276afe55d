//! # Message Routing
//!
//! Delivery patterns built on zones and neighbor tables. The routing
//! descriptor of an envelope selects the pattern; the operation says what
//! the reached peers do.
//!
//! | Routing | Reaches | Module |
//! |---------|---------|--------|
//! | `Direct` | the addressed peer | here |
//! | `Unicast` | the peer whose zone contains a coordinate | `unicast` |
//! | `Anycast` | every peer whose zone intersects a region | `anycast` |
//! | `Broadcast` | every peer (flooding, efficient or optimal) | `broadcast` |
//!
//! Replies travel back along the path the request took and are merged at
//! every fork with the operation's [`MergeStrategy`].

pub mod message;
pub mod dedupe;
pub mod unicast;
pub mod anycast;
pub mod broadcast;

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::warn;

use crate::overlay::{Peer, PeerId};
use crate::storage::Dataset;
use crate::Result;

pub use message::{
    BroadcastState, DirectionMask, Envelope, MergeStrategy, MessageId, Operation, Reply, Response,
    Routing,
};
pub use dedupe::{BoundedMap, BoundedSet};

/// Handles an envelope that arrived at `peer`.
pub async fn route<D: Dataset>(peer: &Arc<Peer<D>>, envelope: Envelope) -> Result<Response> {
    match envelope.routing.clone() {
        Routing::Direct => {
            let hops = envelope.hop_count;
            let reply = peer.evaluate(&envelope.operation).await?;
            Ok(Response::delivered(peer.id(), reply, hops))
        }
        Routing::Unicast { target } => unicast::route(peer, envelope, &target).await,
        Routing::Anycast { region } => anycast::route(peer, envelope, &region).await,
        Routing::Broadcast(state) => broadcast::route(peer, envelope, state).await,
    }
}

/// Evaluates locally and reports a failure as a failed branch.
pub(crate) async fn evaluate_branch<D: Dataset>(peer: &Arc<Peer<D>>, envelope: &Envelope) -> Response {
    match peer.evaluate(&envelope.operation).await {
        Ok(reply) => Response::delivered(peer.id(), reply, envelope.hop_count),
        Err(err) => {
            warn!(
                peer = %peer.id(),
                operation = envelope.operation.name(),
                error = %err,
                "local evaluation failed"
            );
            Response::failed(peer.id())
        }
    }
}

/// Sends every copy concurrently and merges the branch responses. A branch
/// that fails is reported in `failures` without affecting the others.
pub(crate) async fn fan_out<D: Dataset>(
    peer: &Arc<Peer<D>>,
    copies: Vec<(PeerId, Envelope)>,
    strategy: MergeStrategy,
) -> Response {
    let mut branches = JoinSet::new();
    for (to, envelope) in copies {
        let peer = Arc::clone(peer);
        branches.spawn(async move { (to, peer.forward(to, envelope).await) });
    }

    let mut merged = Response::default();
    while let Some(joined) = branches.join_next().await {
        let branch = match joined {
            Ok((_, Ok(response))) => response,
            Ok((to, Err(err))) => {
                warn!(peer = %peer.id(), neighbor = %to, error = %err, "branch failed");
                Response::failed(to)
            }
            Err(err) => {
                warn!(peer = %peer.id(), error = %err, "branch task aborted");
                continue;
            }
        };
        merged = merged.merge(branch, strategy);
    }
    merged
}
