//! What a peer does when a quadruple is published into its zone, and how
//! solutions reach subscribers.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::model::{Binding, Quadruple, Term};
use crate::overlay::Peer;
use crate::routing::{Operation, Routing};
use crate::sparql::is_satisfied;
use crate::storage::Dataset;
use crate::Result;
use super::assembly;
use super::index::PartialBinding;
use super::notification::Notification;
use super::subscription::Subscription;

/// Stores `quad`, then matches it against the local index.
///
/// A quadruple the peer already stores is not matched again.
pub(crate) async fn on_publish<D: Dataset>(peer: &Arc<Peer<D>>, quad: Quadruple) -> Result<()> {
    if !peer.store(quad.clone()).await? {
        trace!(peer = %peer.id(), quad = %quad, "already stored");
        return Ok(());
    }

    let matches = peer.index.read().matching(&quad);
    if matches.is_empty() {
        return Ok(());
    }
    debug!(peer = %peer.id(), quad = %quad, matches = matches.len(), "quadruple matched");

    let coordinate = peer.mapper().coordinate(&quad);
    for (subscription, index, binding) in matches {
        if subscription.len() == 1 {
            notify_solution(peer, &subscription, &quad.graph, &binding).await;
            continue;
        }

        let record = PartialBinding {
            subscription: subscription.id,
            index,
            graph: quad.graph.clone(),
            binding,
            coordinate: coordinate.clone(),
            holder: peer.id(),
        };
        let fresh = peer.partials.lock().insert(record);
        if fresh {
            assembly::assemble(peer, &subscription, &quad.graph).await?;
        }
    }
    Ok(())
}

/// Applies the subscription's filters to a complete solution and, if it
/// passes, delivers its projection.
pub(crate) async fn notify_solution<D: Dataset>(
    peer: &Arc<Peer<D>>,
    subscription: &Arc<Subscription>,
    graph: &Term,
    solution: &Binding,
) {
    if !subscription.filters.iter().all(|f| is_satisfied(f, solution)) {
        trace!(peer = %peer.id(), subscription = %subscription.id, "solution filtered out");
        return;
    }
    let projected = solution.project(&subscription.result_vars);
    notify(peer, subscription, graph, projected).await;
}

/// Delivers one notification. Failures are counted, and the subscription
/// is withdrawn once they reach the configured threshold.
pub(crate) async fn notify<D: Dataset>(
    peer: &Arc<Peer<D>>,
    subscription: &Arc<Subscription>,
    graph: &Term,
    binding: Binding,
) {
    let notification = Notification::new(subscription.id, graph.clone(), binding, peer.id());
    let Err(err) = peer.directory().deliver(subscription.subscriber, notification).await else {
        debug!(peer = %peer.id(), subscription = %subscription.id, graph = %graph, "notification delivered");
        return;
    };

    let failures = peer.record_notification_failure(subscription.id);
    warn!(
        peer = %peer.id(),
        subscription = %subscription.id,
        failures,
        error = %err,
        "notification failed"
    );
    if failures >= peer.config().notification_failure_threshold {
        if let Err(err) = withdraw(peer, subscription).await {
            warn!(peer = %peer.id(), subscription = %subscription.id, error = %err, "withdrawal failed");
        }
    }
}

/// Removes a subscription from every peer indexing it and forgets its
/// subscriber.
pub(crate) async fn withdraw<D: Dataset>(peer: &Arc<Peer<D>>, subscription: &Subscription) -> Result<()> {
    for region in subscription.regions() {
        peer.initiate(
            Routing::Anycast { region: region.clone() },
            Operation::Unsubscribe(subscription.id),
        )
        .await?;
    }
    peer.directory().unregister(subscription.subscriber);
    info!(peer = %peer.id(), subscription = %subscription.id, "subscription withdrawn");
    Ok(())
}
