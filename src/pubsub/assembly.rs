//! Join assembly for subscriptions with several sub-subscriptions.
//!
//! Every peer that stores a partial match checks whether the event now has
//! a record for every ordinal. Several peers can see the complete set at
//! once, so the join is claimed at one deterministic peer first: the
//! lowest id holding a record of the last ordinal. Only the claim winner
//! joins, notifies and consumes the records.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::model::{Binding, Term};
use crate::overlay::Peer;
use crate::routing::{Operation, Routing};
use crate::sparql::is_satisfied;
use crate::storage::Dataset;
use crate::Result;
use super::index::PartialBinding;
use super::protocol;
use super::subscription::Subscription;

pub(crate) async fn assemble<D: Dataset>(
    peer: &Arc<Peer<D>>,
    subscription: &Arc<Subscription>,
    graph: &Term,
) -> Result<()> {
    let mut records: Vec<Vec<PartialBinding>> = Vec::with_capacity(subscription.len());
    for ss in &subscription.subsubscriptions {
        let response = peer
            .initiate(
                Routing::Anycast { region: ss.region.clone() },
                Operation::RetrievePartials {
                    subscription: subscription.id,
                    graph: graph.clone(),
                    index: ss.index,
                },
            )
            .await?;
        let partials = response.reply.into_partials();
        if partials.is_empty() {
            trace!(peer = %peer.id(), subscription = %subscription.id, missing = ss.index, "join incomplete");
            return Ok(());
        }
        records.push(partials);
    }

    let Some(holder) = records.last().and_then(|last| last.iter().map(|r| r.holder).min()) else {
        return Ok(());
    };
    let claim = Operation::ClaimJoin { subscription: subscription.id, graph: graph.clone() };
    if !peer.send_direct(holder, claim).await?.reply.is_true() {
        trace!(peer = %peer.id(), subscription = %subscription.id, %holder, "join claimed elsewhere");
        return Ok(());
    }

    let solutions = join(&records);
    debug!(
        peer = %peer.id(),
        subscription = %subscription.id,
        graph = %graph,
        solutions = solutions.len(),
        "join assembled"
    );
    let mut delivered = BTreeSet::new();
    for solution in solutions {
        if !subscription.filters.iter().all(|f| is_satisfied(f, &solution)) {
            continue;
        }
        let projected = solution.project(&subscription.result_vars);
        if delivered.insert(projected.clone()) {
            protocol::notify(peer, subscription, graph, projected).await;
        }
    }

    for region in subscription.regions() {
        peer.initiate(
            Routing::Anycast { region: region.clone() },
            Operation::ConsumePartials { subscription: subscription.id, graph: graph.clone() },
        )
        .await?;
    }
    Ok(())
}

/// Every compatible combination of one record per ordinal.
fn join(records: &[Vec<PartialBinding>]) -> Vec<Binding> {
    records.iter().fold(vec![Binding::new()], |acc, ordinal| {
        acc.iter()
            .flat_map(|left| ordinal.iter().filter_map(move |r| left.join(&r.binding)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Coordinate, ElementKind};
    use crate::overlay::PeerId;
    use crate::pubsub::SubscriptionId;

    fn record(index: usize, pairs: &[(&str, &str)]) -> PartialBinding {
        PartialBinding {
            subscription: SubscriptionId(1),
            index,
            graph: Term::iri("urn:e"),
            binding: pairs.iter().map(|(v, t)| (v.to_string(), Term::iri(*t))).collect(),
            coordinate: Coordinate::min(&[ElementKind::String; 4]),
            holder: PeerId(1),
        }
    }

    #[test]
    fn test_join_keeps_compatible_combinations() {
        let records = vec![
            vec![record(0, &[("s", "urn:a"), ("o", "urn:x")]), record(0, &[("s", "urn:b"), ("o", "urn:y")])],
            vec![record(1, &[("s", "urn:a"), ("o2", "urn:z")])],
        ];
        let solutions = join(&records);
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].get("o"), Some(&Term::iri("urn:x")));
        assert_eq!(solutions[0].get("o2"), Some(&Term::iri("urn:z")));
    }
}
