//! Per-peer subscription index and partial-match store.

use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::geometry::{Coordinate, Zone};
use crate::model::{Binding, Quadruple, Term};
use crate::overlay::PeerId;
use super::matcher::match_quadruple;
use super::subscription::{Subscription, SubscriptionId};

// ============================================================================
// Subscription index
// ============================================================================

#[derive(Debug, Clone)]
struct IndexEntry {
    subscription: Arc<Subscription>,
    index: usize,
}

/// Sub-subscriptions indexed on this peer, bucketed by their bound
/// predicate (`None` for a predicate variable).
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    entries: HashMap<Option<Term>, Vec<IndexEntry>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexing the same sub-subscription twice is a no-op.
    pub fn insert(&mut self, subscription: Arc<Subscription>, index: usize) {
        let Some(ss) = subscription.subsubscriptions.get(index) else {
            return;
        };
        let key = ss.query.predicate().as_term().cloned();
        let bucket = self.entries.entry(key).or_default();
        if !bucket.iter().any(|e| e.subscription.id == subscription.id && e.index == index) {
            bucket.push(IndexEntry { subscription, index });
        }
    }

    /// Drops every sub-subscription of `id`. Returns how many were dropped.
    pub fn remove(&mut self, id: SubscriptionId) -> usize {
        let mut removed = 0;
        for bucket in self.entries.values_mut() {
            let before = bucket.len();
            bucket.retain(|e| e.subscription.id != id);
            removed += before - bucket.len();
        }
        self.entries.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// Sub-subscriptions `quad` matches, with the binding it produces.
    pub fn matching(&self, quad: &Quadruple) -> Vec<(Arc<Subscription>, usize, Binding)> {
        let bound = self.entries.get(&Some(quad.predicate.clone()));
        let open = self.entries.get(&None);
        bound
            .into_iter()
            .chain(open)
            .flatten()
            .filter_map(|e| {
                let ss = &e.subscription.subsubscriptions[e.index];
                match_quadruple(&ss.query, quad).map(|b| (Arc::clone(&e.subscription), e.index, b))
            })
            .collect()
    }

    /// Entries whose region intersects `zone`.
    pub fn entries_intersecting(&self, zone: &Zone) -> Vec<(Arc<Subscription>, usize)> {
        self.entries
            .values()
            .flatten()
            .filter(|e| zone.intersects(&e.subscription.subsubscriptions[e.index].region))
            .map(|e| (Arc::clone(&e.subscription), e.index))
            .collect()
    }

    /// Keeps only the entries whose region intersects `zone`.
    pub fn retain_intersecting(&mut self, zone: &Zone) {
        for bucket in self.entries.values_mut() {
            bucket.retain(|e| zone.intersects(&e.subscription.subsubscriptions[e.index].region));
        }
        self.entries.retain(|_, bucket| !bucket.is_empty());
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.values().flatten().any(|e| e.subscription.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Partial matches
// ============================================================================

/// A match of one sub-subscription, waiting for its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialBinding {
    pub subscription: SubscriptionId,
    /// Ordinal of the matched sub-subscription.
    pub index: usize,
    /// Graph of the event the quadruple belongs to.
    pub graph: Term,
    pub binding: Binding,
    /// Coordinate of the matched quadruple, which decides the record's
    /// owner after a split.
    pub coordinate: Coordinate,
    pub holder: PeerId,
}

/// Partial matches held by a peer, keyed by subscription and event graph.
#[derive(Debug, Default)]
pub struct PartialStore {
    records: HashMap<(SubscriptionId, Term), Vec<PartialBinding>>,
}

impl PartialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if an identical record was already held.
    pub fn insert(&mut self, record: PartialBinding) -> bool {
        let bucket = self.records.entry((record.subscription, record.graph.clone())).or_default();
        if bucket.iter().any(|r| r.index == record.index && r.binding == record.binding) {
            return false;
        }
        bucket.push(record);
        true
    }

    pub fn retrieve(&self, subscription: SubscriptionId, graph: &Term, index: usize) -> Vec<PartialBinding> {
        self.records
            .get(&(subscription, graph.clone()))
            .map(|bucket| bucket.iter().filter(|r| r.index == index).cloned().collect())
            .unwrap_or_default()
    }

    /// Drops the records of one event. Returns how many were dropped.
    pub fn consume(&mut self, subscription: SubscriptionId, graph: &Term) -> usize {
        self.records.remove(&(subscription, graph.clone())).map_or(0, |bucket| bucket.len())
    }

    pub fn remove_subscription(&mut self, subscription: SubscriptionId) {
        self.records.retain(|(id, _), _| *id != subscription);
    }

    /// Removes and returns the records whose coordinate lies in `zone`.
    pub fn take_in(&mut self, zone: &Zone) -> Vec<PartialBinding> {
        let mut taken = Vec::new();
        for bucket in self.records.values_mut() {
            let (moving, staying): (Vec<_>, Vec<_>) =
                bucket.drain(..).partition(|r| zone.contains(&r.coordinate));
            taken.extend(moving);
            *bucket = staying;
        }
        self.records.retain(|_, bucket| !bucket.is_empty());
        taken
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Element, ElementKind, SemanticMapper};
    use crate::pubsub::SubscriberRef;

    fn subscription(id: u64, sparql: &str) -> Arc<Subscription> {
        Arc::new(
            Subscription::new(SubscriptionId(id), sparql, SubscriberRef(id), &SemanticMapper::default())
                .unwrap(),
        )
    }

    fn quad(p: &str) -> Quadruple {
        Quadruple::new(Term::iri("urn:g"), Term::iri("urn:s"), Term::iri(p), Term::literal("o"))
    }

    #[test]
    fn test_index_buckets_and_matching() {
        let mut index = SubscriptionIndex::new();
        let bound = subscription(1, "SELECT * WHERE { GRAPH ?g { ?s <urn:p> ?o } }");
        let open = subscription(2, "SELECT * WHERE { GRAPH ?g { ?s ?p ?o } }");
        index.insert(Arc::clone(&bound), 0);
        index.insert(Arc::clone(&bound), 0);
        index.insert(open, 0);
        assert_eq!(index.len(), 2);

        assert_eq!(index.matching(&quad("urn:p")).len(), 2);
        let only_open = index.matching(&quad("urn:q"));
        assert_eq!(only_open.len(), 1);
        assert_eq!(only_open[0].0.id, SubscriptionId(2));

        assert_eq!(index.remove(SubscriptionId(1)), 1);
        assert!(!index.contains(SubscriptionId(1)));
    }

    fn record(index: usize, graph: &str, coordinate: Coordinate) -> PartialBinding {
        PartialBinding {
            subscription: SubscriptionId(7),
            index,
            graph: Term::iri(graph),
            binding: Binding::new(),
            coordinate,
            holder: PeerId(1),
        }
    }

    #[test]
    fn test_partial_store() {
        let kinds = [ElementKind::String; 4];
        let low = Coordinate::min(&kinds);
        let mut store = PartialStore::new();
        assert!(store.insert(record(0, "urn:e1", low.clone())));
        assert!(!store.insert(record(0, "urn:e1", low.clone())));
        assert!(store.insert(record(1, "urn:e1", low.clone())));
        assert!(store.insert(record(0, "urn:e2", low.clone())));

        assert_eq!(store.retrieve(SubscriptionId(7), &Term::iri("urn:e1"), 1).len(), 1);
        assert_eq!(store.consume(SubscriptionId(7), &Term::iri("urn:e1")), 2);
        assert_eq!(store.len(), 1);

        let (_, upper) = Zone::full(&kinds).split_at(0, Element::string("m"));
        assert!(store.take_in(&upper).is_empty());
        let (lower, _) = Zone::full(&kinds).split_at(0, Element::string("m"));
        assert_eq!(store.take_in(&lower).len(), 1);
        assert!(store.is_empty());
    }
}
