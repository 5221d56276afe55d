//! Subscriptions and their decomposition into sub-subscriptions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{Region, SemanticMapper};
use crate::sparql::ast::Expr;
use crate::sparql::{self, AtomicQuery};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle of a listener in the [`SubscriberDirectory`](super::SubscriberDirectory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberRef(pub u64);

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Decomposed, index entries in flight.
    Registering,
    /// Every sub-subscription is indexed.
    Indexed,
    /// At least one notification has been delivered.
    Matching,
    Withdrawn,
}

/// One atomic query of a subscription, placed in the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubSubscription {
    /// Ordinal within the subscription.
    pub index: usize,
    pub query: AtomicQuery,
    /// Where the atomic query is indexed: bound positions are exact,
    /// variables span the dimension.
    pub region: Region,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub sparql: String,
    pub subscriber: SubscriberRef,
    /// Variables a notification carries.
    pub result_vars: Vec<String>,
    /// Every filter of the query, checked on complete solutions.
    pub filters: Vec<Expr>,
    pub created_at: DateTime<Utc>,
    pub subsubscriptions: Vec<SubSubscription>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        sparql: &str,
        subscriber: SubscriberRef,
        mapper: &SemanticMapper,
    ) -> Result<Self> {
        let query = sparql::parse(sparql)?;
        let atomic = sparql::decompose(&query)?;
        if atomic.iter().any(|aq| aq.group > 0) {
            return Err(Error::DecompositionError(
                "UNION is not supported in subscriptions".into(),
            ));
        }

        let subsubscriptions = atomic
            .into_iter()
            .enumerate()
            .map(|(index, query)| SubSubscription {
                index,
                region: mapper.region(&query.quadruple_pattern()),
                query,
            })
            .collect();

        Ok(Self {
            id,
            sparql: sparql.to_string(),
            subscriber,
            result_vars: query.result_vars(),
            filters: query.pattern.filters().into_iter().cloned().collect(),
            created_at: Utc::now(),
            subsubscriptions,
        })
    }

    pub fn len(&self) -> usize {
        self.subsubscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsubscriptions.is_empty()
    }

    /// Distinct placement regions, in ordinal order.
    pub fn regions(&self) -> Vec<&Region> {
        let mut regions: Vec<&Region> = Vec::new();
        for ss in &self.subsubscriptions {
            if !regions.contains(&&ss.region) {
                regions.push(&ss.region);
            }
        }
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bound;

    #[test]
    fn test_regions_follow_bound_positions() {
        let sub = Subscription::new(
            SubscriptionId(1),
            "SELECT ?s WHERE { GRAPH ?g { ?s <urn:p> ?o . ?s <urn:q> ?o2 } }",
            SubscriberRef(1),
            &SemanticMapper::default(),
        )
        .unwrap();
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.regions().len(), 2);
        let region = &sub.subsubscriptions[0].region;
        assert_eq!(region.bound(0), &Bound::Any);
        assert!(matches!(region.bound(2), Bound::Exact(_)));
        assert_eq!(sub.result_vars, vec!["s"]);
    }

    #[test]
    fn test_union_rejected() {
        let err = Subscription::new(
            SubscriptionId(1),
            "SELECT ?s WHERE { GRAPH ?g { { ?s <urn:p> ?o } UNION { ?s <urn:q> ?o } } }",
            SubscriberRef(1),
            &SemanticMapper::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DecompositionError(_)));
    }
}
