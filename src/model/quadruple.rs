//! Quadruples, quadruple patterns and compound events.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Term;

/// A fact: a triple qualified by the graph it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quadruple {
    pub graph: Term,
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Quadruple {
    pub fn new(graph: Term, subject: Term, predicate: Term, object: Term) -> Self {
        Self { graph, subject, predicate, object }
    }

    /// Positions in overlay dimension order: graph, subject, predicate, object.
    pub fn terms(&self) -> [&Term; 4] {
        [&self.graph, &self.subject, &self.predicate, &self.object]
    }
}

impl fmt::Display for Quadruple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.graph, self.subject, self.predicate, self.object)
    }
}

/// A quadruple with wildcards: `None` matches any term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuadruplePattern {
    pub graph: Option<Term>,
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
}

impl QuadruplePattern {
    /// Matches every quadruple.
    pub const ANY: QuadruplePattern = QuadruplePattern {
        graph: None,
        subject: None,
        predicate: None,
        object: None,
    };

    pub fn new(
        graph: Option<Term>,
        subject: Option<Term>,
        predicate: Option<Term>,
        object: Option<Term>,
    ) -> Self {
        Self { graph, subject, predicate, object }
    }

    pub fn positions(&self) -> [Option<&Term>; 4] {
        [
            self.graph.as_ref(),
            self.subject.as_ref(),
            self.predicate.as_ref(),
            self.object.as_ref(),
        ]
    }

    pub fn matches(&self, quad: &Quadruple) -> bool {
        self.positions()
            .iter()
            .zip(quad.terms())
            .all(|(bound, term)| bound.is_none_or(|b| b == term))
    }

    pub fn is_fully_bound(&self) -> bool {
        self.positions().iter().all(Option::is_some)
    }
}

impl From<&Quadruple> for QuadruplePattern {
    fn from(q: &Quadruple) -> Self {
        Self::new(
            Some(q.graph.clone()),
            Some(q.subject.clone()),
            Some(q.predicate.clone()),
            Some(q.object.clone()),
        )
    }
}

/// A set of quadruples published together under one graph.
///
/// The graph value identifies the event: join assembly correlates partial
/// matches by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundEvent {
    graph: Term,
    quadruples: Vec<Quadruple>,
}

impl CompoundEvent {
    /// Builds an event from `(subject, predicate, object)` triples.
    pub fn new<I>(graph: Term, triples: I) -> Self
    where
        I: IntoIterator<Item = (Term, Term, Term)>,
    {
        let quadruples = triples
            .into_iter()
            .map(|(s, p, o)| Quadruple::new(graph.clone(), s, p, o))
            .collect();
        Self { graph, quadruples }
    }

    pub fn graph(&self) -> &Term {
        &self.graph
    }

    pub fn quadruples(&self) -> &[Quadruple] {
        &self.quadruples
    }

    pub fn len(&self) -> usize {
        self.quadruples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quadruples.is_empty()
    }
}

impl IntoIterator for CompoundEvent {
    type Item = Quadruple;
    type IntoIter = std::vec::IntoIter<Quadruple>;

    fn into_iter(self) -> Self::IntoIter {
        self.quadruples.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Quadruple {
        Quadruple::new(
            Term::iri("urn:g"),
            Term::iri("urn:s"),
            Term::iri("urn:p"),
            Term::literal("o"),
        )
    }

    #[test]
    fn test_pattern_matching() {
        let q = quad();
        assert!(QuadruplePattern::ANY.matches(&q));
        assert!(QuadruplePattern::from(&q).matches(&q));

        let p = QuadruplePattern::new(None, None, Some(Term::iri("urn:other")), None);
        assert!(!p.matches(&q));
    }

    #[test]
    fn test_compound_event_shares_graph() {
        let event = CompoundEvent::new(
            Term::iri("urn:event:1"),
            vec![
                (Term::iri("urn:a"), Term::iri("urn:p"), Term::literal("1")),
                (Term::iri("urn:b"), Term::iri("urn:p"), Term::literal("2")),
            ],
        );
        assert_eq!(event.len(), 2);
        assert!(event.quadruples().iter().all(|q| q.graph == Term::iri("urn:event:1")));
    }
}
