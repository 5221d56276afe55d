//! Placement of RDF content in the coordinate space.
//!
//! Dimension order is fixed: graph, subject, predicate, object. Each term is
//! reduced to its routing string, passed through the configured doping
//! function, then turned into an element of the dimension's kind.

use serde::{Deserialize, Serialize};

use crate::model::{Quadruple, QuadruplePattern, Term};
use super::coordinate::{Bound, Coordinate, Region};
use super::element::{Decimal, Element, ElementKind, StringElement};

/// Number of dimensions of the semantic space.
pub const SEMANTIC_DIMENSIONS: usize = 4;

/// Routing string used for empty values (U+00A2 CENT SIGN).
pub const EMPTY_ROUTING_STRING: &str = "\u{A2}";

/// Load-balancing transformation applied to routing strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DopingFunction {
    #[default]
    Identity,
    /// Drops common IRI prefixes so that IRIs sharing a namespace spread
    /// over the space.
    PrefixRemoval,
    Reverse,
}

impl DopingFunction {
    pub fn apply(self, term: &Term) -> String {
        let value = term.routing_value();
        let doped = match self {
            DopingFunction::Identity => value,
            DopingFunction::Reverse => value.chars().rev().collect(),
            DopingFunction::PrefixRemoval => match term {
                Term::Iri(iri) => remove_prefix(iri).to_string(),
                _ => value,
            },
        };
        if doped.is_empty() {
            EMPTY_ROUTING_STRING.to_string()
        } else {
            doped
        }
    }
}

/// Local name after the last `#` or `/`, or the IRI without its scheme and
/// `www.` when the local name is empty.
fn remove_prefix(iri: &str) -> &str {
    let without_scheme = match iri.find("://") {
        Some(idx) => &iri[idx + 3..],
        None => iri.split_once(':').map_or(iri, |(_, rest)| rest),
    };
    let trimmed = without_scheme.trim_end_matches(['/', '#']);
    match trimmed.rfind(['#', '/']) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed.strip_prefix("www.").unwrap_or(trimmed),
    }
}

/// Maps terms, quadruples and patterns to elements, coordinates and regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticMapper {
    kinds: [ElementKind; SEMANTIC_DIMENSIONS],
    doping: DopingFunction,
}

impl SemanticMapper {
    pub fn new(kinds: [ElementKind; SEMANTIC_DIMENSIONS], doping: DopingFunction) -> Self {
        Self { kinds, doping }
    }

    pub fn kinds(&self) -> &[ElementKind; SEMANTIC_DIMENSIONS] {
        &self.kinds
    }

    pub fn element(&self, dim: usize, term: &Term) -> Element {
        let routing = self.doping.apply(term);
        match self.kinds[dim] {
            ElementKind::String => Element::String(StringElement::new(&routing)),
            ElementKind::Numeric => match term {
                Term::Literal { lexical, .. } => match Decimal::parse(lexical) {
                    Some(d) => Element::Numeric(d),
                    None => ElementKind::Numeric.from_unit(StringElement::new(&routing).to_f64()),
                },
                _ => ElementKind::Numeric.from_unit(StringElement::new(&routing).to_f64()),
            },
        }
    }

    pub fn coordinate(&self, quad: &Quadruple) -> Coordinate {
        Coordinate::new(quad.terms().iter().enumerate().map(|(d, t)| self.element(d, t)))
    }

    /// Variables and wildcards become [`Bound::Any`].
    pub fn region(&self, pattern: &QuadruplePattern) -> Region {
        Region::new(pattern.positions().iter().enumerate().map(|(d, t)| match t {
            Some(term) => Bound::Exact(self.element(d, term)),
            None => Bound::Any,
        }))
    }

    /// Length of the routing string, the weight a term carries in centroid
    /// statistics.
    pub fn weight(&self, term: &Term) -> f64 {
        self.doping.apply(term).chars().count().max(1) as f64
    }
}

impl Default for SemanticMapper {
    fn default() -> Self {
        Self::new([ElementKind::String; SEMANTIC_DIMENSIONS], DopingFunction::Identity)
    }
}
