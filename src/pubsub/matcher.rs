//! Matching of one quadruple against one atomic query.

use crate::model::{Binding, Quadruple};
use crate::sparql::ast::TermPattern;
use crate::sparql::{is_satisfied, AtomicQuery};

/// The binding `quad` produces for `query`, or `None` if it does not match.
///
/// Bound positions must be equal, a variable repeated across positions
/// must bind the same term, and the filters copied down to the atomic
/// query must pass.
pub fn match_quadruple(query: &AtomicQuery, quad: &Quadruple) -> Option<Binding> {
    let mut binding = Binding::new();
    for (node, term) in query.nodes.iter().zip(quad.terms()) {
        match node {
            TermPattern::Term(expected) => {
                if expected != term {
                    return None;
                }
            }
            TermPattern::Var(var) => match binding.get(var) {
                Some(bound) if bound != term => return None,
                Some(_) => {}
                None => {
                    binding.insert(var.clone(), term.clone());
                }
            },
        }
    }

    query
        .filters
        .iter()
        .all(|filter| is_satisfied(filter, &binding))
        .then_some(binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Term;
    use crate::sparql::decompose_str;

    fn aq(sparql: &str) -> AtomicQuery {
        decompose_str(sparql).unwrap().remove(0)
    }

    fn quad(s: &str, p: &str, o: Term) -> Quadruple {
        Quadruple::new(Term::iri("urn:g"), Term::iri(s), Term::iri(p), o)
    }

    #[test]
    fn test_bound_positions_must_match() {
        let q = aq("SELECT * WHERE { GRAPH ?g { ?s <urn:knows> ?o } }");
        let b = match_quadruple(&q, &quad("urn:a", "urn:knows", Term::iri("urn:b"))).unwrap();
        assert_eq!(b.get("g"), Some(&Term::iri("urn:g")));
        assert_eq!(b.get("o"), Some(&Term::iri("urn:b")));
        assert!(match_quadruple(&q, &quad("urn:a", "urn:likes", Term::iri("urn:b"))).is_none());
    }

    #[test]
    fn test_repeated_variable_must_agree() {
        let q = aq("SELECT * WHERE { GRAPH ?g { ?x <urn:knows> ?x } }");
        assert!(match_quadruple(&q, &quad("urn:a", "urn:knows", Term::iri("urn:a"))).is_some());
        assert!(match_quadruple(&q, &quad("urn:a", "urn:knows", Term::iri("urn:b"))).is_none());
    }

    #[test]
    fn test_filters_apply() {
        let q = aq("SELECT * WHERE { GRAPH ?g { ?s <urn:age> ?age FILTER (?age >= 18) } }");
        assert!(match_quadruple(&q, &quad("urn:a", "urn:age", Term::integer(30))).is_some());
        assert!(match_quadruple(&q, &quad("urn:a", "urn:age", Term::integer(12))).is_none());
    }
}
