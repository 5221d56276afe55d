//! Query decomposition into atomic queries.
//!
//! A query with one `GRAPH` block becomes one [`AtomicQuery`] per triple
//! pattern, in written order. Each atomic query is routable on its own:
//! its bound positions give a region of the overlay. Solution modifiers
//! and filters are copied down when they can be applied to a single
//! pattern without changing the result.

use serde::{Deserialize, Serialize};

use crate::model::QuadruplePattern;
use crate::{Error, Result};
use super::ast::*;

/// One quadruple pattern of a decomposed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicQuery {
    /// Graph, subject, predicate, object.
    pub nodes: [TermPattern; 4],
    /// Index of the basic graph pattern (the `UNION` branch) it came from.
    pub group: usize,
    pub distinct: bool,
    pub reduced: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Vec<OrderCondition>,
    pub filters: Vec<Expr>,
    /// Variables of the whole query's solutions.
    pub result_vars: Vec<String>,
    /// Whether the projection asks for the graph variable.
    pub graph_requested: bool,
    vars: Vec<String>,
}

impl AtomicQuery {
    fn new(nodes: [TermPattern; 4], group: usize) -> Self {
        let mut vars: Vec<String> = Vec::new();
        for v in nodes.iter().filter_map(TermPattern::as_var) {
            if !vars.iter().any(|known| known == v) {
                vars.push(v.to_string());
            }
        }
        Self {
            nodes,
            group,
            distinct: false,
            reduced: false,
            limit: None,
            offset: None,
            order_by: Vec::new(),
            filters: Vec::new(),
            result_vars: Vec::new(),
            graph_requested: false,
            vars,
        }
    }

    pub fn graph(&self) -> &TermPattern {
        &self.nodes[0]
    }

    pub fn subject(&self) -> &TermPattern {
        &self.nodes[1]
    }

    pub fn predicate(&self) -> &TermPattern {
        &self.nodes[2]
    }

    pub fn object(&self) -> &TermPattern {
        &self.nodes[3]
    }

    /// Distinct variables, in position order.
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    pub fn nb_vars(&self) -> usize {
        self.vars.len()
    }

    /// First position holding `var`.
    pub fn var_index(&self, var: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.as_var() == Some(var))
    }

    pub fn contains_variable(&self, var: &str) -> bool {
        self.var_index(var).is_some()
    }

    /// The pattern to look up: variables become wildcards.
    pub fn quadruple_pattern(&self) -> QuadruplePattern {
        let [g, s, p, o] = &self.nodes;
        QuadruplePattern::new(
            g.as_term().cloned(),
            s.as_term().cloned(),
            p.as_term().cloned(),
            o.as_term().cloned(),
        )
    }
}

/// Everything the walk over the query pattern collects.
#[derive(Default)]
struct Collected {
    graph: Option<TermPattern>,
    graph_blocks: usize,
    /// Basic graph patterns, one per `UNION` branch.
    groups: Vec<Vec<TriplePattern>>,
    filters: Vec<Expr>,
}

/// Decompose a parsed query.
pub fn decompose(query: &Query) -> Result<Vec<AtomicQuery>> {
    let mut collected = Collected::default();
    for element in &query.pattern.elements {
        match element {
            PatternElement::Graph { name, pattern } => {
                collected.graph_blocks += 1;
                if collected.graph.is_none() {
                    collected.graph = Some(name.clone());
                }
                collect_graph_block(pattern, &mut collected)?;
            }
            PatternElement::Filter(expr) => collected.filters.push(expr.clone()),
            PatternElement::Group(group) if group.elements.is_empty() => {}
            _ => {
                return Err(Error::DecompositionError(
                    "Triple patterns outside of the GRAPH block are not supported".into(),
                ));
            }
        }
    }

    let graph = match (collected.graph_blocks, collected.graph.take()) {
        (1, Some(graph)) => graph,
        (0, _) | (_, None) => {
            return Err(Error::DecompositionError(
                "The query does not contain any graph pattern".into(),
            ));
        }
        _ => {
            return Err(Error::DecompositionError(
                "Multiple graph patterns are not yet supported".into(),
            ));
        }
    };

    if let Some(graph_var) = graph.as_var() {
        let reused = collected
            .groups
            .iter()
            .flatten()
            .any(|t| t.positions().iter().any(|p| p.as_var() == Some(graph_var)));
        if reused {
            return Err(Error::DecompositionError(format!(
                "The graph variable ?{graph_var} cannot be used inside its own GRAPH block"
            )));
        }
    }

    let result_vars = query.result_vars();
    let graph_requested = graph.as_var().is_some_and(|g| result_vars.iter().any(|v| v == g));
    let modifier = query.modifier();
    let single_group = collected.groups.len() == 1;

    let mut atomic_queries = Vec::new();
    for (group, triples) in collected.groups.iter().enumerate() {
        for triple in triples {
            let mut aq = AtomicQuery::new(
                [
                    graph.clone(),
                    triple.subject.clone(),
                    triple.predicate.clone(),
                    triple.object.clone(),
                ],
                group,
            );
            aq.distinct = modifier == Some(Modifier::Distinct);
            aq.reduced = modifier == Some(Modifier::Reduced);
            if single_group && query.limit.is_some() {
                aq.limit = query.limit;
                aq.offset = query.offset;
                aq.order_by = query
                    .order_by
                    .iter()
                    .filter(|c| aq.contains_variable(&c.var))
                    .cloned()
                    .collect();
            }
            aq.filters = collected
                .filters
                .iter()
                .filter(|f| f.vars().iter().all(|v| aq.contains_variable(v)))
                .cloned()
                .collect();
            aq.result_vars = result_vars.clone();
            aq.graph_requested = graph_requested;
            atomic_queries.push(aq);
        }
    }

    if atomic_queries.is_empty() {
        return Err(Error::DecompositionError(
            "The GRAPH block does not contain any triple pattern".into(),
        ));
    }
    Ok(atomic_queries)
}

fn collect_graph_block(pattern: &GroupPattern, collected: &mut Collected) -> Result<()> {
    let has_union = pattern.elements.iter().any(|e| matches!(e, PatternElement::Union(_)));
    if !has_union {
        let mut triples = Vec::new();
        collect_basic(pattern, &mut triples, &mut collected.filters)?;
        collected.groups.push(triples);
        return Ok(());
    }

    for element in &pattern.elements {
        match element {
            PatternElement::Union(branches) => {
                for branch in branches {
                    let mut triples = Vec::new();
                    collect_basic(branch, &mut triples, &mut collected.filters)?;
                    collected.groups.push(triples);
                }
            }
            PatternElement::Filter(expr) => collected.filters.push(expr.clone()),
            _ => {
                return Err(Error::DecompositionError(
                    "UNION cannot be combined with other patterns in the GRAPH block".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Flatten a group (and its plain nested groups) into one basic graph
/// pattern.
fn collect_basic(
    pattern: &GroupPattern,
    triples: &mut Vec<TriplePattern>,
    filters: &mut Vec<Expr>,
) -> Result<()> {
    for element in &pattern.elements {
        match element {
            PatternElement::Triples(block) => triples.extend(block.iter().cloned()),
            PatternElement::Group(group) => collect_basic(group, triples, filters)?,
            PatternElement::Filter(expr) => filters.push(expr.clone()),
            PatternElement::Graph { .. } => {
                return Err(Error::DecompositionError(
                    "Multiple graph patterns are not yet supported".into(),
                ));
            }
            PatternElement::Union(_) => {
                return Err(Error::DecompositionError("Nested UNION is not supported".into()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::parse;

    fn decompose_str(query: &str) -> Result<Vec<AtomicQuery>> {
        decompose(&parse(query)?)
    }

    #[test]
    fn test_single_pattern() {
        let aqs = decompose_str("SELECT ?g ?s ?p ?o WHERE { GRAPH ?g { ?s ?p ?o } }").unwrap();
        assert_eq!(aqs.len(), 1);
        assert_eq!(aqs[0].nb_vars(), 4);
        assert!(aqs[0].graph_requested);
        assert_eq!(aqs[0].quadruple_pattern(), QuadruplePattern::ANY);

        let aqs = decompose_str("ASK { GRAPH ?g { ?s ?p ?o } }").unwrap();
        assert_eq!(aqs.len(), 1);
        assert_eq!(aqs[0].nb_vars(), 4);
    }

    #[test]
    fn test_two_patterns() {
        let aqs = decompose_str(
            "SELECT ?g ?s ?p ?o WHERE { GRAPH ?g { ?s ?p ?o . ?s ?p2 ?o2 } }",
        )
        .unwrap();
        assert_eq!(aqs.len(), 2);
        assert!(aqs.iter().all(|aq| aq.nb_vars() == 4));
        assert!(aqs.iter().all(|aq| aq.group == 0));
        assert_eq!(aqs[1].var_index("p2"), Some(2));
    }

    #[test]
    fn test_union_branches() {
        let aqs = decompose_str(
            "SELECT ?g ?s ?o WHERE { GRAPH ?g { { ?s <urn:p:0> ?o } UNION { ?s <urn:p:1> ?o } } }",
        )
        .unwrap();
        assert_eq!(aqs.len(), 2);
        assert!(aqs.iter().all(|aq| aq.nb_vars() == 3));
        assert_eq!((aqs[0].group, aqs[1].group), (0, 1));
    }

    #[test]
    fn test_repeated_variables_without_where() {
        let aqs = decompose_str("SELECT ?s ?p ?o { GRAPH ?g { ?s ?p ?o . ?o ?p ?s } }").unwrap();
        assert_eq!(aqs.len(), 2);
        assert!(aqs.iter().all(|aq| aq.nb_vars() == 4));
        assert_eq!(aqs[1].var_index("o"), Some(1));
        assert_eq!(aqs[1].var_index("s"), Some(3));
    }

    #[test]
    fn test_union_branch_binding_predicate_variable() {
        let aqs = decompose_str(
            "SELECT ?s ?p ?o { GRAPH ?g { { ?s <urn:p:0> ?o } UNION { ?s <urn:p:1> ?p } } }",
        )
        .unwrap();
        assert_eq!(aqs.len(), 2);
        assert!(aqs.iter().all(|aq| aq.nb_vars() == 3));
        assert!(aqs[1].contains_variable("p"));
        assert!(!aqs[1].contains_variable("o"));
    }

    #[test]
    fn test_multiple_graph_patterns_rejected() {
        let err = decompose_str(
            "SELECT * WHERE { GRAPH ?g { ?s ?p ?o } GRAPH ?h { ?s ?p ?o } }",
        )
        .unwrap_err();
        assert!(matches!(err, Error::DecompositionError(m) if m.contains("Multiple graph patterns")));
    }

    #[test]
    fn test_missing_graph_pattern_rejected() {
        let err = decompose_str("SELECT * WHERE { ?s ?p ?o }").unwrap_err();
        assert!(matches!(err, Error::DecompositionError(_)));
        let err = decompose_str("SELECT * WHERE { }").unwrap_err();
        assert!(matches!(err, Error::DecompositionError(m) if m.contains("any graph pattern")));
    }

    #[test]
    fn test_graph_variable_reuse_rejected() {
        let err = decompose_str("SELECT * WHERE { GRAPH ?g { ?g ?p ?o } }").unwrap_err();
        assert!(matches!(err, Error::DecompositionError(_)));
    }

    #[test]
    fn test_modifiers_and_filters() {
        let aqs = decompose_str(
            "SELECT DISTINCT ?s ?age WHERE { GRAPH <urn:g> { \
               ?s <urn:name> ?name . ?s <urn:age> ?age \
               FILTER (?age > 18) FILTER (?name != ?age) \
             } } ORDER BY ?age LIMIT 10 OFFSET 1",
        )
        .unwrap();
        assert_eq!(aqs.len(), 2);
        assert!(aqs.iter().all(|aq| aq.distinct && !aq.reduced));
        assert!(!aqs[0].graph_requested);
        assert_eq!(aqs[0].limit, Some(10));
        assert_eq!(aqs[1].offset, Some(1));
        assert!(aqs[0].order_by.is_empty());
        assert_eq!(aqs[1].order_by.len(), 1);
        // Only the filters fully covered by a pattern are copied down.
        assert_eq!(aqs[0].filters.len(), 0);
        assert_eq!(aqs[1].filters.len(), 1);
        assert_eq!(aqs[0].result_vars, vec!["s", "age"]);
    }

    #[test]
    fn test_limit_dropped_for_union() {
        let aqs = decompose_str(
            "SELECT * WHERE { GRAPH ?g { { ?s <urn:a> ?o } UNION { ?s <urn:b> ?o } } } LIMIT 3",
        )
        .unwrap();
        assert!(aqs.iter().all(|aq| aq.limit.is_none()));
    }
}
