//! Query execution engine.
//!
//! Evaluates a decomposed SPARQL query against a [`PatternSource`]: each
//! atomic query is fetched separately, then solutions are joined within
//! their group, unioned across groups, filtered, ordered, projected and
//! sliced.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::model::*;
use crate::pubsub::match_quadruple;
use crate::sparql::ast::{Expr, Modifier, OrderCondition, Query};
use crate::sparql::{self, expr, is_satisfied, AtomicQuery};
use crate::{Error, Result};

/// Quadruples of one pattern lookup, with delivery accounting.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub quadruples: Vec<Quadruple>,
    pub peers: usize,
    pub failures: usize,
}

/// Where atomic queries are evaluated.
#[async_trait]
pub trait PatternSource: Send + Sync {
    async fn fetch(&self, pattern: &QuadruplePattern) -> Result<Fetched>;
}

/// Query execution result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub stats: ExecutionStats,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A single solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub values: Binding,
}

impl ResultRow {
    /// Get a typed value from the row.
    pub fn get<T: FromTerm>(&self, key: &str) -> Result<T> {
        let term = self.values.get(key)
            .ok_or_else(|| Error::NotFound(format!("Variable '?{key}'")))?;
        T::from_term(term)
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub atomic_queries: u64,
    pub quadruples_fetched: u64,
    pub peers_visited: u64,
    /// Unreachable branches; a non-zero value means results may be partial.
    pub failures: u64,
    pub execution_time_ms: u64,
}

/// Convert from a term to concrete types.
pub trait FromTerm: Sized {
    fn from_term(term: &Term) -> Result<Self>;
}

fn type_error(expected: &str, term: &Term) -> Error {
    Error::TypeError { expected: expected.into(), got: term.to_string() }
}

impl FromTerm for Term {
    fn from_term(term: &Term) -> Result<Self> {
        Ok(term.clone())
    }
}

impl FromTerm for String {
    /// The IRI, the lexical form, or the blank node label.
    fn from_term(term: &Term) -> Result<Self> {
        Ok(match term {
            Term::Iri(iri) => iri.clone(),
            Term::Literal { lexical, .. } => lexical.clone(),
            Term::Blank(label) => label.clone(),
        })
    }
}

impl FromTerm for i64 {
    fn from_term(term: &Term) -> Result<Self> {
        match term {
            Term::Literal { lexical, .. } => lexical.trim().parse().map_err(|_| type_error("Integer", term)),
            _ => Err(type_error("Integer", term)),
        }
    }
}

impl FromTerm for f64 {
    fn from_term(term: &Term) -> Result<Self> {
        term.as_f64().ok_or_else(|| type_error("Number", term))
    }
}

impl FromTerm for bool {
    fn from_term(term: &Term) -> Result<Self> {
        term.as_bool().ok_or_else(|| type_error("Boolean", term))
    }
}

/// Parse, decompose and evaluate a query.
pub async fn execute<S: PatternSource + ?Sized>(source: &S, sparql: &str) -> Result<QueryResult> {
    let query = sparql::parse(sparql)?;
    let atomic = sparql::decompose(&query)?;
    execute_decomposed(source, &query, &atomic).await
}

pub async fn execute_decomposed<S: PatternSource + ?Sized>(
    source: &S,
    query: &Query,
    atomic: &[AtomicQuery],
) -> Result<QueryResult> {
    let started = Instant::now();
    let mut stats = ExecutionStats { atomic_queries: atomic.len() as u64, ..Default::default() };

    // Phase 1: one lookup per atomic query
    let mut per_query = Vec::with_capacity(atomic.len());
    for aq in atomic {
        let fetched = source.fetch(&aq.quadruple_pattern()).await?;
        stats.quadruples_fetched += fetched.quadruples.len() as u64;
        stats.peers_visited += fetched.peers as u64;
        stats.failures += fetched.failures as u64;
        let bindings: Vec<Binding> =
            fetched.quadruples.iter().filter_map(|q| match_quadruple(aq, q)).collect();
        per_query.push(bindings);
    }

    // Phase 2: join within groups, union across them
    let filters = query.pattern.filters();
    let groups = atomic.iter().map(|aq| aq.group).max().map_or(0, |g| g + 1);
    let mut solutions = Vec::new();
    for group in 0..groups {
        let members: Vec<usize> = (0..atomic.len()).filter(|&i| atomic[i].group == group).collect();
        let joined = members.iter().fold(vec![Binding::new()], |acc, &i| {
            acc.iter()
                .flat_map(|left| per_query[i].iter().filter_map(move |right| left.join(right)))
                .collect()
        });

        // Phase 3: filters that only mention variables of this group
        let applicable: Vec<&Expr> = filters
            .iter()
            .copied()
            .filter(|f| f.vars().iter().all(|v| members.iter().any(|&i| atomic[i].contains_variable(v))))
            .collect();
        solutions.extend(
            joined.into_iter().filter(|s| applicable.iter().all(|f| is_satisfied(f, s))),
        );
    }

    // Phase 4: solution modifiers
    if !query.order_by.is_empty() {
        solutions.sort_by(|a, b| compare_solutions(&query.order_by, a, b));
    }
    let columns = query.result_vars();
    let mut rows: Vec<Binding> = solutions.iter().map(|s| s.project(&columns)).collect();
    if matches!(query.modifier(), Some(Modifier::Distinct | Modifier::Reduced)) {
        let mut seen = BTreeSet::new();
        rows.retain(|row| seen.insert(row.clone()));
    }
    let offset = query.offset.unwrap_or(0) as usize;
    let limit = query.limit.map_or(usize::MAX, |l| l as usize);
    let rows: Vec<ResultRow> =
        rows.into_iter().skip(offset).take(limit).map(|values| ResultRow { values }).collect();

    stats.execution_time_ms = started.elapsed().as_millis() as u64;
    debug!(
        atomic_queries = stats.atomic_queries,
        fetched = stats.quadruples_fetched,
        rows = rows.len(),
        "query executed"
    );
    Ok(QueryResult { columns, rows, stats })
}

/// Unbound sorts first. Terms that have no order between them compare
/// by kind and text.
fn compare_solutions(conditions: &[OrderCondition], a: &Binding, b: &Binding) -> Ordering {
    for condition in conditions {
        let ordering = match (a.get(&condition.var), b.get(&condition.var)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => expr::order(x, y).unwrap_or_else(|| x.cmp(y)),
        };
        let ordering = if condition.descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Evaluates patterns against a fixed list of quadruples.
    struct Fixed(Vec<Quadruple>);

    #[async_trait]
    impl PatternSource for Fixed {
        async fn fetch(&self, pattern: &QuadruplePattern) -> Result<Fetched> {
            Ok(Fetched {
                quadruples: self.0.iter().filter(|q| pattern.matches(q)).cloned().collect(),
                peers: 1,
                failures: 0,
            })
        }
    }

    fn people() -> Fixed {
        let g = Term::iri("urn:g");
        let quad = |s: &str, p: &str, o: Term| Quadruple::new(g.clone(), Term::iri(s), Term::iri(p), o);
        Fixed(vec![
            quad("urn:alice", "urn:name", Term::literal("Alice")),
            quad("urn:alice", "urn:age", Term::integer(34)),
            quad("urn:bob", "urn:name", Term::literal("Bob")),
            quad("urn:bob", "urn:age", Term::integer(17)),
            quad("urn:carol", "urn:name", Term::literal("Carol")),
            quad("urn:carol", "urn:age", Term::integer(52)),
        ])
    }

    #[tokio::test]
    async fn test_join_filter_order() {
        let result = execute(
            &people(),
            "SELECT ?name WHERE { GRAPH ?g { ?p <urn:name> ?name . ?p <urn:age> ?age \
             FILTER (?age >= 18) } } ORDER BY DESC(?age)",
        )
        .await
        .unwrap();
        let names: Vec<String> = result.rows.iter().map(|r| r.get::<String>("name").unwrap()).collect();
        assert_eq!(names, vec!["Carol".to_string(), "Alice".to_string()]);
        assert_eq!(result.columns, vec!["name".to_string()]);
        assert_eq!(result.stats.atomic_queries, 2);
    }

    #[tokio::test]
    async fn test_union_distinct_and_slice() {
        let result = execute(
            &people(),
            "SELECT DISTINCT ?g WHERE { GRAPH ?g { { ?s <urn:name> ?o } UNION { ?s <urn:age> ?o } } }",
        )
        .await
        .unwrap();
        assert_eq!(result.len(), 1);

        let result = execute(
            &people(),
            "SELECT ?s WHERE { GRAPH ?g { ?s <urn:age> ?age } } ORDER BY ?age OFFSET 1 LIMIT 1",
        )
        .await
        .unwrap();
        assert_eq!(result.rows[0].get::<String>("s").unwrap(), "urn:alice");
    }

    #[tokio::test]
    async fn test_typed_access() {
        let result = execute(&people(), "SELECT ?age WHERE { GRAPH ?g { <urn:bob> <urn:age> ?age } }")
            .await
            .unwrap();
        assert_eq!(result.rows[0].get::<i64>("age").unwrap(), 17);
        assert!(matches!(result.rows[0].get::<i64>("name"), Err(Error::NotFound(_))));
        assert!(matches!(result.rows[0].get::<bool>("age"), Err(Error::TypeError { .. })));
    }
}
