//! End-to-end one-shot queries: SELECT and ASK evaluated over the data
//! spread across a multi-peer overlay.

use semantic_can::*;

async fn setup_people() -> Overlay {
    let overlay = Overlay::with_peers(OverlayConfig::default(), 6).await.unwrap();
    let people = [("alice", "Alice", 34), ("bob", "Bob", 17), ("carol", "Carol", 52), ("dave", "Dave", 25)];
    for (i, (id, name, age)) in people.into_iter().enumerate() {
        let event = CompoundEvent::new(
            Term::iri(format!("urn:event:{i}")),
            [
                (Term::iri(format!("urn:{id}")), Term::iri("urn:name"), Term::literal(name)),
                (Term::iri(format!("urn:{id}")), Term::iri("urn:age"), Term::integer(age)),
            ],
        );
        overlay.publish_event(event).await.unwrap();
    }
    overlay
        .publish(Quadruple::new(
            Term::iri("urn:event:0"),
            Term::iri("urn:alice"),
            Term::iri("urn:knows"),
            Term::iri("urn:bob"),
        ))
        .await
        .unwrap();
    overlay
}

// ============================================================================
// 1. SELECT
// ============================================================================

#[tokio::test]
async fn test_select_join_filter_order() {
    let overlay = setup_people().await;
    let result = overlay
        .select(
            "SELECT ?name ?age WHERE { GRAPH ?g { ?p <urn:name> ?name . ?p <urn:age> ?age \
             FILTER (?age >= 18) } } ORDER BY ?age",
        )
        .await
        .unwrap();

    assert_eq!(result.columns, vec!["name".to_string(), "age".to_string()]);
    let rows: Vec<(String, i64)> = result
        .rows
        .iter()
        .map(|r| (r.get::<String>("name").unwrap(), r.get::<i64>("age").unwrap()))
        .collect();
    assert_eq!(
        rows,
        vec![("Dave".to_string(), 25), ("Alice".to_string(), 34), ("Carol".to_string(), 52)]
    );
    assert_eq!(result.stats.atomic_queries, 2);
    assert_eq!(result.stats.failures, 0);
    assert!(result.stats.peers_visited >= 2);
}

#[tokio::test]
async fn test_select_prefixes_and_slice() {
    let overlay = setup_people().await;
    let result = overlay
        .select(
            "PREFIX ex: <urn:> SELECT ?name WHERE { GRAPH ?g { ?p ex:name ?name } } \
             ORDER BY DESC(?name) LIMIT 2 OFFSET 1",
        )
        .await
        .unwrap();
    let names: Vec<String> = result.rows.iter().map(|r| r.get::<String>("name").unwrap()).collect();
    assert_eq!(names, vec!["Carol".to_string(), "Bob".to_string()]);
}

#[tokio::test]
async fn test_select_union_distinct() {
    let overlay = setup_people().await;
    let result = overlay
        .select(
            "SELECT DISTINCT ?p WHERE { GRAPH ?g { { ?p <urn:knows> ?o } UNION { ?o <urn:knows> ?p } } }",
        )
        .await
        .unwrap();
    let mut people: Vec<String> = result.rows.iter().map(|r| r.get::<String>("p").unwrap()).collect();
    people.sort();
    assert_eq!(people, vec!["urn:alice".to_string(), "urn:bob".to_string()]);
}

#[tokio::test]
async fn test_select_without_graph_is_rejected() {
    let overlay = setup_people().await;
    let result = overlay.select("SELECT ?s WHERE { ?s ?p ?o }").await;
    assert!(matches!(result, Err(Error::DecompositionError(_))));
}

// ============================================================================
// 2. ASK
// ============================================================================

#[tokio::test]
async fn test_ask() {
    let overlay = setup_people().await;
    assert!(overlay.ask("ASK { GRAPH ?g { <urn:alice> <urn:knows> <urn:bob> } }").await.unwrap());
    assert!(!overlay.ask("ASK { GRAPH ?g { <urn:bob> <urn:knows> <urn:alice> } }").await.unwrap());
    assert!(overlay
        .ask("ASK WHERE { GRAPH ?g { ?p <urn:age> ?age FILTER (?age < 18) } }")
        .await
        .unwrap());
}
