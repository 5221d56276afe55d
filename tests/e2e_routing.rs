//! End-to-end routing tests: unicast lookup, anycast over pattern regions
//! and the three broadcast strategies on grown overlays.

use std::sync::Arc;
use std::time::Duration;

use semantic_can::*;

async fn setup(peers: usize) -> Overlay {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Overlay::with_peers(OverlayConfig::default(), peers).await.unwrap()
}

fn sample_quads() -> Vec<Quadruple> {
    let mut quads = Vec::new();
    for (i, s) in ["urn:alice", "urn:bob", "urn:carol", "urn:dave", "urn:zed"].iter().enumerate() {
        for p in ["urn:knows", "http://xmlns.com/foaf/0.1/name", "urn:age"] {
            quads.push(Quadruple::new(
                Term::iri(format!("urn:event:{i}")),
                Term::iri(*s),
                Term::iri(p),
                Term::literal(format!("value {i}")),
            ));
        }
    }
    quads
}

// ============================================================================
// 1. Unicast
// ============================================================================

#[tokio::test]
async fn test_lookup_finds_the_owner() {
    let overlay = setup(7).await;
    for quad in sample_quads() {
        let coordinate = overlay.mapper().coordinate(&quad);
        let owner = overlay.lookup(&coordinate).await.unwrap();
        assert!(overlay.zone(owner).unwrap().contains(&coordinate));
    }
}

#[tokio::test]
async fn test_published_quadruple_lands_at_the_owner() {
    let overlay = setup(6).await;
    let quad = Quadruple::new(
        Term::iri("urn:event:1"),
        Term::iri("urn:zed"),
        Term::iri("urn:knows"),
        Term::iri("urn:alice"),
    );
    overlay.publish(quad.clone()).await.unwrap();

    let owner = overlay.lookup(&overlay.mapper().coordinate(&quad)).await.unwrap();
    let stored = overlay.local_quadruples(owner).await.unwrap();
    assert_eq!(stored, vec![quad.clone()]);
    assert!(overlay.contains(&quad).await.unwrap());
}

#[tokio::test]
async fn test_detached_publication_is_acknowledged_then_delivered() {
    let overlay = setup(6).await;
    let (listener, mut rx) = ChannelListener::new();
    overlay
        .subscribe("SELECT ?s WHERE { GRAPH ?g { ?s <urn:knows> ?o } }", Arc::new(listener))
        .await
        .unwrap();

    let quad = Quadruple::new(
        Term::iri("urn:event:9"),
        Term::iri("urn:zed"),
        Term::iri("urn:knows"),
        Term::iri("urn:carol"),
    );
    overlay.publish_detached(quad.clone()).await.unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.binding.get("s"), Some(&Term::iri("urn:zed")));
    assert!(overlay.contains(&quad).await.unwrap());
}

// ============================================================================
// 2. Anycast
// ============================================================================

#[tokio::test]
async fn test_find_collects_from_every_intersecting_peer() {
    let overlay = setup(8).await;
    let quads = sample_quads();
    for quad in &quads {
        overlay.publish(quad.clone()).await.unwrap();
    }

    let all = overlay.find(&QuadruplePattern::ANY).await.unwrap();
    assert_eq!(all.len(), quads.len());

    let knows = QuadruplePattern::new(None, None, Some(Term::iri("urn:knows")), None);
    assert_eq!(overlay.count(&knows).await.unwrap(), 5);

    let bob = QuadruplePattern::new(None, Some(Term::iri("urn:bob")), None, None);
    let found = overlay.find(&bob).await.unwrap();
    assert_eq!(found.len(), 3);
    assert!(found.iter().all(|q| q.subject == Term::iri("urn:bob")));
}

// ============================================================================
// 3. Broadcast
// ============================================================================

#[tokio::test]
async fn test_every_strategy_counts_every_peer() {
    let overlay = setup(9).await;
    for strategy in [BroadcastStrategy::Flooding, BroadcastStrategy::Efficient, BroadcastStrategy::Optimal] {
        let report = overlay.count_peers(strategy).await.unwrap();
        assert_eq!(report.peers, 9, "{strategy:?}");
        assert!(report.failures.is_empty(), "{strategy:?}");
        assert!(report.messages >= 9, "{strategy:?}");
    }
}

#[tokio::test]
async fn test_optimal_broadcast_sends_one_message_per_peer() {
    let overlay = setup(12).await;
    let optimal = overlay.count_peers(BroadcastStrategy::Optimal).await.unwrap();
    assert_eq!(optimal.messages, 12);

    let flooding = overlay.count_peers(BroadcastStrategy::Flooding).await.unwrap();
    assert!(flooding.messages >= optimal.messages);
}

#[tokio::test]
async fn test_single_peer_broadcast() {
    let overlay = setup(1).await;
    let report = overlay.count_peers(BroadcastStrategy::Optimal).await.unwrap();
    assert_eq!(report.peers, 1);
    assert_eq!(report.messages, 1);
}

// ============================================================================
// 4. Failures
// ============================================================================

#[tokio::test]
async fn test_disconnected_peer_is_reported() {
    let overlay = setup(8).await;
    let last = *overlay.peers().last().unwrap();
    assert!(overlay.disconnect(last));
    assert!(!overlay.disconnect(last));

    let report = overlay.count_peers(BroadcastStrategy::Flooding).await.unwrap();
    assert_eq!(report.peers, 7);
    assert!(report.failures.contains(&last));
    assert_eq!(overlay.peers().len(), 7);
}
