//! Peer actor: state, inbox loop and local evaluation of operations.
//!
//! ## Concurrency
//!
//! - Every inbound envelope is handled in its own task, so a peer waiting
//!   on a remote branch keeps serving other requests.
//! - Topology reads take short `RwLock` snapshots. Zone changes are
//!   serialized by the async `membership` mutex.
//! - No lock is held across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::OverlayConfig;
use crate::geometry::{SemanticMapper, Zone};
use crate::model::{Quadruple, QuadruplePattern, Term};
use crate::pubsub::{protocol, PartialStore, SubscriberDirectory, SubscriptionId, SubscriptionIndex};
use crate::routing::{self, BoundedMap, BoundedSet, DirectionMask, Envelope, MessageId, Operation, Reply, Response, Routing};
use crate::stats::StatsRecorder;
use crate::storage::Dataset;
use crate::tx::TxMode;
use crate::{Error, Result};
use super::membership;
use super::neighbor::NeighborTable;
use super::transport::{Inbound, Transport};
use super::PeerId;

// ============================================================================
// Topology and metrics
// ============================================================================

/// Zone ownership of a peer.
#[derive(Debug, Clone)]
pub struct Topology {
    pub zone: Zone,
    pub neighbors: NeighborTable,
    /// Number of splits that produced the zone.
    pub depth: u32,
}

#[derive(Debug, Default)]
pub struct PeerMetrics {
    envelopes: AtomicU64,
    duplicates: AtomicU64,
    constraint_reached: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Envelopes taken from the inbox.
    pub envelopes: u64,
    /// Copies dropped because their message id was already seen.
    pub duplicates: u64,
    /// Broadcast branches that ended at this peer.
    pub constraint_reached: u64,
}

impl PeerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            envelopes: self.envelopes.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            constraint_reached: self.constraint_reached.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Peer
// ============================================================================

pub struct Peer<D: Dataset> {
    id: PeerId,
    config: Arc<OverlayConfig>,
    mapper: SemanticMapper,
    topology: RwLock<Topology>,
    pub(crate) membership: tokio::sync::Mutex<()>,
    pub(crate) dataset: D,
    pub(crate) stats: StatsRecorder,
    pub(crate) index: RwLock<SubscriptionIndex>,
    pub(crate) partials: Mutex<PartialStore>,
    claims: Mutex<BoundedSet<(SubscriptionId, Term)>>,
    received: Mutex<BoundedSet<MessageId>>,
    forwarded: Mutex<BoundedMap<MessageId, DirectionMask>>,
    notification_failures: Mutex<HashMap<SubscriptionId, u32>>,
    directory: Arc<SubscriberDirectory>,
    transport: Arc<dyn Transport>,
    sequence: AtomicU64,
    metrics: PeerMetrics,
}

impl<D: Dataset> Peer<D> {
    /// Must be called within a tokio runtime when background statistics
    /// are configured.
    pub fn new(
        id: PeerId,
        topology: Topology,
        dataset: D,
        config: Arc<OverlayConfig>,
        transport: Arc<dyn Transport>,
        directory: Arc<SubscriberDirectory>,
    ) -> Self {
        let mapper = config.mapper();
        let capacity = config.dedupe_capacity;
        Self {
            id,
            stats: StatsRecorder::new(&config.stats, mapper.clone()),
            mapper,
            topology: RwLock::new(topology),
            membership: tokio::sync::Mutex::new(()),
            dataset,
            index: RwLock::new(SubscriptionIndex::new()),
            partials: Mutex::new(PartialStore::new()),
            claims: Mutex::new(BoundedSet::new(capacity)),
            received: Mutex::new(BoundedSet::new(capacity)),
            forwarded: Mutex::new(BoundedMap::new(capacity)),
            notification_failures: Mutex::new(HashMap::new()),
            directory,
            transport,
            sequence: AtomicU64::new(0),
            metrics: PeerMetrics::default(),
            config,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn mapper(&self) -> &SemanticMapper {
        &self.mapper
    }

    pub fn topology(&self) -> Topology {
        self.topology.read().clone()
    }

    pub fn zone(&self) -> Zone {
        self.topology.read().zone.clone()
    }

    pub fn neighbors(&self) -> NeighborTable {
        self.topology.read().neighbors.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn directory(&self) -> &Arc<SubscriberDirectory> {
        &self.directory
    }

    /// Replaces the topology after a split. Callers hold `membership`.
    pub(crate) fn set_topology(&self, topology: Topology) {
        *self.topology.write() = topology;
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Drains `inbox` until every sender is gone.
    pub fn spawn(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Inbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some((envelope, reply)) = inbox.recv().await {
                let peer = Arc::clone(&self);
                tokio::spawn(async move {
                    let outcome = peer.handle(envelope).await;
                    // The sender may have given up on the reply.
                    let _ = reply.send(outcome);
                });
            }
            debug!(peer = %self.id, "inbox closed");
        })
    }

    pub async fn handle(self: &Arc<Self>, envelope: Envelope) -> Result<Response> {
        self.metrics.envelopes.fetch_add(1, Ordering::Relaxed);
        trace!(
            peer = %self.id,
            message = %envelope.id,
            operation = envelope.operation.name(),
            hops = envelope.hop_count,
            "envelope received"
        );
        routing::route(self, envelope).await
    }

    // ========================================================================
    // Routing support
    // ========================================================================

    pub(crate) fn next_message_id(&self) -> MessageId {
        MessageId { origin: self.id, sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1 }
    }

    /// Records `id`. Returns `false` for a copy already handled here.
    pub(crate) fn first_receipt(&self, id: MessageId) -> bool {
        let fresh = self.received.lock().insert(id);
        if !fresh {
            self.metrics.duplicates.fetch_add(1, Ordering::Relaxed);
            trace!(peer = %self.id, message = %id, "duplicate dropped");
        }
        fresh
    }

    /// Marks `directions` as forwarded for `id` and returns the ones that
    /// had not been forwarded yet.
    pub(crate) fn claim_directions(&self, id: MessageId, directions: DirectionMask) -> DirectionMask {
        let mut forwarded = self.forwarded.lock();
        let seen = forwarded.entry_or_insert_with(id, DirectionMask::default);
        let fresh = directions.difference(*seen);
        *seen = seen.union(directions);
        fresh
    }

    pub(crate) fn constraint_reached(&self) {
        self.metrics.constraint_reached.fetch_add(1, Ordering::Relaxed);
    }

    /// Sends a forwarded copy. An unreachable neighbor becomes a failed
    /// branch instead of an error.
    pub(crate) async fn forward(&self, to: PeerId, envelope: Envelope) -> Result<Response> {
        match self.transport.send(to, envelope).await {
            Err(Error::Unreachable(peer)) => {
                warn!(peer = %self.id, neighbor = %peer, "neighbor unreachable");
                Ok(Response::failed(peer))
            }
            other => other,
        }
    }

    /// Starts a new message from this peer, routed like any other.
    pub(crate) async fn initiate(&self, routing: Routing, operation: Operation) -> Result<Response> {
        let envelope = Envelope::new(self.next_message_id(), routing, operation);
        self.transport.send(self.id, envelope).await
    }

    pub(crate) async fn send_direct(&self, to: PeerId, operation: Operation) -> Result<Response> {
        let envelope = Envelope::new(self.next_message_id(), Routing::Direct, operation);
        self.transport.send(to, envelope).await
    }

    // ========================================================================
    // Local evaluation
    // ========================================================================

    /// Runs an operation against this peer's local state.
    pub async fn evaluate(self: &Arc<Self>, operation: &Operation) -> Result<Reply> {
        match operation {
            Operation::Lookup => Ok(Reply::Peer(self.id)),
            Operation::CountPeers => Ok(Reply::Count(1)),
            Operation::Publish(quad) => {
                protocol::on_publish(self, quad.clone()).await?;
                Ok(Reply::Ack)
            }
            Operation::Contains(quad) => {
                let tx = self.dataset.begin(TxMode::ReadOnly).await?;
                let found = self.dataset.contains(&tx, quad).await;
                self.dataset.end(tx).await?;
                Ok(Reply::Bool(found?))
            }
            Operation::Find(pattern) => Ok(Reply::Quadruples(self.dataset.find_all(pattern).await?)),
            Operation::Count(pattern) => {
                Ok(Reply::Count(self.dataset.find_all(pattern).await?.len() as u64))
            }
            Operation::Delete(pattern) => Ok(Reply::Count(self.delete(pattern).await?.len() as u64)),
            Operation::IndexSubscription { subscription, index } => {
                self.index.write().insert(Arc::clone(subscription), *index);
                Ok(Reply::Ack)
            }
            Operation::Unsubscribe(id) => {
                self.index.write().remove(*id);
                self.partials.lock().remove_subscription(*id);
                self.notification_failures.lock().remove(id);
                Ok(Reply::Ack)
            }
            Operation::RetrievePartials { subscription, graph, index } => {
                Ok(Reply::Partials(self.partials.lock().retrieve(*subscription, graph, *index)))
            }
            Operation::ClaimJoin { subscription, graph } => {
                Ok(Reply::Bool(self.claims.lock().insert((*subscription, graph.clone()))))
            }
            Operation::ConsumePartials { subscription, graph } => {
                Ok(Reply::Count(self.partials.lock().consume(*subscription, graph) as u64))
            }
            Operation::Join { newcomer } => {
                let grant = membership::accept_join(self, *newcomer).await?;
                Ok(Reply::Joined(Box::new(grant)))
            }
            Operation::UpdateNeighbor { peer, zone } => {
                let mut topology = self.topology.write();
                let local = topology.zone.clone();
                topology.neighbors.update(&local, *peer, zone.clone());
                Ok(Reply::Ack)
            }
            Operation::RemoveNeighbor { peer } => {
                self.topology.write().neighbors.remove(*peer);
                Ok(Reply::Ack)
            }
        }
    }

    // ========================================================================
    // Dataset
    // ========================================================================

    /// Stores a quadruple and records it in the statistics. Returns `false`
    /// if it was already stored.
    pub(crate) async fn store(&self, quad: Quadruple) -> Result<bool> {
        let mut tx = self.dataset.begin(TxMode::Write).await?;
        let outcome: Result<bool> = async {
            if self.dataset.contains(&tx, &quad).await? {
                return Ok(false);
            }
            self.dataset.add(&mut tx, quad.clone()).await?;
            self.dataset.commit(&mut tx).await?;
            Ok(true)
        }
        .await;
        self.dataset.end(tx).await?;
        let stored = outcome?;
        if stored {
            self.stats.register(&quad);
        }
        Ok(stored)
    }

    pub(crate) async fn delete(&self, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>> {
        let deleted = self.dataset.delete_all(pattern).await?;
        for quad in &deleted {
            self.stats.unregister(quad);
        }
        Ok(deleted)
    }

    /// Removes and returns the quadruples whose coordinate lies in `zone`.
    pub(crate) async fn take_quadruples_in(&self, zone: &Zone) -> Result<Vec<Quadruple>> {
        let moving: Vec<Quadruple> = self
            .dataset
            .find_all(&QuadruplePattern::ANY)
            .await?
            .into_iter()
            .filter(|q| zone.contains(&self.mapper.coordinate(q)))
            .collect();
        let mut taken = Vec::with_capacity(moving.len());
        for quad in moving {
            taken.extend(self.delete(&QuadruplePattern::from(&quad)).await?);
        }
        Ok(taken)
    }

    /// Every quadruple this peer stores.
    pub async fn quadruples(&self) -> Result<Vec<Quadruple>> {
        self.dataset.find_all(&QuadruplePattern::ANY).await
    }

    // ========================================================================
    // Notification failures
    // ========================================================================

    pub(crate) fn record_notification_failure(&self, subscription: SubscriptionId) -> u32 {
        let mut failures = self.notification_failures.lock();
        let count = failures.entry(subscription).or_insert(0);
        *count += 1;
        *count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Zone;
    use crate::overlay::LocalTransport;
    use crate::storage::MemoryDataset;

    fn lone_peer() -> Arc<Peer<MemoryDataset>> {
        let config = Arc::new(OverlayConfig::default());
        let topology = Topology {
            zone: Zone::full(&config.element_kinds),
            neighbors: NeighborTable::new(config.dimensions),
            depth: 0,
        };
        Arc::new(Peer::new(
            PeerId(1),
            topology,
            MemoryDataset::new(),
            config,
            Arc::new(LocalTransport::new()),
            Arc::new(SubscriberDirectory::new()),
        ))
    }

    fn quad(s: &str) -> Quadruple {
        Quadruple::new(Term::iri("urn:g"), Term::iri(s), Term::iri("urn:p"), Term::literal("o"))
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let peer = lone_peer();
        assert!(peer.store(quad("urn:a")).await.unwrap());
        assert!(!peer.store(quad("urn:a")).await.unwrap());
        assert_eq!(peer.stats.len(), 1);
        let count = peer.evaluate(&Operation::Count(QuadruplePattern::ANY)).await.unwrap();
        assert_eq!(count.count(), 1);
    }

    #[tokio::test]
    async fn test_delete_unregisters_stats() {
        let peer = lone_peer();
        peer.store(quad("urn:a")).await.unwrap();
        peer.store(quad("urn:b")).await.unwrap();
        let reply = peer
            .evaluate(&Operation::Delete(QuadruplePattern::from(&quad("urn:a"))))
            .await
            .unwrap();
        assert_eq!(reply.count(), 1);
        assert_eq!(peer.stats.len(), 1);
    }

    #[tokio::test]
    async fn test_claims_and_duplicates() {
        let peer = lone_peer();
        let claim = Operation::ClaimJoin { subscription: SubscriptionId(1), graph: Term::iri("urn:g") };
        assert!(peer.evaluate(&claim).await.unwrap().is_true());
        assert!(!peer.evaluate(&claim).await.unwrap().is_true());

        let id = peer.next_message_id();
        assert!(peer.first_receipt(id));
        assert!(!peer.first_receipt(id));
        assert_eq!(peer.metrics().duplicates, 1);
    }

    #[test]
    fn test_claim_directions_returns_only_new() {
        let peer = lone_peer();
        let id = peer.next_message_id();
        let first = DirectionMask::for_child(0, crate::geometry::Direction::Upper);
        assert_eq!(peer.claim_directions(id, first), first);
        assert!(peer.claim_directions(id, first).is_empty());
    }
}
