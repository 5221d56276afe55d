//! # semantic-can: Content-Based Publish/Subscribe over a CAN Overlay
//!
//! Quadruples (graph, subject, predicate, object) are placed in a
//! four-dimensional Content-Addressable Network: every term becomes one
//! coordinate element, and the peer whose zone contains the coordinate
//! stores the quadruple. SPARQL subscriptions are decomposed into atomic
//! patterns, indexed where matching quadruples will land, and notified
//! when published facts complete a solution.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `Dataset` is the contract between a peer and its
//!    store, `Transport` between peers, `NotificationListener` between the
//!    overlay and subscribers
//! 2. **Clean DTOs**: `Term`, `Quadruple`, `Binding` cross all boundaries
//! 3. **Parser owns nothing**: SPARQL → AST → atomic queries is a pure function
//! 4. **Peers are actors**: state is only reached through envelopes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use semantic_can::{ChannelListener, Overlay, OverlayConfig, Quadruple, Term};
//!
//! # async fn example() -> semantic_can::Result<()> {
//! let overlay = Overlay::with_peers(OverlayConfig::default(), 8).await?;
//!
//! let (listener, mut notifications) = ChannelListener::new();
//! overlay.subscribe(
//!     "SELECT ?s ?o WHERE { GRAPH ?g { ?s <urn:knows> ?o } }",
//!     Arc::new(listener),
//! ).await?;
//!
//! overlay.publish(Quadruple::new(
//!     Term::iri("urn:event:1"),
//!     Term::iri("urn:alice"),
//!     Term::iri("urn:knows"),
//!     Term::iri("urn:bob"),
//! )).await?;
//!
//! if let Some(n) = notifications.recv().await {
//!     println!("{}", n.binding);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Routing
//!
//! | Pattern | Used for |
//! |---------|----------|
//! | Unicast | publish, contains, lookup |
//! | Anycast | subscription indexing, find, count, delete, partial matches |
//! | Broadcast | peer counting (flooding, efficient, optimal) |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod geometry;
pub mod sparql;
pub mod routing;
pub mod overlay;
pub mod pubsub;
pub mod stats;
pub mod execution;
pub mod storage;
pub mod tx;
pub mod config;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{Binding, CompoundEvent, Quadruple, QuadruplePattern, Term};

// ============================================================================
// Re-exports: Geometry
// ============================================================================

pub use geometry::{Bound, Coordinate, Element, ElementKind, Region, SemanticMapper, Zone};

// ============================================================================
// Re-exports: Overlay
// ============================================================================

pub use overlay::{LocalTransport, MetricsSnapshot, NeighborEntry, Peer, PeerId, Transport};
pub use routing::{Envelope, Operation, Reply, Response, Routing};
pub use config::{BroadcastStrategy, OverlayConfig, StatsConfig};
pub use stats::StatsKind;

// ============================================================================
// Re-exports: Publish/Subscribe
// ============================================================================

pub use pubsub::{
    ChannelListener, Notification, NotificationListener, SubscriberDirectory, Subscription,
    SubscriptionId, SubscriptionState,
};

// ============================================================================
// Re-exports: Storage and Execution
// ============================================================================

pub use storage::{Dataset, MemoryDataset};
pub use tx::{Transaction, TxMode};
pub use execution::{QueryResult, ResultRow};

use execution::{Fetched, PatternSource};
use overlay::{Inbound, NeighborTable, Topology};
use routing::MessageId;

// ============================================================================
// Top-level Overlay handle
// ============================================================================

/// Outcome of a broadcast peer count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    pub strategy: BroadcastStrategy,
    /// Peers that answered.
    pub peers: u64,
    /// Envelopes the broadcast put into peer inboxes.
    pub messages: u64,
    /// Branches that ended because there was no one left to forward to.
    pub leaves: u32,
    pub failures: Vec<PeerId>,
}

struct PeerHandle<D: Dataset> {
    peer: Arc<Peer<D>>,
    task: JoinHandle<()>,
}

struct SubscriptionRecord {
    subscription: Arc<Subscription>,
    state: SubscriptionState,
}

/// The primary entry point. An `Overlay` runs a set of in-process peers
/// and acts as the client that publishes, subscribes and queries.
pub struct Overlay<D: Dataset + Default = MemoryDataset> {
    config: Arc<OverlayConfig>,
    mapper: SemanticMapper,
    transport: LocalTransport,
    directory: Arc<SubscriberDirectory>,
    peers: RwLock<BTreeMap<PeerId, PeerHandle<D>>>,
    subscriptions: RwLock<HashMap<SubscriptionId, SubscriptionRecord>>,
    joins: tokio::sync::Mutex<()>,
    next_peer: AtomicU64,
    next_subscription: AtomicU64,
    sequence: AtomicU64,
}

/// In-memory overlay for testing and embedding.
impl Overlay<MemoryDataset> {
    pub async fn open_memory(config: OverlayConfig) -> Result<Self> {
        Self::new(config).await
    }

    /// An overlay grown to `peers` peers by successive joins.
    pub async fn with_peers(config: OverlayConfig, peers: usize) -> Result<Self> {
        let overlay = Self::new(config).await?;
        for _ in 1..peers {
            overlay.join().await?;
        }
        Ok(overlay)
    }
}

impl<D: Dataset + Default> Overlay<D> {
    /// An overlay with one peer owning the whole space.
    pub async fn new(config: OverlayConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let overlay = Self {
            mapper: config.mapper(),
            config: Arc::clone(&config),
            transport: LocalTransport::new(),
            directory: Arc::new(SubscriberDirectory::new()),
            peers: RwLock::new(BTreeMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            joins: tokio::sync::Mutex::new(()),
            next_peer: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
        };

        let id = overlay.allocate_peer_id();
        let topology = Topology {
            zone: Zone::full(&config.element_kinds),
            neighbors: NeighborTable::new(config.dimensions),
            depth: 0,
        };
        let peer = Peer::new(
            id,
            topology,
            D::default(),
            Arc::clone(&config),
            Arc::new(overlay.transport.clone()),
            Arc::clone(&overlay.directory),
        );
        overlay.start(Arc::new(peer));
        info!(peer = %id, "overlay bootstrapped");
        Ok(overlay)
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn mapper(&self) -> &SemanticMapper {
        &self.mapper
    }

    pub fn directory(&self) -> &Arc<SubscriberDirectory> {
        &self.directory
    }

    fn allocate_peer_id(&self) -> PeerId {
        PeerId(self.next_peer.fetch_add(1, Ordering::Relaxed))
    }

    fn start(&self, peer: Arc<Peer<D>>) {
        let inbox = self.transport.register(peer.id());
        self.start_with(peer, inbox);
    }

    fn start_with(&self, peer: Arc<Peer<D>>, inbox: tokio::sync::mpsc::UnboundedReceiver<Inbound>) {
        let task = Arc::clone(&peer).spawn(inbox);
        self.peers.write().insert(peer.id(), PeerHandle { peer, task });
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Adds a peer. The least-split live peer is asked to share its zone.
    pub async fn join(&self) -> Result<PeerId> {
        let _joins = self.joins.lock().await;
        let landmark = self
            .peers
            .read()
            .values()
            .filter(|h| self.transport.is_registered(h.peer.id()))
            .min_by_key(|h| (h.peer.topology().depth, h.peer.id()))
            .map(|h| h.peer.id())
            .ok_or_else(|| Error::MembershipError("no live peer to join through".into()))?;

        let id = self.allocate_peer_id();
        // Neighbors may address the newcomer before it runs: their
        // envelopes wait in its inbox.
        let inbox = self.transport.register(id);
        let joined = async {
            let response = self.send(landmark, Routing::Direct, Operation::Join { newcomer: id }).await?;
            let Reply::Joined(grant) = response.reply else {
                return Err(Error::MembershipError(format!("{landmark} refused the join")));
            };
            Peer::from_grant(
                id,
                *grant,
                D::default(),
                Arc::clone(&self.config),
                Arc::new(self.transport.clone()),
                Arc::clone(&self.directory),
            )
            .await
        }
        .await;

        match joined {
            Ok(peer) => {
                info!(peer = %id, %landmark, zone = %peer.zone(), "peer joined");
                self.start_with(Arc::new(peer), inbox);
                Ok(id)
            }
            Err(err) => {
                self.transport.unregister(id);
                Err(err)
            }
        }
    }

    /// Makes a peer unreachable without telling its neighbors, as a crash
    /// would.
    pub fn disconnect(&self, peer: PeerId) -> bool {
        let removed = self.transport.unregister(peer);
        if let Some(handle) = self.peers.write().remove(&peer) {
            handle.task.abort();
        }
        if removed {
            info!(%peer, "peer disconnected");
        }
        removed
    }

    /// Stops every peer.
    pub async fn shutdown(self) {
        let handles: Vec<PeerHandle<D>> = std::mem::take(&mut *self.peers.write()).into_values().collect();
        for handle in &handles {
            self.transport.unregister(handle.peer.id());
        }
        for handle in handles {
            // Closing the inbox ends the run loop.
            let _ = handle.task.await;
        }
        info!("overlay shut down");
    }

    // ========================================================================
    // Client messaging
    // ========================================================================

    fn entry_peer(&self) -> Result<PeerId> {
        self.peers
            .read()
            .keys()
            .copied()
            .find(|id| self.transport.is_registered(*id))
            .ok_or_else(|| Error::RoutingError("no live peer to send through".into()))
    }

    fn envelope(&self, routing: Routing, operation: Operation) -> Envelope {
        let id = MessageId {
            origin: PeerId::CLIENT,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        };
        Envelope::new(id, routing, operation)
    }

    async fn send(&self, to: PeerId, routing: Routing, operation: Operation) -> Result<Response> {
        let envelope = self.envelope(routing, operation);
        debug!(message = %envelope.id, entry = %to, operation = envelope.operation.name(), "client request");
        self.transport.send(to, envelope).await
    }

    async fn route(&self, routing: Routing, operation: Operation) -> Result<Response> {
        let entry = self.entry_peer()?;
        self.send(entry, routing, operation).await
    }

    // ========================================================================
    // Publish/subscribe
    // ========================================================================

    /// Stores a quadruple at the peer owning its coordinate and matches it
    /// there. Returns once every resulting notification has been attempted.
    pub async fn publish(&self, quad: Quadruple) -> Result<()> {
        let target = self.mapper.coordinate(&quad);
        let response = self.route(Routing::Unicast { target }, Operation::Publish(quad)).await?;
        if response.visited.is_empty() {
            return Err(Error::RoutingError(format!(
                "publication not handled, failed at {:?}",
                response.failures
            )));
        }
        Ok(())
    }

    /// Hands a quadruple to the overlay without waiting for it to be
    /// stored or matched. Returns once the entry peer has accepted it.
    pub async fn publish_detached(&self, quad: Quadruple) -> Result<()> {
        let target = self.mapper.coordinate(&quad);
        let entry = self.entry_peer()?;
        let envelope = self.envelope(Routing::Unicast { target }, Operation::Publish(quad)).without_reply();
        debug!(message = %envelope.id, %entry, "detached publication");
        let response = self.transport.send(entry, envelope).await?;
        match response.reply {
            Reply::Ack => Ok(()),
            _ => Err(Error::RoutingError(format!(
                "detached publication not accepted, failed at {:?}",
                response.failures
            ))),
        }
    }

    /// Publishes the quadruples of an event one after another.
    pub async fn publish_event(&self, event: CompoundEvent) -> Result<()> {
        for quad in event {
            self.publish(quad).await?;
        }
        Ok(())
    }

    pub async fn subscribe(&self, sparql: &str, listener: Arc<dyn NotificationListener>) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let subscriber = self.directory.register(listener);
        let subscription = match Subscription::new(id, sparql, subscriber, &self.mapper) {
            Ok(subscription) => Arc::new(subscription),
            Err(err) => {
                self.directory.unregister(subscriber);
                return Err(err);
            }
        };
        self.subscriptions.write().insert(
            id,
            SubscriptionRecord { subscription: Arc::clone(&subscription), state: SubscriptionState::Registering },
        );

        for ss in &subscription.subsubscriptions {
            let operation = Operation::IndexSubscription { subscription: Arc::clone(&subscription), index: ss.index };
            let response = self.route(Routing::Anycast { region: ss.region.clone() }, operation).await?;
            debug!(subscription = %id, index = ss.index, peers = response.visited.len(), "sub-subscription indexed");
        }

        if let Some(record) = self.subscriptions.write().get_mut(&id) {
            record.state = SubscriptionState::Indexed;
        }
        info!(subscription = %id, patterns = subscription.len(), "subscribed");
        Ok(id)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let subscription = self
            .subscriptions
            .read()
            .get(&id)
            .map(|r| Arc::clone(&r.subscription))
            .ok_or_else(|| Error::NotFound(format!("Subscription {id}")))?;

        for region in subscription.regions() {
            self.route(Routing::Anycast { region: region.clone() }, Operation::Unsubscribe(id)).await?;
        }
        self.directory.unregister(subscription.subscriber);
        if let Some(record) = self.subscriptions.write().get_mut(&id) {
            record.state = SubscriptionState::Withdrawn;
        }
        info!(subscription = %id, "unsubscribed");
        Ok(())
    }

    pub fn subscription_state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        let subscriptions = self.subscriptions.read();
        let record = subscriptions.get(&id)?;
        Some(match record.state {
            SubscriptionState::Indexed if !self.directory.is_registered(record.subscription.subscriber) => {
                SubscriptionState::Withdrawn
            }
            SubscriptionState::Indexed if self.directory.delivered(id) > 0 => SubscriptionState::Matching,
            state => state,
        })
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subscriptions.read().get(&id).map(|r| Arc::clone(&r.subscription))
    }

    // ========================================================================
    // Data access
    // ========================================================================

    pub async fn find(&self, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>> {
        let region = self.mapper.region(pattern);
        let response = self.route(Routing::Anycast { region }, Operation::Find(pattern.clone())).await?;
        Ok(response.reply.into_quadruples())
    }

    pub async fn count(&self, pattern: &QuadruplePattern) -> Result<u64> {
        let region = self.mapper.region(pattern);
        let response = self.route(Routing::Anycast { region }, Operation::Count(pattern.clone())).await?;
        Ok(response.reply.count())
    }

    pub async fn contains(&self, quad: &Quadruple) -> Result<bool> {
        let target = self.mapper.coordinate(quad);
        let response = self.route(Routing::Unicast { target }, Operation::Contains(quad.clone())).await?;
        Ok(response.reply.is_true())
    }

    /// Deletes every matching quadruple. Returns how many were deleted.
    pub async fn delete(&self, pattern: &QuadruplePattern) -> Result<u64> {
        let region = self.mapper.region(pattern);
        let response = self.route(Routing::Anycast { region }, Operation::Delete(pattern.clone())).await?;
        Ok(response.reply.count())
    }

    /// One-shot SPARQL query over the stored quadruples.
    pub async fn select(&self, sparql: &str) -> Result<QueryResult> {
        execution::execute(self, sparql).await
    }

    pub async fn ask(&self, sparql: &str) -> Result<bool> {
        Ok(!self.select(sparql).await?.is_empty())
    }

    // ========================================================================
    // Overlay introspection
    // ========================================================================

    /// Counts the peers with a broadcast, reporting the envelopes it took.
    pub async fn count_peers(&self, strategy: BroadcastStrategy) -> Result<BroadcastReport> {
        let before = self.total_envelopes();
        let routing = Routing::broadcast(strategy, self.config.dimensions);
        let response = self.route(routing, Operation::CountPeers).await?;
        let messages = self.total_envelopes().saturating_sub(before);
        Ok(BroadcastReport {
            strategy,
            peers: response.reply.count(),
            messages,
            leaves: response.leaves,
            failures: response.failures,
        })
    }

    fn total_envelopes(&self) -> u64 {
        self.peers.read().values().map(|h| h.peer.metrics().envelopes).sum()
    }

    /// The peer whose zone contains `coordinate`.
    pub async fn lookup(&self, coordinate: &Coordinate) -> Result<PeerId> {
        let response = self
            .route(Routing::Unicast { target: coordinate.clone() }, Operation::Lookup)
            .await?;
        match response.reply {
            Reply::Peer(peer) => Ok(peer),
            _ => Err(Error::RoutingError(format!("no peer answered the lookup of {coordinate}"))),
        }
    }

    /// Live peers, by id.
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers
            .read()
            .keys()
            .copied()
            .filter(|id| self.transport.is_registered(*id))
            .collect()
    }

    pub fn peer(&self, id: PeerId) -> Option<Arc<Peer<D>>> {
        self.peers.read().get(&id).map(|h| Arc::clone(&h.peer))
    }

    pub fn zone(&self, id: PeerId) -> Option<Zone> {
        self.peer(id).map(|p| p.zone())
    }

    pub fn neighbors(&self, id: PeerId) -> Option<Vec<NeighborEntry>> {
        self.peer(id).map(|p| p.neighbors().iter().collect())
    }

    pub fn metrics(&self, id: PeerId) -> Option<MetricsSnapshot> {
        self.peer(id).map(|p| p.metrics())
    }

    /// Quadruples stored by one peer.
    pub async fn local_quadruples(&self, id: PeerId) -> Result<Vec<Quadruple>> {
        let peer = self.peer(id).ok_or_else(|| Error::NotFound(format!("Peer {id}")))?;
        peer.quadruples().await
    }
}

#[async_trait]
impl<D: Dataset + Default> PatternSource for Overlay<D> {
    async fn fetch(&self, pattern: &QuadruplePattern) -> Result<Fetched> {
        let region = self.mapper.region(pattern);
        let response = self.route(Routing::Anycast { region }, Operation::Find(pattern.clone())).await?;
        Ok(Fetched {
            peers: response.visited.len(),
            failures: response.failures.len(),
            quadruples: response.reply.into_quadruples(),
        })
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("SPARQL syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    #[error("Decomposition error: {0}")]
    DecompositionError(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Routing error: {0}")]
    RoutingError(String),

    #[error("Peer unreachable: {0}")]
    Unreachable(PeerId),

    #[error("Membership error: {0}")]
    MembershipError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Invalid dimension {dim} for a {dimensions}-dimensional space")]
    InvalidDimension { dim: usize, dimensions: usize },

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
