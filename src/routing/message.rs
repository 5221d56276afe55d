//! Envelopes, operations, replies and the merge step.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::BroadcastStrategy;
use crate::geometry::{Coordinate, Direction, Region, Zone};
use crate::model::{Quadruple, QuadruplePattern, Term};
use crate::overlay::membership::JoinGrant;
use crate::overlay::PeerId;
use crate::pubsub::{PartialBinding, Subscription, SubscriptionId};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique message identifier, preserved across every forwarded copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId {
    pub origin: PeerId,
    pub sequence: u64,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.sequence)
    }
}

/// Bitmap of `(dimension, direction)` pairs, bit `2 * dim + direction`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectionMask(u32);

impl DirectionMask {
    pub const NONE: DirectionMask = DirectionMask(0);

    pub fn all(dimensions: usize) -> Self {
        let bits = 2 * dimensions as u32;
        DirectionMask(if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 })
    }

    fn bit(dim: usize, direction: Direction) -> u32 {
        1u32 << (2 * dim + direction.index())
    }

    pub fn contains(self, dim: usize, direction: Direction) -> bool {
        self.0 & Self::bit(dim, direction) != 0
    }

    pub fn insert(&mut self, dim: usize, direction: Direction) {
        self.0 |= Self::bit(dim, direction);
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: Self) -> Self {
        DirectionMask(self.0 | other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        DirectionMask(self.0 & !other.0)
    }

    /// Directions a peer reached along `(dim, direction)` keeps forwarding
    /// on: both sides of every lower dimension, the same side of `dim`.
    pub fn for_child(dim: usize, direction: Direction) -> Self {
        let mut mask = DirectionMask::NONE;
        for lower in 0..dim {
            mask.insert(lower, Direction::Lower);
            mask.insert(lower, Direction::Upper);
        }
        mask.insert(dim, direction);
        mask
    }
}

// ============================================================================
// Routing descriptors
// ============================================================================

/// Dissemination state carried by a broadcast envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastState {
    pub strategy: BroadcastStrategy,
    /// Split plan of the optimal strategy: the initiator's lower corner.
    /// Filled in by the first peer handling the message.
    pub plan: Option<Coordinate>,
    /// Directions the receiver may still forward along.
    pub directions: DirectionMask,
}

/// Delivery pattern of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// Handled by the addressed peer, never forwarded.
    Direct,
    /// Forwarded until the peer whose zone contains the target.
    Unicast { target: Coordinate },
    /// Every peer whose zone intersects the region.
    Anycast { region: Region },
    /// Every peer.
    Broadcast(BroadcastState),
}

impl Routing {
    pub fn broadcast(strategy: BroadcastStrategy, dimensions: usize) -> Self {
        Routing::Broadcast(BroadcastState {
            strategy,
            plan: None,
            directions: DirectionMask::all(dimensions),
        })
    }
}

// ============================================================================
// Operations
// ============================================================================

/// What the receiving peer(s) do once the routing constraint is met.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Reply with the handling peer's identity.
    Lookup,
    CountPeers,
    /// Store a quadruple and match it against indexed subscriptions.
    Publish(Quadruple),
    Contains(Quadruple),
    Find(QuadruplePattern),
    Count(QuadruplePattern),
    Delete(QuadruplePattern),
    IndexSubscription { subscription: Arc<Subscription>, index: usize },
    Unsubscribe(SubscriptionId),
    RetrievePartials { subscription: SubscriptionId, graph: Term, index: usize },
    ClaimJoin { subscription: SubscriptionId, graph: Term },
    ConsumePartials { subscription: SubscriptionId, graph: Term },
    /// Split the local zone and hand half of it to `newcomer`.
    Join { newcomer: PeerId },
    UpdateNeighbor { peer: PeerId, zone: Zone },
    RemoveNeighbor { peer: PeerId },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Lookup => "lookup",
            Operation::CountPeers => "count-peers",
            Operation::Publish(_) => "publish",
            Operation::Contains(_) => "contains",
            Operation::Find(_) => "find",
            Operation::Count(_) => "count",
            Operation::Delete(_) => "delete",
            Operation::IndexSubscription { .. } => "index-subscription",
            Operation::Unsubscribe(_) => "unsubscribe",
            Operation::RetrievePartials { .. } => "retrieve-partials",
            Operation::ClaimJoin { .. } => "claim-join",
            Operation::ConsumePartials { .. } => "consume-partials",
            Operation::Join { .. } => "join",
            Operation::UpdateNeighbor { .. } => "update-neighbor",
            Operation::RemoveNeighbor { .. } => "remove-neighbor",
        }
    }

    /// The combinator folding per-peer replies into one.
    pub fn merge_strategy(&self) -> MergeStrategy {
        match self {
            Operation::CountPeers
            | Operation::Count(_)
            | Operation::Delete(_)
            | Operation::ConsumePartials { .. } => MergeStrategy::Sum,
            Operation::Contains(_) | Operation::ClaimJoin { .. } => MergeStrategy::Or,
            Operation::Find(_) => MergeStrategy::Union,
            Operation::RetrievePartials { .. } => MergeStrategy::Concat,
            Operation::Lookup | Operation::Join { .. } => MergeStrategy::First,
            Operation::Publish(_)
            | Operation::IndexSubscription { .. }
            | Operation::Unsubscribe(_)
            | Operation::UpdateNeighbor { .. }
            | Operation::RemoveNeighbor { .. } => MergeStrategy::Ack,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A routed message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: MessageId,
    pub routing: Routing,
    pub operation: Operation,
    /// Peers this copy went through, origin first. Doubles as the reverse
    /// path and the visited set for forwarding decisions.
    pub routing_list: Vec<PeerId>,
    pub hop_count: u32,
    pub reply_expected: bool,
}

impl Envelope {
    pub fn new(id: MessageId, routing: Routing, operation: Operation) -> Self {
        Self {
            id,
            routing,
            operation,
            routing_list: Vec::new(),
            hop_count: 0,
            reply_expected: true,
        }
    }

    pub fn without_reply(mut self) -> Self {
        self.reply_expected = false;
        self
    }

    /// The copy sent one hop further from `via`.
    pub fn forwarded(&self, via: PeerId) -> Self {
        let mut next = self.clone();
        next.routing_list.push(via);
        next.hop_count += 1;
        next
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Payload produced by one peer's local evaluation.
#[derive(Debug, Clone, Default)]
pub enum Reply {
    /// No contribution (duplicate copy or failed branch).
    #[default]
    Empty,
    Ack,
    Count(u64),
    Bool(bool),
    Quadruples(Vec<Quadruple>),
    Partials(Vec<PartialBinding>),
    Peer(PeerId),
    Joined(Box<JoinGrant>),
}

impl Reply {
    pub fn count(&self) -> u64 {
        match self {
            Reply::Count(n) => *n,
            _ => 0,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Reply::Bool(true))
    }

    pub fn into_quadruples(self) -> Vec<Quadruple> {
        match self {
            Reply::Quadruples(q) => q,
            _ => Vec::new(),
        }
    }

    pub fn into_partials(self) -> Vec<PartialBinding> {
        match self {
            Reply::Partials(p) => p,
            _ => Vec::new(),
        }
    }
}

/// How sub-results of a multi-peer delivery are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Sum,
    Or,
    /// Set union, ordered.
    Union,
    Concat,
    /// Keep the first non-empty reply.
    First,
    Ack,
}

impl MergeStrategy {
    pub fn merge(self, left: Reply, right: Reply) -> Reply {
        match (left, right) {
            (Reply::Empty, r) | (r, Reply::Empty) => r,
            (l, r) => match self {
                MergeStrategy::Sum => Reply::Count(l.count() + r.count()),
                MergeStrategy::Or => Reply::Bool(l.is_true() || r.is_true()),
                MergeStrategy::Union => {
                    let set: BTreeSet<Quadruple> =
                        l.into_quadruples().into_iter().chain(r.into_quadruples()).collect();
                    Reply::Quadruples(set.into_iter().collect())
                }
                MergeStrategy::Concat => {
                    let mut all = l.into_partials();
                    all.extend(r.into_partials());
                    Reply::Partials(all)
                }
                MergeStrategy::First => l,
                MergeStrategy::Ack => Reply::Ack,
            },
        }
    }
}

/// Result of routing an envelope, merged along the reverse path.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub reply: Reply,
    /// Peers that evaluated the operation.
    pub visited: Vec<PeerId>,
    /// Neighbors that could not be reached.
    pub failures: Vec<PeerId>,
    /// Largest hop count among delivered copies.
    pub hops: u32,
    /// Branches that ended because no forwarding was needed.
    pub leaves: u32,
}

impl Response {
    pub fn delivered(peer: PeerId, reply: Reply, hops: u32) -> Self {
        Self { reply, visited: vec![peer], failures: Vec::new(), hops, leaves: 0 }
    }

    /// Immediate acknowledgement of a message that needs no reply.
    pub fn ack(hops: u32) -> Self {
        Self { reply: Reply::Ack, hops, ..Self::default() }
    }

    /// Reply to a duplicate copy.
    pub fn empty(hops: u32) -> Self {
        Self { hops, ..Self::default() }
    }

    pub fn failed(peer: PeerId) -> Self {
        Self { failures: vec![peer], ..Self::default() }
    }

    pub fn merge(mut self, other: Response, strategy: MergeStrategy) -> Response {
        self.reply = strategy.merge(std::mem::take(&mut self.reply), other.reply);
        self.visited.extend(other.visited);
        self.failures.extend(other.failures);
        self.hops = self.hops.max(other.hops);
        self.leaves += other.leaves;
        self
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}
