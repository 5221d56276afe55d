//! # Split-Point Statistics
//!
//! Each peer keeps running aggregates of the quadruples it stores so that
//! a zone can be split where its data is, rather than at the middle.
//!
//! | Kind | Weight of a term | Estimate |
//! |------|------------------|----------|
//! | `Mean` | 1 | arithmetic mean |
//! | `Centroid` | length of its routing string | weighted mean |
//!
//! With `background_threads = 0` updates are applied by the caller.
//! Otherwise a pool of tokio tasks drains an update channel in order, and
//! [`StatsRecorder::sync`] waits until the queue is empty.

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::config::StatsConfig;
use crate::geometry::{Element, SemanticMapper, SEMANTIC_DIMENSIONS};
use crate::model::Quadruple;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsKind {
    #[default]
    Mean,
    Centroid,
}

/// Aggregates at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub count: u64,
    pub sums: [f64; SEMANTIC_DIMENSIONS],
    pub weights: [f64; SEMANTIC_DIMENSIONS],
}

#[derive(Debug)]
enum Update {
    Register(Quadruple),
    Unregister(Quadruple),
}

/// State shared with the workers.
struct Aggregator {
    kind: StatsKind,
    mapper: SemanticMapper,
    state: Mutex<StatsSnapshot>,
}

impl Aggregator {
    fn apply(&self, update: &Update) {
        let (quad, sign) = match update {
            Update::Register(quad) => (quad, 1.0),
            Update::Unregister(quad) => (quad, -1.0),
        };
        let mut contributions = [(0.0, 0.0); SEMANTIC_DIMENSIONS];
        for (dim, term) in quad.terms().into_iter().enumerate() {
            let weight = match self.kind {
                StatsKind::Mean => 1.0,
                StatsKind::Centroid => self.mapper.weight(term),
            };
            let value = self.mapper.element(dim, term).to_f64();
            contributions[dim] = (weight * value, weight);
        }

        let mut state = self.state.lock();
        if sign < 0.0 && state.count == 0 {
            return;
        }
        for (dim, (sum, weight)) in contributions.into_iter().enumerate() {
            state.sums[dim] += sign * sum;
            state.weights[dim] += sign * weight;
        }
        if sign > 0.0 {
            state.count += 1;
        } else {
            state.count -= 1;
            if state.count == 0 {
                // Drop accumulated rounding error.
                *state = StatsSnapshot::default();
            }
        }
    }
}

struct Background {
    sender: mpsc::UnboundedSender<Update>,
    pending: Arc<AtomicU64>,
    idle: Arc<Notify>,
}

/// Per-peer split-point estimator.
pub struct StatsRecorder {
    aggregator: Arc<Aggregator>,
    background: Option<Background>,
}

impl StatsRecorder {
    /// Background workers need a tokio runtime. Without one the recorder
    /// falls back to synchronous updates.
    pub fn new(config: &StatsConfig, mapper: SemanticMapper) -> Self {
        let aggregator = Arc::new(Aggregator {
            kind: config.kind,
            mapper,
            state: Mutex::new(StatsSnapshot::default()),
        });
        let background = match (config.background_threads, tokio::runtime::Handle::try_current()) {
            (0, _) => None,
            (threads, Ok(handle)) => Some(spawn_workers(&handle, threads, Arc::clone(&aggregator))),
            (threads, Err(_)) => {
                warn!(threads, "no tokio runtime, statistics are updated synchronously");
                None
            }
        };
        Self { aggregator, background }
    }

    pub fn kind(&self) -> StatsKind {
        self.aggregator.kind
    }

    pub fn register(&self, quad: &Quadruple) {
        self.submit(Update::Register(quad.clone()));
    }

    pub fn unregister(&self, quad: &Quadruple) {
        self.submit(Update::Unregister(quad.clone()));
    }

    fn submit(&self, update: Update) {
        let Some(background) = &self.background else {
            self.aggregator.apply(&update);
            return;
        };
        background.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(mpsc::error::SendError(update)) = background.sender.send(update) {
            self.aggregator.apply(&update);
            finish_one(&background.pending, &background.idle);
        }
    }

    /// Waits until every queued update has been applied.
    pub async fn sync(&self) {
        let Some(background) = &self.background else {
            return;
        };
        loop {
            let mut notified = pin!(background.idle.notified());
            notified.as_mut().enable();
            let pending = background.pending.load(Ordering::Acquire);
            if pending == 0 {
                return;
            }
            debug!(pending, "waiting for statistics workers");
            notified.await;
        }
    }

    /// Split element for `dim`, `None` while nothing is recorded.
    pub fn estimate_split(&self, dim: usize) -> Result<Option<Element>> {
        if dim >= SEMANTIC_DIMENSIONS {
            return Err(Error::InvalidDimension { dim, dimensions: SEMANTIC_DIMENSIONS });
        }
        let state = self.aggregator.state.lock();
        if state.count == 0 || state.weights[dim] <= 0.0 {
            return Ok(None);
        }
        let value = state.sums[dim] / state.weights[dim];
        let kind = self.aggregator.mapper.kinds()[dim];
        Ok(Some(Element::from_f64(kind, value)))
    }

    pub fn reset(&self) {
        *self.aggregator.state.lock() = StatsSnapshot::default();
    }

    /// Number of quadruples recorded.
    pub fn len(&self) -> u64 {
        self.aggregator.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.aggregator.state.lock().clone()
    }
}

fn spawn_workers(handle: &tokio::runtime::Handle, threads: usize, aggregator: Arc<Aggregator>) -> Background {
    let (sender, receiver) = mpsc::unbounded_channel::<Update>();
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    let pending = Arc::new(AtomicU64::new(0));
    let idle = Arc::new(Notify::new());

    for worker in 0..threads {
        let receiver = Arc::clone(&receiver);
        let aggregator = Arc::clone(&aggregator);
        let pending = Arc::clone(&pending);
        let idle = Arc::clone(&idle);
        handle.spawn(async move {
            loop {
                // Applied under the receiver lock so updates land in queue order.
                let mut queue = receiver.lock().await;
                let Some(update) = queue.recv().await else {
                    break;
                };
                aggregator.apply(&update);
                drop(queue);
                finish_one(&pending, &idle);
            }
            debug!(worker, "statistics worker stopped");
        });
    }
    Background { sender, pending, idle }
}

fn finish_one(pending: &AtomicU64, idle: &Notify) {
    if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
        idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ElementKind;
    use crate::model::Term;

    fn quad(s: &str, o: &str) -> Quadruple {
        Quadruple::new(Term::iri("urn:g"), Term::iri(s), Term::iri("urn:p"), Term::literal(o))
    }

    fn recorder(kind: StatsKind, background_threads: usize) -> StatsRecorder {
        StatsRecorder::new(&StatsConfig { kind, background_threads }, SemanticMapper::default())
    }

    #[test]
    fn test_register_unregister_inverse() {
        let stats = recorder(StatsKind::Centroid, 0);
        stats.register(&quad("urn:a", "x"));
        let before = stats.snapshot();
        stats.register(&quad("urn:zzz", "hello"));
        stats.unregister(&quad("urn:zzz", "hello"));
        let after = stats.snapshot();
        assert_eq!(before.count, after.count);
        for dim in 0..SEMANTIC_DIMENSIONS {
            assert!((before.sums[dim] - after.sums[dim]).abs() < 1e-9);
            assert!((before.weights[dim] - after.weights[dim]).abs() < 1e-9);
        }
        stats.unregister(&quad("urn:a", "x"));
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_mean_estimate_lies_between_values() {
        let stats = recorder(StatsKind::Mean, 0);
        assert_eq!(stats.estimate_split(1).unwrap(), None);
        stats.register(&quad("b", "x"));
        stats.register(&quad("d", "x"));
        let estimate = stats.estimate_split(1).unwrap().unwrap();
        assert_eq!(estimate.kind(), ElementKind::String);
        assert!(Element::string("b") < estimate && estimate < Element::string("d"));
    }

    #[test]
    fn test_invalid_dimension() {
        let stats = recorder(StatsKind::Mean, 0);
        assert!(matches!(
            stats.estimate_split(4),
            Err(Error::InvalidDimension { dim: 4, dimensions: 4 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_sync() {
        let stats = recorder(StatsKind::Mean, 3);
        for i in 0..100 {
            stats.register(&quad(&format!("urn:s{i}"), "o"));
        }
        stats.sync().await;
        assert_eq!(stats.len(), 100);
        stats.reset();
        assert!(stats.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_background_unregister_inverts_register() {
        let stats = recorder(StatsKind::Centroid, 4);
        for round in 0..200 {
            for i in 0..50 {
                let q = quad(&format!("urn:s{round}-{i}"), "o");
                stats.register(&q);
                stats.unregister(&q);
            }
            stats.sync().await;
            assert_eq!(stats.len(), 0, "round {round}");
            assert_eq!(stats.snapshot(), StatsSnapshot::default(), "round {round}");
        }
    }
}
