//! In-memory dataset.
//!
//! This is the reference implementation of `Dataset`.
//! It keeps quadruples in an ordered set protected by RwLock.
//!
//! ## Semantics
//!
//! - **Buffered writes**: adds and deletes are recorded in the transaction
//!   and applied atomically on `commit()`. `abort()` simply drops them.
//! - **Read your writes**: `find()` on a write transaction sees its own
//!   buffered changes on top of the committed state.
//! - **No isolation between writers**: two write transactions committing
//!   concurrently are applied in commit order, last writer wins.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::model::{Quadruple, QuadruplePattern};
use crate::tx::{Transaction, TxId, TxMode, TxState};
use crate::Result;
use super::Dataset;

// ============================================================================
// MemoryDataset
// ============================================================================

/// In-memory quadruple store.
#[derive(Clone, Default)]
pub struct MemoryDataset {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    quads: RwLock<BTreeSet<Quadruple>>,
    next_tx_id: AtomicU64,
}

impl MemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

#[derive(Debug, Clone)]
enum PendingWrite {
    Add(Quadruple),
    Delete(QuadruplePattern),
}

/// In-memory transaction with a write buffer.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    state: TxState,
    pending: Vec<PendingWrite>,
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
    fn state(&self) -> TxState { self.state }
}

impl MemoryTx {
    /// Replays the buffer over a snapshot of the committed state.
    fn view(&self, committed: &BTreeSet<Quadruple>) -> BTreeSet<Quadruple> {
        let mut view = committed.clone();
        for write in &self.pending {
            match write {
                PendingWrite::Add(q) => {
                    view.insert(q.clone());
                }
                PendingWrite::Delete(p) => view.retain(|q| !p.matches(q)),
            }
        }
        view
    }
}

// ============================================================================
// Dataset impl
// ============================================================================

#[async_trait]
impl Dataset for MemoryDataset {
    type Tx = MemoryTx;

    async fn begin(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed) + 1);
        Ok(MemoryTx { id, mode, state: TxState::Active, pending: Vec::new() })
    }

    async fn commit(&self, tx: &mut MemoryTx) -> Result<()> {
        tx.ensure_active()?;
        if !tx.pending.is_empty() {
            let mut quads = self.inner.quads.write();
            for write in tx.pending.drain(..) {
                match write {
                    PendingWrite::Add(q) => {
                        quads.insert(q);
                    }
                    PendingWrite::Delete(p) => quads.retain(|q| !p.matches(q)),
                }
            }
        }
        tx.state = TxState::Committed;
        Ok(())
    }

    async fn abort(&self, tx: &mut MemoryTx) -> Result<()> {
        tx.ensure_active()?;
        tx.pending.clear();
        tx.state = TxState::Aborted;
        Ok(())
    }

    async fn end(&self, mut tx: MemoryTx) -> Result<()> {
        if tx.state == TxState::Active {
            tx.pending.clear();
            tx.state = TxState::Aborted;
        }
        Ok(())
    }

    async fn add(&self, tx: &mut MemoryTx, quad: Quadruple) -> Result<()> {
        tx.ensure_writable()?;
        tx.pending.push(PendingWrite::Add(quad));
        Ok(())
    }

    async fn delete(&self, tx: &mut MemoryTx, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>> {
        tx.ensure_writable()?;
        let doomed: Vec<Quadruple> = {
            let committed = self.inner.quads.read();
            tx.view(&committed).into_iter().filter(|q| pattern.matches(q)).collect()
        };
        tx.pending.push(PendingWrite::Delete(pattern.clone()));
        Ok(doomed)
    }

    async fn find(&self, tx: &MemoryTx, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>> {
        tx.ensure_active()?;
        let committed = self.inner.quads.read();
        if tx.pending.is_empty() {
            return Ok(committed.iter().filter(|q| pattern.matches(q)).cloned().collect());
        }
        Ok(tx.view(&committed).into_iter().filter(|q| pattern.matches(q)).collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.quads.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Term;
    use crate::Error;

    fn quad(s: &str) -> Quadruple {
        Quadruple::new(Term::iri("urn:g"), Term::iri(s), Term::iri("urn:p"), Term::literal("o"))
    }

    #[tokio::test]
    async fn test_add_commit_find() {
        let ds = MemoryDataset::new();
        let mut tx = ds.begin(TxMode::Write).await.unwrap();
        ds.add(&mut tx, quad("urn:a")).await.unwrap();
        ds.add(&mut tx, quad("urn:b")).await.unwrap();

        // Own writes are visible before commit, others' are not.
        assert_eq!(ds.find(&tx, &QuadruplePattern::ANY).await.unwrap().len(), 2);
        assert_eq!(ds.len().await.unwrap(), 0);

        ds.commit(&mut tx).await.unwrap();
        ds.end(tx).await.unwrap();
        assert_eq!(ds.len().await.unwrap(), 2);
        assert!(ds.find_all(&QuadruplePattern::from(&quad("urn:a"))).await.unwrap().len() == 1);
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let ds = MemoryDataset::new();
        let mut tx = ds.begin(TxMode::Write).await.unwrap();
        ds.add(&mut tx, quad("urn:a")).await.unwrap();
        ds.abort(&mut tx).await.unwrap();
        ds.end(tx).await.unwrap();
        assert_eq!(ds.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_end_without_commit_aborts() {
        let ds = MemoryDataset::new();
        let mut tx = ds.begin(TxMode::Write).await.unwrap();
        ds.add(&mut tx, quad("urn:a")).await.unwrap();
        ds.end(tx).await.unwrap();
        assert_eq!(ds.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_double_commit_is_state_error() {
        let ds = MemoryDataset::new();
        let mut tx = ds.begin(TxMode::Write).await.unwrap();
        ds.commit(&mut tx).await.unwrap();
        let err = ds.commit(&mut tx).await.unwrap_err();
        assert!(matches!(err, Error::TxError(_)));
        let err = ds.add(&mut tx, quad("urn:a")).await.unwrap_err();
        assert!(matches!(err, Error::TxError(_)));
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let ds = MemoryDataset::new();
        let mut tx = ds.begin(TxMode::ReadOnly).await.unwrap();
        assert!(matches!(ds.add(&mut tx, quad("urn:a")).await, Err(Error::TxError(_))));
        assert!(matches!(ds.delete(&mut tx, &QuadruplePattern::ANY).await, Err(Error::TxError(_))));
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let ds = MemoryDataset::new();
        ds.add_all(vec![quad("urn:a"), quad("urn:b")]).await.unwrap();
        let pattern = QuadruplePattern::new(None, Some(Term::iri("urn:a")), None, None);
        let deleted = ds.delete_all(&pattern).await.unwrap();
        assert_eq!(deleted, vec![quad("urn:a")]);
        assert_eq!(ds.len().await.unwrap(), 1);
        assert!(!ds.contains(&ds.begin(TxMode::ReadOnly).await.unwrap(), &quad("urn:a")).await.unwrap());
    }
}
