//! # Local Dataset Trait
//!
//! The contract between a peer and the store holding its share of facts.
//! Everything a peer needs from storage is defined here: transactional
//! add, delete, find and contains over quadruples and quadruple patterns.
//!
//! ## Implementations
//!
//! | Dataset | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryDataset` | `memory` | In-memory, buffered writes applied on commit |

pub mod memory;

use async_trait::async_trait;

use crate::model::{Quadruple, QuadruplePattern};
use crate::tx::{Transaction, TxMode};
use crate::Result;

pub use memory::{MemoryDataset, MemoryTx};

// ============================================================================
// Dataset Trait
// ============================================================================

/// The local dataset contract.
///
/// Operations on a transaction that has been committed or aborted fail with
/// `Error::TxError`, as do writes through a read-only transaction.
#[async_trait]
pub trait Dataset: Send + Sync + 'static {
    /// The transaction type for this dataset.
    type Tx: Transaction;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    async fn begin(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Make the transaction's writes visible. The transaction stays open
    /// for `end` but accepts no further operations.
    async fn commit(&self, tx: &mut Self::Tx) -> Result<()>;

    /// Discard the transaction's writes.
    async fn abort(&self, tx: &mut Self::Tx) -> Result<()>;

    /// Release the transaction. An active transaction is aborted.
    async fn end(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Quadruples
    // ========================================================================

    /// Add a quadruple. Adding an existing quadruple is a no-op.
    async fn add(&self, tx: &mut Self::Tx, quad: Quadruple) -> Result<()>;

    /// Delete every quadruple matching the pattern. Returns the deleted quadruples.
    async fn delete(&self, tx: &mut Self::Tx, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>>;

    /// Quadruples matching the pattern, including the transaction's own writes.
    async fn find(&self, tx: &Self::Tx, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>>;

    async fn contains(&self, tx: &Self::Tx, quad: &Quadruple) -> Result<bool> {
        let found = self.find(tx, &QuadruplePattern::from(quad)).await?;
        Ok(!found.is_empty())
    }

    /// Number of committed quadruples.
    async fn len(&self) -> Result<usize>;

    // ========================================================================
    // Convenience
    // ========================================================================

    /// Add quadruples in one write transaction.
    async fn add_all(&self, quads: Vec<Quadruple>) -> Result<()> {
        let mut tx = self.begin(TxMode::Write).await?;
        for quad in quads {
            if let Err(e) = self.add(&mut tx, quad).await {
                self.end(tx).await?;
                return Err(e);
            }
        }
        self.commit(&mut tx).await?;
        self.end(tx).await
    }

    /// Delete matching quadruples in one write transaction.
    async fn delete_all(&self, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>> {
        let mut tx = self.begin(TxMode::Write).await?;
        let deleted = match self.delete(&mut tx, pattern).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.end(tx).await?;
                return Err(e);
            }
        };
        self.commit(&mut tx).await?;
        self.end(tx).await?;
        Ok(deleted)
    }

    /// Find in a read-only transaction.
    async fn find_all(&self, pattern: &QuadruplePattern) -> Result<Vec<Quadruple>> {
        let tx = self.begin(TxMode::ReadOnly).await?;
        let found = self.find(&tx, pattern).await;
        self.end(tx).await?;
        found
    }
}
