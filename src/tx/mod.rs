//! Transaction management for local datasets.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    Write,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

/// Lifecycle of a transaction. Only `Active` transactions accept operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Transaction trait that all datasets must implement.
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;
    fn state(&self) -> TxState;

    /// Fails with a state error unless the transaction is still active.
    fn ensure_active(&self) -> Result<()> {
        match self.state() {
            TxState::Active => Ok(()),
            state => Err(Error::TxError(format!(
                "transaction {} is {:?}, no further operation is allowed",
                self.id().0,
                state
            ))),
        }
    }

    /// Fails with a state error unless the transaction is active and writable.
    fn ensure_writable(&self) -> Result<()> {
        self.ensure_active()?;
        if self.mode() == TxMode::ReadOnly {
            return Err(Error::TxError(format!(
                "transaction {} is read-only",
                self.id().0
            )));
        }
        Ok(())
    }
}
