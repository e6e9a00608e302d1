//! Cancellable transactions over the entity store
//!
//! A transaction makes one resolver run atomic and abortable: every store
//! query suspends through [`Txn::suspend`], and the store re-checks the
//! cancel flag under its write lock before applying any write. A cancelled
//! transaction therefore never leaves observable writes behind, and a
//! cancelled run resolves to [`TxOutcome::Cancelled`] rather than an error.

use crate::StoreError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Why a transaction body stopped early.
///
/// `Cancelled` is expected control flow, not a failure; `Failed` wraps a
/// real store error that should abort the cycle.
#[derive(Debug)]
pub enum TxnInterrupt {
    /// The transaction was cancelled by a newer viewport update.
    Cancelled,
    /// A store operation failed; the cycle is skipped and retried on the
    /// next viewport event.
    Failed(StoreError),
}

impl From<StoreError> for TxnInterrupt {
    fn from(err: StoreError) -> Self {
        Self::Failed(err)
    }
}

/// Result type used by store operations running inside a transaction.
pub type TxnResult<T> = std::result::Result<T, TxnInterrupt>;

/// Final outcome of a transactional unit of work.
#[derive(Debug, PartialEq, Eq)]
pub enum TxOutcome<T> {
    /// The body ran to completion and its writes were applied.
    Committed(T),
    /// The transaction was cancelled before commit; no writes were applied.
    Cancelled,
}

impl<T> TxOutcome<T> {
    /// Returns `true` for the cancelled outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A cancellable unit of read/write work against the store.
///
/// Held by the transaction body; the matching [`CancelHandle`] stays with
/// whoever may supersede the work.
#[derive(Debug)]
pub struct Txn {
    cancelled: Arc<AtomicBool>,
}

/// Synchronous, idempotent cancellation switch for one [`Txn`].
#[derive(Clone, Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl Txn {
    /// Begin a new transaction, returning it with its cancel handle.
    pub fn begin() -> (Self, CancelHandle) {
        let cancelled = Arc::new(AtomicBool::new(false));
        (
            Self {
                cancelled: Arc::clone(&cancelled),
            },
            CancelHandle { cancelled },
        )
    }

    /// Whether the transaction has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fail fast if the transaction has been cancelled.
    pub fn checkpoint(&self) -> TxnResult<()> {
        if self.is_cancelled() {
            Err(TxnInterrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cooperative suspension point: yield to the scheduler, then re-check
    /// the cancel flag. Every store query passes through here, so a
    /// superseded transaction stops at its next query instead of running
    /// to completion.
    pub async fn suspend(&self) -> TxnResult<()> {
        self.checkpoint()?;
        tokio::task::yield_now().await;
        self.checkpoint()
    }

    /// Translate the body's result into a transaction outcome.
    ///
    /// Cancellation folds into [`TxOutcome::Cancelled`]; store failures
    /// propagate as errors so the caller can distinguish a superseded run
    /// from a broken one.
    pub fn conclude<T>(result: TxnResult<T>) -> crate::Result<TxOutcome<T>> {
        match result {
            Ok(value) => Ok(TxOutcome::Committed(value)),
            Err(TxnInterrupt::Cancelled) => Ok(TxOutcome::Cancelled),
            Err(TxnInterrupt::Failed(err)) => Err(err),
        }
    }
}

impl CancelHandle {
    /// Cancel the transaction. Idempotent: cancelling an already-cancelled
    /// or already-committed transaction is a no-op.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            tracing::trace!("transaction cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let (txn, cancel) = Txn::begin();
        assert!(!txn.is_cancelled());
        cancel.cancel();
        cancel.cancel();
        assert!(txn.is_cancelled());
    }

    #[tokio::test]
    async fn test_suspend_stops_cancelled_txn() {
        let (txn, cancel) = Txn::begin();
        assert!(txn.suspend().await.is_ok());
        cancel.cancel();
        assert!(matches!(txn.suspend().await, Err(TxnInterrupt::Cancelled)));
    }

    #[test]
    fn test_conclude_maps_outcomes() {
        let committed = Txn::conclude(Ok(5)).unwrap();
        assert_eq!(committed, TxOutcome::Committed(5));

        let cancelled = Txn::conclude::<u32>(Err(TxnInterrupt::Cancelled)).unwrap();
        assert!(cancelled.is_cancelled());

        let failed = Txn::conclude::<u32>(Err(TxnInterrupt::Failed(
            crate::StoreError::QueryFailed {
                reason: "boom".to_string(),
            },
        )));
        assert!(failed.is_err());
    }
}
