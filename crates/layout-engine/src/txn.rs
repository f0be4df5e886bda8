//! Transaction scoping shared by every engine operation.

use layout_core::{LayoutError, LayoutResult, TxStage};
use layout_store::{LayoutStore, LayoutTx, StoreError};
use tracing::{error, trace, warn};

/// Run `body` inside one store transaction and commit it.
///
/// - Lock contention on `begin` surfaces as retryable [`LayoutError::Busy`].
/// - An error from `body` rolls the transaction back and is returned as is.
/// - A failed commit is rolled back explicitly and reported as
///   [`LayoutError::TransactionFailure`]; success is only returned after a
///   verified commit.
/// - A failed rollback is logged as non-recoverable and reported as
///   [`LayoutError::TransactionFailure`] at the rollback stage.
///
/// # Errors
///
/// Returns the body's error or a transaction failure as described above.
pub fn with_transaction<T>(
    store: &dyn LayoutStore,
    operation: &str,
    body: impl FnOnce(&mut dyn LayoutTx) -> LayoutResult<T>,
) -> LayoutResult<T> {
    let mut tx = match store.begin() {
        Ok(tx) => tx,
        Err(StoreError::Busy(reason)) => {
            warn!(operation, backend = store.backend(), %reason, "store busy; caller may retry");
            return Err(LayoutError::Busy { reason });
        }
        Err(err) => {
            error!(operation, backend = store.backend(), error = %err, "transaction begin failed");
            return Err(failure(operation, TxStage::Begin, &err));
        }
    };

    match body(tx.as_mut()) {
        Ok(value) => match tx.commit() {
            Ok(()) => {
                trace!(operation, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                error!(operation, error = %err, "commit failed; rolling back");
                rollback(tx.as_mut(), operation, &err.to_string())?;
                Err(failure(operation, TxStage::Commit, &err))
            }
        },
        Err(cause) => {
            rollback(tx.as_mut(), operation, &cause.to_string())?;
            Err(cause)
        }
    }
}

fn rollback(tx: &mut dyn LayoutTx, operation: &str, cause: &str) -> LayoutResult<()> {
    match tx.rollback() {
        Ok(()) => {
            trace!(operation, cause, "transaction rolled back");
            Ok(())
        }
        Err(err) => {
            error!(
                operation,
                cause,
                error = %err,
                "NON-RECOVERABLE: rollback failed, store state must be inspected"
            );
            Err(LayoutError::TransactionFailure {
                operation: operation.to_string(),
                stage: TxStage::Rollback,
                reason: format!("{err} (while undoing: {cause})"),
            })
        }
    }
}

fn failure(operation: &str, stage: TxStage, err: &StoreError) -> LayoutError {
    LayoutError::TransactionFailure {
        operation: operation.to_string(),
        stage,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use layout_store::{FaultPlan, MemoryLayoutStore};

    use super::*;

    fn counter(store: &MemoryLayoutStore) -> Option<u64> {
        with_transaction(store, "read", |tx| Ok(tx.counter_get("K")?)).unwrap()
    }

    #[test]
    fn commits_on_success() {
        let store = MemoryLayoutStore::default();
        let value = with_transaction(&store, "bump", |tx| Ok(tx.counter_add("K", 2)?)).unwrap();
        assert_eq!(value, 2);
        assert_eq!(counter(&store), Some(2));
    }

    #[test]
    fn body_error_rolls_back() {
        let store = MemoryLayoutStore::default();
        let err = with_transaction(&store, "bump", |tx| {
            tx.counter_add("K", 2)?;
            Err::<(), _>(LayoutError::invalid_input("nope"))
        })
        .unwrap_err();
        assert_eq!(err, LayoutError::invalid_input("nope"));
        assert_eq!(counter(&store), None);
    }

    #[test]
    fn commit_failure_is_a_transaction_failure() {
        let store = MemoryLayoutStore::default();
        store.inject_faults(FaultPlan {
            fail_commit: true,
            ..FaultPlan::default()
        });
        let err = with_transaction(&store, "bump", |tx| Ok(tx.counter_add("K", 1)?)).unwrap_err();
        assert!(matches!(
            err,
            LayoutError::TransactionFailure { stage: TxStage::Commit, .. }
        ));
        assert_eq!(counter(&store), None);
    }

    #[test]
    fn rollback_failure_is_reported_at_rollback_stage() {
        let store = MemoryLayoutStore::default();
        store.inject_faults(FaultPlan {
            fail_rollback: true,
            ..FaultPlan::default()
        });
        let err = with_transaction(&store, "bump", |_| {
            Err::<(), _>(LayoutError::invalid_input("boom"))
        })
        .unwrap_err();
        assert!(err.is_transaction_failure());
        assert!(matches!(
            err,
            LayoutError::TransactionFailure { stage: TxStage::Rollback, .. }
        ));
    }
}
