//! Savepoint stack of one physical transaction.
//!
//! Markers are handed out in creation order and must be given back in reverse
//! order. Out-of-order use fails before the driver is touched.

use tracing::debug;

use crate::resource::{DriverError, ResourceDriver, ResourceHandle, SavepointToken};
use crate::transaction::context::PhysicalTxId;
use crate::transaction::error::{TransactionError, TransactionResult};

/// Opaque partial-rollback point, valid only against the physical
/// transaction that created it and only until rolled back to or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SavepointMarker {
    owner: PhysicalTxId,
    seq: u64,
    token: SavepointToken,
}

impl SavepointMarker {
    /// The physical transaction this marker belongs to.
    pub fn owner(&self) -> PhysicalTxId {
        self.owner
    }
}

/// Strict stack of markers over a resource's native savepoints.
#[derive(Debug)]
pub struct SavepointManager {
    owner: PhysicalTxId,
    next_seq: u64,
    stack: Vec<SavepointMarker>,
}

impl SavepointManager {
    pub fn new(owner: PhysicalTxId) -> Self {
        Self {
            owner,
            next_seq: 0,
            stack: Vec::new(),
        }
    }

    /// Number of live markers.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_live(&self, marker: &SavepointMarker) -> bool {
        self.stack.contains(marker)
    }

    /// Whether `marker` is the most recent live savepoint.
    pub fn is_top(&self, marker: &SavepointMarker) -> bool {
        self.stack.last() == Some(marker)
    }

    /// Create a savepoint on `handle` and push its marker.
    ///
    /// `rollback_only` is the physical transaction's flag: a doomed
    /// transaction does not get new savepoints.
    pub fn create(
        &mut self,
        driver: &dyn ResourceDriver,
        handle: ResourceHandle,
        rollback_only: bool,
    ) -> TransactionResult<SavepointMarker> {
        if !driver.supports_savepoints(handle) {
            return Err(TransactionError::NestedTransactionNotSupported(format!(
                "resource {} of {} does not support savepoints",
                handle,
                driver.key()
            )));
        }
        if rollback_only {
            return Err(TransactionError::NestedTransactionNotSupported(
                "cannot create a savepoint in a transaction marked rollback-only".to_string(),
            ));
        }

        let token = driver.create_savepoint(handle).map_err(|err| match err {
            DriverError::Unsupported(_) => {
                TransactionError::NestedTransactionNotSupported(err.to_string())
            }
            other => TransactionError::driver("could not create savepoint", other),
        })?;

        self.next_seq += 1;
        let marker = SavepointMarker {
            owner: self.owner,
            seq: self.next_seq,
            token,
        };
        self.stack.push(marker);
        debug!(depth = self.stack.len(), savepoint = %token, "created savepoint");
        Ok(marker)
    }

    /// Roll back to `marker` and release it. The marker is invalid afterwards
    /// even if the driver fails.
    pub fn rollback_to(
        &mut self,
        driver: &dyn ResourceDriver,
        handle: ResourceHandle,
        marker: &SavepointMarker,
    ) -> TransactionResult<()> {
        self.pop_top(marker)?;
        debug!(depth = self.stack.len(), savepoint = %marker.token, "rolling back to savepoint");

        driver
            .rollback_to_savepoint(handle, marker.token)
            .map_err(|err| TransactionError::driver("could not roll back to savepoint", err))?;
        driver
            .release_savepoint(handle, marker.token)
            .map_err(|err| TransactionError::driver("could not release savepoint", err))
    }

    /// Release `marker`, keeping the work done since it was created.
    pub fn release(
        &mut self,
        driver: &dyn ResourceDriver,
        handle: ResourceHandle,
        marker: &SavepointMarker,
    ) -> TransactionResult<()> {
        self.pop_top(marker)?;
        debug!(depth = self.stack.len(), savepoint = %marker.token, "releasing savepoint");

        driver
            .release_savepoint(handle, marker.token)
            .map_err(|err| TransactionError::driver("could not release savepoint", err))
    }

    fn pop_top(&mut self, marker: &SavepointMarker) -> TransactionResult<()> {
        if marker.owner() != self.owner {
            return Err(TransactionError::illegal_state(format!(
                "savepoint belongs to physical transaction {}, not {}",
                marker.owner(), self.owner
            )));
        }
        match self.stack.last() {
            Some(top) if top == marker => {
                self.stack.pop();
                Ok(())
            }
            Some(_) if self.is_live(marker) => Err(TransactionError::illegal_state(
                "savepoint is not the most recent one; complete inner savepoints first",
            )),
            _ => Err(TransactionError::illegal_state(
                "savepoint was already rolled back or released",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{DriverOp, InMemoryDriver};
    use crate::transaction::IsolationLevel;

    fn setup() -> (InMemoryDriver, ResourceHandle, SavepointManager) {
        let driver = InMemoryDriver::new("db");
        let handle = driver.acquire(IsolationLevel::Default, false, None).unwrap();
        (driver, handle, SavepointManager::new(PhysicalTxId::new(1)))
    }

    #[test]
    fn test_rollback_to_discards_inner_work() {
        let (driver, handle, mut savepoints) = setup();

        driver.execute(handle, "before").unwrap();
        let marker = savepoints.create(&driver, handle, false).unwrap();
        driver.execute(handle, "inside").unwrap();
        savepoints.rollback_to(&driver, handle, &marker).unwrap();

        assert_eq!(driver.pending(handle), vec!["before".to_string()]);
        assert_eq!(savepoints.depth(), 0);
        assert!(!savepoints.is_live(&marker));
    }

    #[test]
    fn test_out_of_order_release_fails_fast() {
        let (driver, handle, mut savepoints) = setup();

        let outer = savepoints.create(&driver, handle, false).unwrap();
        let inner = savepoints.create(&driver, handle, false).unwrap();

        let err = savepoints.release(&driver, handle, &outer).unwrap_err();
        assert!(matches!(err, TransactionError::IllegalTransactionState(_)));
        assert_eq!(driver.count(DriverOp::ReleaseSavepoint), 0);

        savepoints.release(&driver, handle, &inner).unwrap();
        savepoints.release(&driver, handle, &outer).unwrap();
        assert_eq!(savepoints.depth(), 0);
    }

    #[test]
    fn test_marker_is_single_use() {
        let (driver, handle, mut savepoints) = setup();

        let marker = savepoints.create(&driver, handle, false).unwrap();
        savepoints.release(&driver, handle, &marker).unwrap();

        assert!(savepoints.rollback_to(&driver, handle, &marker).is_err());
        assert_eq!(driver.count(DriverOp::RollbackToSavepoint), 0);
    }

    #[test]
    fn test_marker_from_other_transaction_rejected() {
        let (driver, handle, mut savepoints) = setup();
        let mut other = SavepointManager::new(PhysicalTxId::new(2));

        let foreign = other.create(&driver, handle, false).unwrap();
        assert_eq!(foreign.owner(), PhysicalTxId::new(2));
        assert!(savepoints.release(&driver, handle, &foreign).is_err());
    }

    #[test]
    fn test_create_rejected_when_unsupported_or_doomed() {
        let (driver, handle, mut savepoints) = setup();

        let err = savepoints.create(&driver, handle, true).unwrap_err();
        assert!(matches!(err, TransactionError::NestedTransactionNotSupported(_)));

        driver.set_supports_savepoints(false);
        let err = savepoints.create(&driver, handle, false).unwrap_err();
        assert!(matches!(err, TransactionError::NestedTransactionNotSupported(_)));
        assert_eq!(driver.count(DriverOp::CreateSavepoint), 0);
    }
}
