//! The capability contract a resource driver must honor.

use std::time::Duration;

use crate::resource::errors::DriverResult;
use crate::resource::types::{ResourceHandle, ResourceKey, SavepointToken};
use crate::transaction::IsolationLevel;

/// A transactional resource driver (database connection factory, message channel, ...).
///
/// The coordinator never looks inside a [`ResourceHandle`]; it only asks the
/// driver to start, finish and partially roll back the transaction behind it.
/// Every method may block on I/O. Driver-level timeouts should be reported as
/// [`DriverError::Timeout`](crate::resource::DriverError::Timeout).
pub trait ResourceDriver: Send + Sync {
    /// Identity of the resource factory, used as the registry key.
    fn key(&self) -> ResourceKey;

    /// Obtain a resource and start a transaction on it.
    ///
    /// `isolation` is [`IsolationLevel::Default`] when the caller did not ask for
    /// one. `timeout` is advisory and forwarded unchanged.
    fn acquire(
        &self,
        isolation: IsolationLevel,
        read_only: bool,
        timeout: Option<Duration>,
    ) -> DriverResult<ResourceHandle>;

    /// Give the resource back (close it or return it to a pool).
    fn release(&self, handle: ResourceHandle);

    fn commit(&self, handle: ResourceHandle) -> DriverResult<()>;

    fn rollback(&self, handle: ResourceHandle) -> DriverResult<()>;

    /// Whether the resource behind `handle` has native savepoints.
    fn supports_savepoints(&self, handle: ResourceHandle) -> bool;

    fn create_savepoint(&self, handle: ResourceHandle) -> DriverResult<SavepointToken>;

    fn rollback_to_savepoint(
        &self,
        handle: ResourceHandle,
        token: SavepointToken,
    ) -> DriverResult<()>;

    fn release_savepoint(&self, handle: ResourceHandle, token: SavepointToken)
        -> DriverResult<()>;
}
