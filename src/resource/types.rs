//! core identifiers shared between the coordinator and resource drivers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a resource factory (a data source, a message broker, ...).
///
/// The coordinator binds at most one physical transaction per key in a
/// [`TransactionContext`](crate::transaction::TransactionContext).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A resource held by a driver on behalf of one physical transaction
/// (typically an open connection with a started transaction).
///
/// The number is allocated by the driver and is meaningless to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// Driver-native savepoint identifier, valid only on the handle that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SavepointToken(u64);

impl SavepointToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SavepointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SAVEPOINT_{}", self.0)
    }
}

/// The driver operations, used for diagnostics and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    Acquire,
    Release,
    Commit,
    Rollback,
    CreateSavepoint,
    RollbackToSavepoint,
    ReleaseSavepoint,
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverOp::Acquire => "acquire",
            DriverOp::Release => "release",
            DriverOp::Commit => "commit",
            DriverOp::Rollback => "rollback",
            DriverOp::CreateSavepoint => "create savepoint",
            DriverOp::RollbackToSavepoint => "rollback to savepoint",
            DriverOp::ReleaseSavepoint => "release savepoint",
        };
        f.write_str(name)
    }
}
