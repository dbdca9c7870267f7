//! Handle identifying one logical scope.

use ulid::Ulid;

use crate::transaction::context::{LogicalScope, ScopeId};
use crate::transaction::definition::Propagation;

/// Returned by [`TransactionManager::begin`](crate::transaction::TransactionManager::begin)
/// and handed back to `commit` or `rollback`.
///
/// The handle only carries what was decided at `begin`. Mutable state such
/// as the rollback-only flags lives in the
/// [`TransactionContext`](crate::transaction::TransactionContext) and is
/// queried through the manager. A status is tied to the context that created
/// it and is not `Clone`.
#[derive(Debug)]
pub struct TransactionStatus {
    context: Ulid,
    scope: ScopeId,
    propagation: Propagation,
    new_transaction: bool,
    has_transaction: bool,
    has_savepoint: bool,
    read_only: bool,
    name: Option<String>,
}

impl TransactionStatus {
    pub(crate) fn new(context: Ulid, scope: ScopeId, logical: &LogicalScope) -> Self {
        Self {
            context,
            scope,
            propagation: logical.propagation,
            new_transaction: logical.new_physical,
            has_transaction: logical.physical.is_some(),
            has_savepoint: logical.savepoint.is_some(),
            read_only: logical.read_only,
            name: logical.name.clone(),
        }
    }

    pub(crate) fn context_id(&self) -> Ulid {
        self.context
    }

    pub(crate) fn scope_id(&self) -> ScopeId {
        self.scope
    }

    /// Whether this scope started its own physical transaction.
    pub fn is_new_transaction(&self) -> bool {
        self.new_transaction
    }

    /// Whether this scope runs inside a physical transaction at all.
    pub fn has_transaction(&self) -> bool {
        self.has_transaction
    }

    /// Whether this scope is a NESTED scope backed by a savepoint.
    pub fn has_savepoint(&self) -> bool {
        self.has_savepoint
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
