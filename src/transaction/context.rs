//! Per-call-chain transaction context.
//!
//! A [`TransactionContext`] is the explicit replacement for ambient
//! per-thread state: it owns the resource bindings, the physical
//! transactions and the open logical scopes of one logical call chain. Every
//! manager entry point takes it as `&mut`, so a chain that hops between
//! threads or tasks carries its transactional state along with it.
//!
//! Physical transactions live in an arena keyed by [`PhysicalTxId`]. Scopes
//! refer to them by id, and only the manager mutates them.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::resource::{ResourceHandle, ResourceKey, ResourceRegistry, SuspendedResources};
use crate::transaction::definition::Propagation;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::IsolationLevel;
use crate::transaction::savepoint::{SavepointManager, SavepointMarker};
use crate::transaction::status::TransactionStatus;
use crate::transaction::synchronization::SynchronizationRegistry;

/// Arena index of a physical transaction inside one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysicalTxId(u64);

impl PhysicalTxId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PhysicalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ptx#{}", self.0)
    }
}

/// Identity of a logical scope inside one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ScopeId(u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// One underlying resource transaction.
#[derive(Debug)]
pub(crate) struct PhysicalTransaction {
    pub(crate) tx_id: Ulid,
    pub(crate) key: ResourceKey,
    pub(crate) handle: ResourceHandle,
    pub(crate) isolation: IsolationLevel,
    pub(crate) read_only: bool,
    pub(crate) rollback_only: bool,
    pub(crate) savepoints: SavepointManager,
    pub(crate) synchronizations: SynchronizationRegistry,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) timeout_secs: Option<u64>,
    pub(crate) name: Option<String>,
}

impl PhysicalTransaction {
    /// Once set, stays set until the transaction completes.
    pub(crate) fn mark_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    pub(crate) fn info(&self) -> TransactionInfo {
        TransactionInfo {
            tx_id: self.tx_id.to_string().to_lowercase(),
            key: self.key.clone(),
            isolation: self.isolation,
            read_only: self.read_only,
            rollback_only: self.rollback_only,
            savepoint_depth: self.savepoints.depth(),
            synchronizations: self.synchronizations.len(),
            started_at: self.started_at,
            timeout_secs: self.timeout_secs,
            name: self.name.clone(),
        }
    }
}

/// One begin / complete pair as seen by a single caller.
#[derive(Debug)]
pub(crate) struct LogicalScope {
    pub(crate) key: ResourceKey,
    pub(crate) propagation: Propagation,
    /// `None` for scopes running without a transaction.
    pub(crate) physical: Option<PhysicalTxId>,
    pub(crate) new_physical: bool,
    pub(crate) savepoint: Option<SavepointMarker>,
    /// Set only when this scope suspended an outer binding.
    pub(crate) suspended: Option<SuspendedResources<PhysicalTxId>>,
    pub(crate) local_rollback_only: bool,
    pub(crate) read_only: bool,
    pub(crate) name: Option<String>,
}

/// Diagnostic snapshot of an active physical transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionInfo {
    /// Unique transaction ID.
    pub tx_id: String,
    /// Resource factory holding the transaction.
    pub key: ResourceKey,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub rollback_only: bool,
    /// Live savepoints on the transaction.
    pub savepoint_depth: usize,
    /// Registered synchronization callbacks.
    pub synchronizations: usize,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
    pub timeout_secs: Option<u64>,
    pub name: Option<String>,
}

impl TransactionInfo {
    /// The instant the forwarded timeout runs out, if one was configured.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.timeout_secs?).ok()?;
        self.started_at
            .checked_add_signed(chrono::Duration::seconds(secs))
    }
}

/// Transactional state of one logical call chain.
#[derive(Debug)]
pub struct TransactionContext {
    id: Ulid,
    registry: ResourceRegistry<PhysicalTxId>,
    physical: HashMap<PhysicalTxId, PhysicalTransaction>,
    scopes: HashMap<ScopeId, LogicalScope>,
    next_physical: u64,
    next_scope: u64,
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            id: Ulid::new(),
            registry: ResourceRegistry::new(),
            physical: HashMap::new(),
            scopes: HashMap::new(),
            next_physical: 0,
            next_scope: 0,
        }
    }

    /// Get the context ID.
    pub fn id(&self) -> String {
        self.id.to_string().to_lowercase()
    }

    /// Whether a physical transaction is bound for `key`.
    pub fn is_transaction_active(&self, key: &ResourceKey) -> bool {
        self.registry.has(key)
    }

    /// Keys with a bound physical transaction, sorted.
    pub fn bound_keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.registry.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of the physical transaction bound for `key`.
    pub fn transaction_info(&self, key: &ResourceKey) -> Option<TransactionInfo> {
        self.bound_transaction(key).map(PhysicalTransaction::info)
    }

    /// Number of scopes begun and not yet completed.
    pub fn open_scopes(&self) -> usize {
        self.scopes.len()
    }

    /// Number of physical transactions held, bound or suspended.
    pub fn physical_transactions(&self) -> usize {
        self.physical.len()
    }

    // ==================== Crate-internal state access ====================

    pub(crate) fn registry_mut(&mut self) -> &mut ResourceRegistry<PhysicalTxId> {
        &mut self.registry
    }

    pub(crate) fn bound(&self, key: &ResourceKey) -> Option<PhysicalTxId> {
        self.registry.lookup(key).copied()
    }

    pub(crate) fn bound_transaction(&self, key: &ResourceKey) -> Option<&PhysicalTransaction> {
        self.bound(key).and_then(|id| self.physical.get(&id))
    }

    pub(crate) fn bound_transaction_mut(
        &mut self,
        key: &ResourceKey,
    ) -> Option<&mut PhysicalTransaction> {
        let id = self.bound(key)?;
        self.physical.get_mut(&id)
    }

    pub(crate) fn physical(&self, id: PhysicalTxId) -> Option<&PhysicalTransaction> {
        self.physical.get(&id)
    }

    pub(crate) fn physical_mut(&mut self, id: PhysicalTxId) -> Option<&mut PhysicalTransaction> {
        self.physical.get_mut(&id)
    }

    pub(crate) fn insert_physical(
        &mut self,
        build: impl FnOnce(PhysicalTxId) -> PhysicalTransaction,
    ) -> PhysicalTxId {
        self.next_physical += 1;
        let id = PhysicalTxId::new(self.next_physical);
        self.physical.insert(id, build(id));
        id
    }

    pub(crate) fn remove_physical(&mut self, id: PhysicalTxId) -> Option<PhysicalTransaction> {
        self.physical.remove(&id)
    }

    pub(crate) fn open_scope(&mut self, scope: LogicalScope) -> TransactionStatus {
        self.next_scope += 1;
        let id = ScopeId(self.next_scope);
        let status = TransactionStatus::new(self.id, id, &scope);
        self.scopes.insert(id, scope);
        status
    }

    /// The open scope behind `status`.
    ///
    /// Scope ids are never reused, so an id this context handed out that is no
    /// longer open belongs to a completed scope.
    pub(crate) fn scope(&self, status: &TransactionStatus) -> TransactionResult<&LogicalScope> {
        self.check_owner(status)?;
        self.scopes.get(&status.scope_id()).ok_or_else(completed_error)
    }

    pub(crate) fn scope_mut(
        &mut self,
        status: &TransactionStatus,
    ) -> TransactionResult<&mut LogicalScope> {
        self.check_owner(status)?;
        self.scopes.get_mut(&status.scope_id()).ok_or_else(completed_error)
    }

    pub(crate) fn remove_scope(&mut self, status: &TransactionStatus) -> TransactionResult<LogicalScope> {
        self.check_owner(status)?;
        self.scopes.remove(&status.scope_id()).ok_or_else(completed_error)
    }

    pub(crate) fn is_scope_open(&self, status: &TransactionStatus) -> bool {
        status.context_id() == self.id && self.scopes.contains_key(&status.scope_id())
    }

    /// Drop every scope and binding for `key` and hand back its physical
    /// transactions, most recently started first.
    pub(crate) fn abandon(&mut self, key: &ResourceKey) -> Vec<PhysicalTransaction> {
        self.scopes.retain(|_, scope| &scope.key != key);
        let _ = self.registry.unbind(key);

        let mut ids: Vec<PhysicalTxId> = self
            .physical
            .iter()
            .filter(|(_, tx)| &tx.key == key)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.into_iter()
            .filter_map(|id| self.physical.remove(&id))
            .collect()
    }

    fn check_owner(&self, status: &TransactionStatus) -> TransactionResult<()> {
        if status.context_id() != self.id {
            return Err(TransactionError::illegal_state(format!(
                "transaction status belongs to context {}, not {}",
                status.context_id().to_string().to_lowercase(),
                self.id()
            )));
        }
        Ok(())
    }
}

fn completed_error() -> TransactionError {
    TransactionError::illegal_state(
        "transaction is already completed - do not call commit or rollback more than once per transaction",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_empty() {
        let ctx = TransactionContext::new();
        assert!(ctx.bound_keys().is_empty());
        assert_eq!(ctx.open_scopes(), 0);
        assert_eq!(ctx.physical_transactions(), 0);
        assert!(!ctx.is_transaction_active(&ResourceKey::new("db")));
    }

    #[test]
    fn test_contexts_have_distinct_ids() {
        assert_ne!(TransactionContext::new().id(), TransactionContext::new().id());
    }

    #[test]
    fn test_deadline() {
        let started_at = Utc::now();
        let info = TransactionInfo {
            tx_id: "tx".to_string(),
            key: ResourceKey::new("db"),
            isolation: IsolationLevel::Default,
            read_only: false,
            rollback_only: false,
            savepoint_depth: 0,
            synchronizations: 0,
            started_at,
            timeout_secs: Some(30),
            name: None,
        };
        assert_eq!(
            info.deadline(),
            Some(started_at + chrono::Duration::seconds(30))
        );

        let unbounded = TransactionInfo {
            timeout_secs: None,
            ..info
        };
        assert_eq!(unbounded.deadline(), None);
    }
}
