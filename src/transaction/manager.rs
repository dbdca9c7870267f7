//! Transaction manager - coordinates all transaction operations.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Propagation: join, suspend, nest or refuse at `begin`
//! - The physical transaction lifecycle against the resource driver
//! - Rollback-only bookkeeping shared by cooperating scopes
//! - Synchronization callbacks around completion
//! - Tracking active physical transactions across contexts

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::resource::{ResourceDriver, ResourceHandle, ResourceKey, SuspendedResources};
use crate::transaction::config::TransactionManagerConfig;
use crate::transaction::context::{
    LogicalScope, PhysicalTransaction, PhysicalTxId, TransactionContext, TransactionInfo,
};
use crate::transaction::definition::{Propagation, TransactionDefinition};
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::IsolationLevel;
use crate::transaction::savepoint::{SavepointManager, SavepointMarker};
use crate::transaction::status::TransactionStatus;
use crate::transaction::synchronization::{
    CompletionStatus, SynchronizationRegistry, TransactionSynchronization,
};

/// A physical transaction currently open somewhere, as recorded at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveTransaction {
    pub tx_id: String,
    /// Context the transaction belongs to.
    pub context_id: String,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub started_at: DateTime<Utc>,
    pub name: Option<String>,
}

/// Transaction manager - coordinates all transaction operations.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
/// Per-chain state lives in the [`TransactionContext`] passed to every call.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    driver: Arc<dyn ResourceDriver>,
    key: ResourceKey,
    config: TransactionManagerConfig,
    /// Open physical transactions tracked by ID.
    active: RwLock<HashMap<String, ActiveTransaction>>,
}

impl TransactionManager {
    /// Create a manager with the default configuration.
    pub fn new(driver: impl ResourceDriver + 'static) -> Self {
        Self::with_config(driver, TransactionManagerConfig::default())
    }

    pub fn with_config(driver: impl ResourceDriver + 'static, config: TransactionManagerConfig) -> Self {
        Self::from_arc(Arc::new(driver), config)
    }

    pub fn from_arc(driver: Arc<dyn ResourceDriver>, config: TransactionManagerConfig) -> Self {
        let key = driver.key();
        Self {
            inner: Arc::new(TransactionManagerInner {
                driver,
                key,
                config,
                active: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &TransactionManagerConfig {
        &self.inner.config
    }

    /// The registry key of this manager's resource factory.
    pub fn key(&self) -> &ResourceKey {
        &self.inner.key
    }

    fn driver(&self) -> &dyn ResourceDriver {
        self.inner.driver.as_ref()
    }

    // ==================== Begin ====================

    /// Open a logical scope according to `definition`'s propagation.
    pub fn begin(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
    ) -> TransactionResult<TransactionStatus> {
        let scope = match ctx.bound(&self.inner.key) {
            Some(existing) => self.handle_existing(ctx, definition, existing)?,
            None => self.handle_absent(ctx, definition)?,
        };

        let status = ctx.open_scope(scope);
        debug!(
            propagation = %status.propagation(),
            name = status.name().unwrap_or(""),
            new_transaction = status.is_new_transaction(),
            savepoint = status.has_savepoint(),
            "began logical scope"
        );
        Ok(status)
    }

    fn handle_absent(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
    ) -> TransactionResult<LogicalScope> {
        match definition.propagation() {
            Propagation::Mandatory => Err(TransactionError::illegal_state(
                "no existing transaction found for transaction marked with propagation 'mandatory'",
            )),
            propagation if propagation.creates_when_absent() => {
                let physical = self.start_physical(ctx, definition)?;
                Ok(self.scope(definition, Some(physical), true, None, None))
            }
            _ => {
                let isolation = definition.isolation();
                if isolation.is_specified() {
                    warn!(
                        isolation = %isolation,
                        semantics = isolation.description(),
                        "custom isolation level specified but no actual transaction initiated; \
                         isolation level will effectively be ignored"
                    );
                }
                Ok(self.scope(definition, None, false, None, None))
            }
        }
    }

    fn handle_existing(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
        existing: PhysicalTxId,
    ) -> TransactionResult<LogicalScope> {
        match definition.propagation() {
            Propagation::Never => Err(TransactionError::illegal_state(
                "existing transaction found for transaction marked with propagation 'never'",
            )),
            Propagation::NotSupported => {
                debug!("suspending current transaction");
                let suspended = self.suspend(ctx)?;
                Ok(self.scope(definition, None, false, None, Some(suspended)))
            }
            Propagation::RequiresNew => {
                debug!("suspending current transaction, creating new transaction");
                let suspended = self.suspend(ctx)?;
                match self.start_physical(ctx, definition) {
                    Ok(physical) => {
                        Ok(self.scope(definition, Some(physical), true, None, Some(suspended)))
                    }
                    Err(err) => {
                        if let Err(resume_err) = self.resume(ctx, suspended) {
                            warn!(error = %resume_err, "could not resume suspended transaction after failed begin");
                        }
                        Err(err)
                    }
                }
            }
            Propagation::Nested => {
                if !self.inner.config.nested_transaction_allowed {
                    return Err(TransactionError::NestedTransactionNotSupported(
                        "transaction manager does not allow nested transactions; \
                         enable nested_transaction_allowed"
                            .to_string(),
                    ));
                }
                let driver = self.driver();
                let tx = physical_or_err(ctx.physical_mut(existing))?;
                let (handle, doomed) = (tx.handle, tx.rollback_only);
                debug!(tx_id = %tx.tx_id, "creating nested transaction");
                let marker = tx.savepoints.create(driver, handle, doomed)?;
                Ok(self.scope(definition, Some(existing), false, Some(marker), None))
            }
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {
                let tx = physical_or_err(ctx.physical(existing))?;
                if self.inner.config.validate_existing_transactions {
                    validate_existing(tx, definition)?;
                }
                debug!(tx_id = %tx.tx_id, "participating in existing transaction");
                Ok(self.scope(definition, Some(existing), false, None, None))
            }
        }
    }

    fn scope(
        &self,
        definition: &TransactionDefinition,
        physical: Option<PhysicalTxId>,
        new_physical: bool,
        savepoint: Option<SavepointMarker>,
        suspended: Option<SuspendedResources<PhysicalTxId>>,
    ) -> LogicalScope {
        LogicalScope {
            key: self.inner.key.clone(),
            propagation: definition.propagation(),
            physical,
            new_physical,
            savepoint,
            suspended,
            local_rollback_only: false,
            read_only: definition.is_read_only(),
            name: definition.name().map(str::to_string),
        }
    }

    /// Acquire a resource, record the physical transaction and bind it.
    fn start_physical(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
    ) -> TransactionResult<PhysicalTxId> {
        let timeout_secs = definition
            .timeout_secs()
            .or(self.inner.config.default_timeout_secs);
        let timeout = definition
            .timeout()
            .or_else(|| self.inner.config.default_timeout());
        let handle = self
            .driver()
            .acquire(definition.isolation(), definition.is_read_only(), timeout)
            .map_err(|err| {
                TransactionError::driver(
                    format!("could not open resource for transaction [{}]", definition),
                    err,
                )
            })?;

        let tx_id = Ulid::new();
        let key = self.inner.key.clone();
        let id = ctx.insert_physical(|id| PhysicalTransaction {
            tx_id,
            key: key.clone(),
            handle,
            isolation: definition.isolation(),
            read_only: definition.is_read_only(),
            rollback_only: false,
            savepoints: SavepointManager::new(id),
            synchronizations: SynchronizationRegistry::new(),
            started_at: Utc::now(),
            timeout_secs,
            name: definition.name().map(str::to_string),
        });

        if let Err(err) = ctx.registry_mut().bind(key, id) {
            ctx.remove_physical(id);
            self.driver().release(handle);
            return Err(err.into());
        }

        if let Some(tx) = ctx.physical(id) {
            let info = tx.info();
            self.inner.active.write().insert(
                info.tx_id.clone(),
                ActiveTransaction {
                    tx_id: info.tx_id.clone(),
                    context_id: ctx.id(),
                    isolation: info.isolation,
                    read_only: info.read_only,
                    started_at: info.started_at,
                    name: info.name,
                },
            );
            debug!(
                tx_id = %info.tx_id,
                key = %self.inner.key,
                resource = %handle,
                isolation = %info.isolation,
                read_only = info.read_only,
                "started physical transaction"
            );
        }
        Ok(id)
    }

    // ==================== Suspension ====================

    fn suspend(
        &self,
        ctx: &mut TransactionContext,
    ) -> TransactionResult<SuspendedResources<PhysicalTxId>> {
        let suspended = ctx
            .registry_mut()
            .suspend(std::slice::from_ref(&self.inner.key))?;
        for (_, id) in suspended.iter() {
            if let Some(tx) = ctx.physical(*id) {
                tx.synchronizations.trigger_suspend();
            }
        }
        Ok(suspended)
    }

    fn resume(
        &self,
        ctx: &mut TransactionContext,
        suspended: SuspendedResources<PhysicalTxId>,
    ) -> TransactionResult<()> {
        let ids: Vec<PhysicalTxId> = suspended.iter().map(|(_, id)| *id).collect();
        ctx.registry_mut().resume(suspended)?;
        for id in ids {
            if let Some(tx) = ctx.physical(id) {
                debug!(tx_id = %tx.tx_id, "resumed suspended transaction");
                tx.synchronizations.trigger_resume();
            }
        }
        Ok(())
    }

    // ==================== Commit / Rollback ====================

    /// Complete the scope behind `status` successfully.
    ///
    /// Fails with [`TransactionError::UnexpectedRollback`] when another scope
    /// doomed the shared physical transaction; the scope is then rolled back
    /// as far as it owns anything.
    pub fn commit(
        &self,
        ctx: &mut TransactionContext,
        status: &TransactionStatus,
    ) -> TransactionResult<()> {
        let scope = self.take_scope(ctx, status)?;

        let result = if scope.local_rollback_only {
            debug!("transactional code has requested rollback");
            self.process_rollback(ctx, &scope, false)
        } else if self.is_globally_doomed(ctx, &scope) {
            debug!("global transaction is marked as rollback-only but transactional code requested commit");
            self.process_rollback(ctx, &scope, true)
        } else {
            self.process_commit(ctx, &scope)
        };

        self.cleanup_after_completion(ctx, scope, result)
    }

    /// Complete the scope behind `status` by rolling back what it owns.
    pub fn rollback(
        &self,
        ctx: &mut TransactionContext,
        status: &TransactionStatus,
    ) -> TransactionResult<()> {
        let scope = self.take_scope(ctx, status)?;
        let result = self.process_rollback(ctx, &scope, false);
        self.cleanup_after_completion(ctx, scope, result)
    }

    /// Validate that `status` may complete now and remove its scope.
    ///
    /// Ordering violations leave the scope open and the context untouched.
    fn take_scope(
        &self,
        ctx: &mut TransactionContext,
        status: &TransactionStatus,
    ) -> TransactionResult<LogicalScope> {
        let scope = ctx.scope(status)?;
        if scope.key != self.inner.key {
            return Err(TransactionError::illegal_state(format!(
                "transaction status was created by the manager for {}, not {}",
                scope.key, self.inner.key
            )));
        }

        if let Some(id) = scope.physical {
            let Some(tx) = ctx.physical(id) else {
                ctx.remove_scope(status)?;
                return Err(TransactionError::illegal_state(
                    "physical transaction was already completed by its owning scope",
                ));
            };
            if let Some(marker) = &scope.savepoint {
                if !tx.savepoints.is_top(marker) {
                    return Err(TransactionError::illegal_state(
                        "nested transaction still has newer savepoints; release or roll them back first",
                    ));
                }
            }
        }

        let bound = ctx.bound(&self.inner.key);
        let out_of_order = if scope.new_physical || scope.savepoint.is_some() {
            bound != scope.physical
        } else {
            scope.suspended.is_some() && bound.is_some()
        };
        if out_of_order {
            return Err(TransactionError::illegal_state(
                "an inner transaction is still active; complete inner scopes first",
            ));
        }

        ctx.remove_scope(status)
    }

    fn is_globally_doomed(&self, ctx: &TransactionContext, scope: &LogicalScope) -> bool {
        scope
            .physical
            .and_then(|id| ctx.physical(id))
            .is_some_and(|tx| tx.rollback_only)
    }

    fn process_commit(
        &self,
        ctx: &mut TransactionContext,
        scope: &LogicalScope,
    ) -> TransactionResult<()> {
        let Some(id) = scope.physical else {
            return Ok(());
        };
        if let Some(marker) = &scope.savepoint {
            debug!("releasing transaction savepoint");
            let driver = self.driver();
            let tx = physical_or_err(ctx.physical_mut(id))?;
            let handle = tx.handle;
            return tx.savepoints.release(driver, handle, marker);
        }
        if scope.new_physical {
            let tx = physical_or_err(ctx.physical(id))?;
            return self.commit_physical(tx);
        }
        Ok(())
    }

    fn commit_physical(&self, tx: &PhysicalTransaction) -> TransactionResult<()> {
        let syncs = &tx.synchronizations;

        if let Err(err) = syncs.trigger_before_commit(tx.read_only) {
            warn!(tx_id = %tx.tx_id, error = %err, "before_commit callback failed, rolling back");
            let _ = syncs.trigger_before_completion();
            let outcome = self.rollback_quietly(tx);
            let _ = syncs.trigger_after_completion(outcome);
            return Err(TransactionError::synchronization(
                "before_commit callback failed; transaction rolled back",
                err,
            ));
        }
        // failures are logged by the registry and do not change the outcome
        let _ = syncs.trigger_before_completion();

        debug!(tx_id = %tx.tx_id, resource = %tx.handle, "committing physical transaction");
        if let Err(err) = self.driver().commit(tx.handle) {
            let outcome = if self.inner.config.rollback_on_commit_failure {
                self.rollback_quietly(tx)
            } else {
                CompletionStatus::RolledBack
            };
            let _ = syncs.trigger_after_completion(outcome);
            return Err(TransactionError::driver(
                format!("could not commit transaction {}", tx.tx_id),
                err,
            ));
        }

        let after_commit = syncs.trigger_after_commit();
        let after_completion = syncs.trigger_after_completion(CompletionStatus::Committed);
        after_commit.and(after_completion).map_err(|err| {
            TransactionError::synchronization("synchronization callback failed after commit", err)
        })
    }

    fn rollback_physical(&self, tx: &PhysicalTransaction) -> TransactionResult<()> {
        let syncs = &tx.synchronizations;
        let _ = syncs.trigger_before_completion();

        debug!(tx_id = %tx.tx_id, resource = %tx.handle, "rolling back physical transaction");
        match self.driver().rollback(tx.handle) {
            Ok(()) => syncs
                .trigger_after_completion(CompletionStatus::RolledBack)
                .map_err(|err| {
                    TransactionError::synchronization(
                        "synchronization callback failed after rollback",
                        err,
                    )
                }),
            Err(err) => {
                let _ = syncs.trigger_after_completion(CompletionStatus::Unknown);
                Err(TransactionError::driver(
                    format!("could not roll back transaction {}", tx.tx_id),
                    err,
                ))
            }
        }
    }

    /// Roll back after a failed commit; the earlier failure is what gets reported.
    fn rollback_quietly(&self, tx: &PhysicalTransaction) -> CompletionStatus {
        match self.driver().rollback(tx.handle) {
            Ok(()) => CompletionStatus::RolledBack,
            Err(err) => {
                warn!(tx_id = %tx.tx_id, error = %err, "rollback after failed commit also failed");
                CompletionStatus::Unknown
            }
        }
    }

    fn process_rollback(
        &self,
        ctx: &mut TransactionContext,
        scope: &LogicalScope,
        unexpected: bool,
    ) -> TransactionResult<()> {
        if let Some(id) = scope.physical {
            if let Some(marker) = &scope.savepoint {
                debug!("rolling back transaction to savepoint");
                let driver = self.driver();
                let tx = physical_or_err(ctx.physical_mut(id))?;
                let handle = tx.handle;
                tx.savepoints.rollback_to(driver, handle, marker)?;
            } else if scope.new_physical {
                let tx = physical_or_err(ctx.physical(id))?;
                self.rollback_physical(tx)?;
            } else if scope.local_rollback_only
                || self.inner.config.global_rollback_on_participation_failure
            {
                let tx = physical_or_err(ctx.physical_mut(id))?;
                debug!(tx_id = %tx.tx_id, "participating transaction failed - marking existing transaction as rollback-only");
                tx.mark_rollback_only();
            } else {
                debug!("participating transaction failed - letting transaction originator decide on rollback");
            }
        }

        if unexpected {
            return Err(TransactionError::UnexpectedRollback(
                "transaction rolled back because it has been marked as rollback-only".to_string(),
            ));
        }
        Ok(())
    }

    /// Unbind and release what the scope owned, then resume what it suspended.
    fn cleanup_after_completion(
        &self,
        ctx: &mut TransactionContext,
        scope: LogicalScope,
        mut result: TransactionResult<()>,
    ) -> TransactionResult<()> {
        if scope.new_physical {
            if let Some(id) = scope.physical {
                if let Err(err) = ctx.registry_mut().unbind(&self.inner.key) {
                    keep_first(&mut result, err.into());
                }
                if let Some(tx) = ctx.remove_physical(id) {
                    self.driver().release(tx.handle);
                    self.inner
                        .active
                        .write()
                        .remove(&tx.tx_id.to_string().to_lowercase());
                    debug!(tx_id = %tx.tx_id, resource = %tx.handle, "released resource after transaction");
                }
            }
        }

        if let Some(suspended) = scope.suspended {
            debug!("resuming suspended transaction after completion of inner transaction");
            if let Err(err) = self.resume(ctx, suspended) {
                keep_first(&mut result, err);
            }
        }
        result
    }

    /// Roll back and release every physical transaction `ctx` still holds for
    /// this manager, and forget its open scopes.
    ///
    /// For chains that ended without completing their scopes, after an early
    /// return for example. Statuses from `ctx` are completed afterwards.
    /// Returns the number of physical transactions cleaned up.
    pub fn cleanup_abandoned(&self, ctx: &mut TransactionContext) -> TransactionResult<usize> {
        let abandoned = ctx.abandon(&self.inner.key);
        let mut result = Ok(());
        for tx in &abandoned {
            warn!(tx_id = %tx.tx_id, resource = %tx.handle, "rolling back abandoned transaction");
            if let Err(err) = self.rollback_physical(tx) {
                keep_first(&mut result, err);
            }
            self.driver().release(tx.handle);
            self.inner
                .active
                .write()
                .remove(&tx.tx_id.to_string().to_lowercase());
        }
        result.map(|()| abandoned.len())
    }

    // ==================== Scope state ====================

    /// Mark the scope rollback-only.
    ///
    /// For scopes inside a shared physical transaction this dooms the whole
    /// physical transaction. A NESTED scope only dooms its own savepoint.
    pub fn set_rollback_only(
        &self,
        ctx: &mut TransactionContext,
        status: &TransactionStatus,
    ) -> TransactionResult<()> {
        let scope = ctx.scope_mut(status)?;
        scope.local_rollback_only = true;
        let shared = match scope.savepoint {
            Some(_) => None,
            None => scope.physical,
        };
        if let Some(tx) = shared.and_then(|id| ctx.physical_mut(id)) {
            debug!(tx_id = %tx.tx_id, "marking transaction as rollback-only");
            tx.mark_rollback_only();
        }
        Ok(())
    }

    /// Whether the scope itself or its physical transaction is rollback-only.
    pub fn is_rollback_only(
        &self,
        ctx: &TransactionContext,
        status: &TransactionStatus,
    ) -> TransactionResult<bool> {
        let scope = ctx.scope(status)?;
        Ok(scope.local_rollback_only || self.is_globally_doomed(ctx, scope))
    }

    /// Whether `status` was committed or rolled back already.
    pub fn is_completed(&self, ctx: &TransactionContext, status: &TransactionStatus) -> bool {
        !ctx.is_scope_open(status)
    }

    /// Register a callback with the physical transaction active in `ctx`.
    pub fn register_synchronization(
        &self,
        ctx: &mut TransactionContext,
        callback: Arc<dyn TransactionSynchronization>,
    ) -> TransactionResult<()> {
        let tx = ctx.bound_transaction_mut(&self.inner.key).ok_or_else(|| {
            TransactionError::illegal_state("transaction synchronization is not active")
        })?;
        tx.synchronizations.register(callback);
        Ok(())
    }

    /// The driver handle of the physical transaction active in `ctx`.
    pub fn current_resource(&self, ctx: &TransactionContext) -> Option<ResourceHandle> {
        ctx.bound_transaction(&self.inner.key).map(|tx| tx.handle)
    }

    /// Snapshot of the physical transaction active in `ctx`.
    pub fn current_transaction(&self, ctx: &TransactionContext) -> Option<TransactionInfo> {
        ctx.transaction_info(&self.inner.key)
    }

    // ==================== Programmatic savepoints ====================

    /// Create a savepoint in the scope's physical transaction.
    pub fn create_savepoint(
        &self,
        ctx: &mut TransactionContext,
        status: &TransactionStatus,
    ) -> TransactionResult<SavepointMarker> {
        if !self.inner.config.nested_transaction_allowed {
            return Err(TransactionError::NestedTransactionNotSupported(
                "transaction manager does not allow savepoints".to_string(),
            ));
        }
        let driver = self.driver();
        let tx = self.scope_transaction(ctx, status)?;
        let (handle, doomed) = (tx.handle, tx.rollback_only);
        tx.savepoints.create(driver, handle, doomed)
    }

    /// Roll back to `marker`, which must be the most recent live savepoint.
    pub fn rollback_to_savepoint(
        &self,
        ctx: &mut TransactionContext,
        status: &TransactionStatus,
        marker: &SavepointMarker,
    ) -> TransactionResult<()> {
        let driver = self.driver();
        let tx = self.scope_transaction(ctx, status)?;
        let handle = tx.handle;
        tx.savepoints.rollback_to(driver, handle, marker)
    }

    /// Release `marker`, which must be the most recent live savepoint.
    pub fn release_savepoint(
        &self,
        ctx: &mut TransactionContext,
        status: &TransactionStatus,
        marker: &SavepointMarker,
    ) -> TransactionResult<()> {
        let driver = self.driver();
        let tx = self.scope_transaction(ctx, status)?;
        let handle = tx.handle;
        tx.savepoints.release(driver, handle, marker)
    }

    fn scope_transaction<'c>(
        &self,
        ctx: &'c mut TransactionContext,
        status: &TransactionStatus,
    ) -> TransactionResult<&'c mut PhysicalTransaction> {
        let id = ctx.scope(status)?.physical.ok_or_else(|| {
            TransactionError::illegal_state("scope is not running in a transaction")
        })?;
        physical_or_err(ctx.physical_mut(id))
    }

    // ==================== Convenience ====================

    /// Execute a function within a scope, automatically committing or rolling back.
    ///
    /// If the function returns Ok, the scope is committed.
    /// If the function returns Err, the scope is rolled back and the error
    /// returned, unless the rollback itself fails, in which case the rollback
    /// failure is returned. If the function panics, the scope is rolled back
    /// and the panic resumed.
    pub fn execute<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut TransactionContext, &TransactionStatus) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let status = self.begin(ctx, definition)?;

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(ctx, &status))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                if let Err(rollback_err) = self.rollback(ctx, &status) {
                    warn!(error = %rollback_err, "rollback after panic failed");
                }
                panic::resume_unwind(payload);
            }
        };

        match outcome {
            Ok(value) => {
                self.commit(ctx, &status)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback(ctx, &status) {
                    warn!(error = %rollback_err, "rollback after application error failed; application error is discarded");
                    return Err(rollback_err.into());
                }
                Err(err)
            }
        }
    }

    // ==================== Diagnostics ====================

    /// Get the number of open physical transactions across all contexts.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all open physical transaction IDs.
    pub fn active_transactions(&self) -> Vec<String> {
        self.inner.active.read().keys().cloned().collect()
    }

    /// Check if a physical transaction is open.
    pub fn is_active(&self, tx_id: &str) -> bool {
        self.inner.active.read().contains_key(tx_id)
    }

    /// Get the start record of an open physical transaction.
    pub fn transaction_info(&self, tx_id: &str) -> Option<ActiveTransaction> {
        self.inner.active.read().get(tx_id).cloned()
    }
}

fn physical_or_err<T>(tx: Option<T>) -> TransactionResult<T> {
    tx.ok_or_else(|| TransactionError::illegal_state("physical transaction is no longer available"))
}

/// Strict-mode check before joining `tx` with `definition`.
fn validate_existing(tx: &PhysicalTransaction, definition: &TransactionDefinition) -> TransactionResult<()> {
    let isolation = definition.isolation();
    if isolation.is_specified() && isolation != tx.isolation {
        return Err(TransactionError::illegal_state(format!(
            "participating transaction with definition [{}] specifies isolation level which is \
             incompatible with existing transaction: {}",
            definition, tx.isolation
        )));
    }
    if !definition.is_read_only() && tx.read_only {
        return Err(TransactionError::illegal_state(format!(
            "participating transaction with definition [{}] is not marked as read-only but \
             existing transaction is",
            definition
        )));
    }
    Ok(())
}

/// Report `err` unless an earlier failure is already being reported.
fn keep_first(result: &mut TransactionResult<()>, err: TransactionError) {
    if result.is_ok() {
        *result = Err(err);
    } else {
        warn!(error = %err, "cleanup failure suppressed by earlier error");
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("key", &self.inner.key)
            .field("config", &self.inner.config)
            .field("active_count", &self.active_count())
            .finish()
    }
}
