//! In-memory resource driver.
//!
//! [`InMemoryDriver`] simulates a transactional store: statements issued on a
//! handle stay pending until the handle commits, savepoints truncate the
//! pending list on rollback. Every call is recorded so that callers can
//! assert exactly which driver operations a propagation scenario produced.
//! Failures can be injected per operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::resource::driver::ResourceDriver;
use crate::resource::errors::{DriverError, DriverResult};
use crate::resource::types::{DriverOp, ResourceHandle, ResourceKey, SavepointToken};
use crate::transaction::IsolationLevel;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub op: DriverOp,
    pub handle: Option<ResourceHandle>,
    pub savepoint: Option<SavepointToken>,
}

/// Settings a resource was acquired with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub handle: ResourceHandle,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    pub timeout: Option<Duration>,
}

/// A recording, in-memory transactional driver.
///
/// Clone this to share it between a manager and a test - it uses Arc internally.
#[derive(Clone)]
pub struct InMemoryDriver {
    inner: Arc<InMemoryDriverInner>,
}

struct InMemoryDriverInner {
    key: ResourceKey,
    state: Mutex<DriverState>,
}

#[derive(Default)]
struct DriverState {
    supports_savepoints: bool,
    next_handle: u64,
    next_savepoint: u64,
    open: HashMap<ResourceHandle, OpenResource>,
    committed: Vec<String>,
    calls: Vec<DriverCall>,
    acquisitions: Vec<AcquireRequest>,
    failures: HashMap<DriverOp, DriverError>,
}

#[derive(Default)]
struct OpenResource {
    pending: Vec<String>,
    /// savepoint token and the pending length when it was taken
    savepoints: Vec<(SavepointToken, usize)>,
}

impl OpenResource {
    fn savepoint_position(&self, token: SavepointToken) -> Option<usize> {
        self.savepoints.iter().position(|(t, _)| *t == token)
    }
}

impl InMemoryDriver {
    /// Create a driver with savepoint support.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(InMemoryDriverInner {
                key: ResourceKey::new(key),
                state: Mutex::new(DriverState {
                    supports_savepoints: true,
                    ..Default::default()
                }),
            }),
        }
    }

    /// Create a driver whose resources have no savepoints.
    pub fn without_savepoints(key: impl Into<String>) -> Self {
        let driver = Self::new(key);
        driver.set_supports_savepoints(false);
        driver
    }

    pub fn set_supports_savepoints(&self, value: bool) {
        self.inner.state.lock().supports_savepoints = value;
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: DriverOp, error: DriverError) {
        self.inner.state.lock().failures.insert(op, error);
    }

    /// Issue a statement on an open resource.
    pub fn execute(&self, handle: ResourceHandle, statement: impl Into<String>) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        let resource = state
            .open
            .get_mut(&handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        resource.pending.push(statement.into());
        Ok(())
    }

    /// Statements made durable by commits, in commit order.
    pub fn committed(&self) -> Vec<String> {
        self.inner.state.lock().committed.clone()
    }

    /// Statements pending on an open resource.
    pub fn pending(&self, handle: ResourceHandle) -> Vec<String> {
        self.inner
            .state
            .lock()
            .open
            .get(&handle)
            .map(|r| r.pending.clone())
            .unwrap_or_default()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.inner.state.lock().calls.clone()
    }

    /// Number of calls of `op` made so far.
    pub fn count(&self, op: DriverOp) -> usize {
        self.inner
            .state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    pub fn acquisitions(&self) -> Vec<AcquireRequest> {
        self.inner.state.lock().acquisitions.clone()
    }

    /// Number of acquired, not yet released resources.
    pub fn open_count(&self) -> usize {
        self.inner.state.lock().open.len()
    }

    fn record(
        state: &mut DriverState,
        op: DriverOp,
        handle: Option<ResourceHandle>,
        savepoint: Option<SavepointToken>,
    ) -> DriverResult<()> {
        state.calls.push(DriverCall {
            op,
            handle,
            savepoint,
        });
        match state.failures.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ResourceDriver for InMemoryDriver {
    fn key(&self) -> ResourceKey {
        self.inner.key.clone()
    }

    fn acquire(
        &self,
        isolation: IsolationLevel,
        read_only: bool,
        timeout: Option<Duration>,
    ) -> DriverResult<ResourceHandle> {
        let mut state = self.inner.state.lock();
        Self::record(&mut state, DriverOp::Acquire, None, None)?;

        state.next_handle += 1;
        let handle = ResourceHandle::new(state.next_handle);
        if let Some(call) = state.calls.last_mut() {
            call.handle = Some(handle);
        }
        state.open.insert(handle, OpenResource::default());
        state.acquisitions.push(AcquireRequest {
            handle,
            isolation,
            read_only,
            timeout,
        });
        Ok(handle)
    }

    fn release(&self, handle: ResourceHandle) {
        let mut state = self.inner.state.lock();
        state.calls.push(DriverCall {
            op: DriverOp::Release,
            handle: Some(handle),
            savepoint: None,
        });
        state.open.remove(&handle);
    }

    fn commit(&self, handle: ResourceHandle) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        Self::record(&mut state, DriverOp::Commit, Some(handle), None)?;

        let resource = state
            .open
            .get_mut(&handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let statements = std::mem::take(&mut resource.pending);
        resource.savepoints.clear();
        state.committed.extend(statements);
        Ok(())
    }

    fn rollback(&self, handle: ResourceHandle) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        Self::record(&mut state, DriverOp::Rollback, Some(handle), None)?;

        let resource = state
            .open
            .get_mut(&handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        resource.pending.clear();
        resource.savepoints.clear();
        Ok(())
    }

    fn supports_savepoints(&self, _handle: ResourceHandle) -> bool {
        self.inner.state.lock().supports_savepoints
    }

    fn create_savepoint(&self, handle: ResourceHandle) -> DriverResult<SavepointToken> {
        let mut state = self.inner.state.lock();
        if !state.supports_savepoints {
            return Err(DriverError::Unsupported(DriverOp::CreateSavepoint));
        }
        Self::record(&mut state, DriverOp::CreateSavepoint, Some(handle), None)?;

        state.next_savepoint += 1;
        let token = SavepointToken::new(state.next_savepoint);
        if let Some(call) = state.calls.last_mut() {
            call.savepoint = Some(token);
        }
        let resource = state
            .open
            .get_mut(&handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let mark = resource.pending.len();
        resource.savepoints.push((token, mark));
        Ok(token)
    }

    fn rollback_to_savepoint(
        &self,
        handle: ResourceHandle,
        token: SavepointToken,
    ) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        Self::record(
            &mut state,
            DriverOp::RollbackToSavepoint,
            Some(handle),
            Some(token),
        )?;

        let resource = state
            .open
            .get_mut(&handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let position = resource.savepoint_position(token).ok_or_else(|| {
            DriverError::failed(DriverOp::RollbackToSavepoint, format!("no such savepoint {token}"))
        })?;
        // later savepoints are destroyed, the target one survives
        let mark = resource.savepoints[position].1;
        resource.savepoints.truncate(position + 1);
        resource.pending.truncate(mark);
        Ok(())
    }

    fn release_savepoint(&self, handle: ResourceHandle, token: SavepointToken) -> DriverResult<()> {
        let mut state = self.inner.state.lock();
        Self::record(
            &mut state,
            DriverOp::ReleaseSavepoint,
            Some(handle),
            Some(token),
        )?;

        let resource = state
            .open
            .get_mut(&handle)
            .ok_or(DriverError::UnknownHandle(handle))?;
        let position = resource.savepoint_position(token).ok_or_else(|| {
            DriverError::failed(DriverOp::ReleaseSavepoint, format!("no such savepoint {token}"))
        })?;
        resource.savepoints.truncate(position);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDriver")
            .field("key", &self.inner.key)
            .field("open", &self.open_count())
            .finish()
    }
}
