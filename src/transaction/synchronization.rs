//! Completion callbacks attached to a physical transaction.
//!
//! Callbacks registered by any scope sharing a physical transaction land in
//! that transaction's single [`SynchronizationRegistry`] and run in
//! registration order when the owning scope completes.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

/// How a physical transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    /// The driver failed while rolling back; the outcome is not known.
    Unknown,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Committed => write!(f, "committed"),
            CompletionStatus::RolledBack => write!(f, "rolled back"),
            CompletionStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Failure reported by a synchronization callback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SynchronizationError(String);

impl SynchronizationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type SynchronizationResult = Result<(), SynchronizationError>;

/// Callbacks around the completion of a physical transaction.
///
/// All methods default to doing nothing.
pub trait TransactionSynchronization: Send + Sync {
    /// The transaction is being suspended by an inner independent scope.
    fn suspend(&self) {}

    /// The transaction is bound again after a suspension.
    fn resume(&self) {}

    /// Runs on the commit path only, before anything is committed. A failure
    /// turns the commit into a rollback.
    fn before_commit(&self, _read_only: bool) -> SynchronizationResult {
        Ok(())
    }

    /// Runs before commit or rollback.
    fn before_completion(&self) -> SynchronizationResult {
        Ok(())
    }

    /// Runs once the physical commit succeeded.
    fn after_commit(&self) -> SynchronizationResult {
        Ok(())
    }

    /// Runs once the outcome is final.
    fn after_completion(&self, _status: CompletionStatus) -> SynchronizationResult {
        Ok(())
    }
}

/// Ordered list of callbacks for one physical transaction.
#[derive(Default)]
pub struct SynchronizationRegistry {
    callbacks: Vec<Arc<dyn TransactionSynchronization>>,
}

impl SynchronizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: Arc<dyn TransactionSynchronization>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn trigger_suspend(&self) {
        for callback in &self.callbacks {
            callback.suspend();
        }
    }

    pub fn trigger_resume(&self) {
        for callback in &self.callbacks {
            callback.resume();
        }
    }

    /// Stops at the first failure.
    pub fn trigger_before_commit(&self, read_only: bool) -> SynchronizationResult {
        for callback in &self.callbacks {
            callback.before_commit(read_only)?;
        }
        Ok(())
    }

    pub fn trigger_before_completion(&self) -> SynchronizationResult {
        self.invoke_isolated("before_completion", |cb| cb.before_completion())
    }

    pub fn trigger_after_commit(&self) -> SynchronizationResult {
        self.invoke_isolated("after_commit", |cb| cb.after_commit())
    }

    pub fn trigger_after_completion(&self, status: CompletionStatus) -> SynchronizationResult {
        self.invoke_isolated("after_completion", |cb| cb.after_completion(status))
    }

    /// Run `f` on every callback, returning the first failure once all ran.
    fn invoke_isolated<F>(&self, phase: &str, f: F) -> SynchronizationResult
    where
        F: Fn(&dyn TransactionSynchronization) -> SynchronizationResult,
    {
        let mut first = None;
        for (index, callback) in self.callbacks.iter().enumerate() {
            if let Err(err) = f(callback.as_ref()) {
                error!(phase, index, error = %err, "synchronization callback failed");
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SynchronizationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizationRegistry")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_after_completion: bool,
    }

    impl TransactionSynchronization for Recorder {
        fn before_commit(&self, _read_only: bool) -> SynchronizationResult {
            self.log.lock().push(format!("{}:before_commit", self.name));
            Ok(())
        }

        fn after_completion(&self, status: CompletionStatus) -> SynchronizationResult {
            self.log
                .lock()
                .push(format!("{}:after_completion:{}", self.name, status));
            if self.fail_after_completion {
                return Err(SynchronizationError::new(format!("{} broke", self.name)));
            }
            Ok(())
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail_after_completion: bool,
    ) -> Arc<dyn TransactionSynchronization> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            fail_after_completion,
        })
    }

    #[test]
    fn test_runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SynchronizationRegistry::new();
        registry.register(recorder("a", &log, false));
        registry.register(recorder("b", &log, false));

        registry.trigger_before_commit(false).unwrap();
        assert_eq!(*log.lock(), vec!["a:before_commit", "b:before_commit"]);
    }

    #[test]
    fn test_after_completion_failures_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SynchronizationRegistry::new();
        registry.register(recorder("a", &log, true));
        registry.register(recorder("b", &log, true));
        registry.register(recorder("c", &log, false));

        let err = registry
            .trigger_after_completion(CompletionStatus::RolledBack)
            .unwrap_err();

        assert_eq!(err, SynchronizationError::new("a broke"));
        assert_eq!(log.lock().len(), 3);
    }
}
