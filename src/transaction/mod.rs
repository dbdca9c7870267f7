//! Transaction propagation for txcoord.
//!
//! This module decides, for every logical scope a caller opens, whether it
//! joins the physical transaction already active in its context, starts an
//! independent one, creates a savepoint inside it, or runs without one.
//! Physical transactions belong to the context; scopes reference them and
//! the manager is the only thing that changes their state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (propagation, physical lifecycle, rollback-only, commits)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │  Savepoint  │       │    Sync     │
//!  │  Context    │       │   Manager   │       │  Registry   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use txcoord::resource::InMemoryDriver;
//! use txcoord::transaction::{TransactionContext, TransactionDefinition, TransactionManager};
//!
//! let driver = InMemoryDriver::new("orders-db");
//! let manager = TransactionManager::new(driver.clone());
//! let mut ctx = TransactionContext::new();
//!
//! let outer = manager.begin(&mut ctx, &TransactionDefinition::required())?;
//! let inner = manager.begin(&mut ctx, &TransactionDefinition::required())?;
//! assert!(!inner.is_new_transaction());
//!
//! manager.commit(&mut ctx, &inner)?;  // joins: nothing happens physically
//! manager.commit(&mut ctx, &outer)?;  // the one physical commit
//! # Ok::<(), txcoord::transaction::TransactionError>(())
//! ```

mod config;
mod context;
mod definition;
mod error;
mod isolation;
mod manager;
mod savepoint;
mod status;
mod synchronization;

pub use config::{ConfigError, TransactionManagerConfig};
pub use context::{PhysicalTxId, TransactionContext, TransactionInfo};
pub use definition::{Propagation, TransactionDefinition};
pub use error::{SystemCause, TransactionError, TransactionResult};
pub use isolation::IsolationLevel;
pub use manager::{ActiveTransaction, TransactionManager};
pub use savepoint::{SavepointManager, SavepointMarker};
pub use status::TransactionStatus;
pub use synchronization::{
    CompletionStatus, SynchronizationError, SynchronizationRegistry, SynchronizationResult,
    TransactionSynchronization,
};
