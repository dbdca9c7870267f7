//! txcoord - Transaction Propagation Coordinator
//!
//! This crate decides, for a chain of nested operations that each declare a
//! transactional intent, whether an operation joins the physical transaction
//! already running, starts an independent one, or opens a savepoint inside
//! it. It keeps commit and rollback consistent when inner and outer callers
//! disagree: an inner scope can doom the shared transaction, and the outer
//! commit then fails loudly instead of pretending to succeed.
//!
//! # Example
//!
//! ```
//! use txcoord::resource::{DriverOp, InMemoryDriver};
//! use txcoord::transaction::{TransactionContext, TransactionDefinition, TransactionManager};
//!
//! let driver = InMemoryDriver::new("orders-db");
//! let manager = TransactionManager::new(driver.clone());
//! let mut ctx = TransactionContext::new();
//!
//! manager
//!     .execute(&mut ctx, &TransactionDefinition::required(), |ctx, _status| {
//!         let handle = manager.current_resource(ctx).unwrap();
//!         driver.execute(handle, "INSERT INTO orders VALUES (1)").unwrap();
//!         Ok::<_, txcoord::transaction::TransactionError>(())
//!     })
//!     .unwrap();
//!
//! assert_eq!(driver.count(DriverOp::Commit), 1);
//! ```

pub mod resource;
pub mod transaction;
