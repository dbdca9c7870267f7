//! resource layer for txcoord
//!
//! This module holds everything the coordinator needs from the outside world:
//! the driver capability contract, the context-scoped registry that binds a
//! resource factory to the transaction currently holding it, and an in-memory
//! reference driver.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! └─────────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//!  ┌───────────────────────────┐   ┌───────────────────────────┐
//!  │     ResourceRegistry      │   │      ResourceDriver       │
//!  │ (key -> bound tx, per ctx)│   │ (acquire/commit/rollback/ │
//!  │                           │   │        savepoints)        │
//!  └───────────────────────────┘   └───────────────────────────┘
//!                                               │
//!                                               ▼
//!                                   ┌───────────────────────────┐
//!                                   │  InMemoryDriver / yours   │
//!                                   └───────────────────────────┘
//! ```

mod driver;
mod errors;
mod memory;
mod registry;
mod types;

pub use driver::ResourceDriver;
pub use errors::{DriverError, DriverResult, RegistryError, RegistryResult};
pub use memory::{AcquireRequest, DriverCall, InMemoryDriver};
pub use registry::{ResourceRegistry, SuspendedResources};
pub use types::{DriverOp, ResourceHandle, ResourceKey, SavepointToken};
