//! Short-lived keyed leases over `(item, warehouse[, batch])` stock keys.
//!
//! The lock manager knows nothing about inventory semantics: it hands out
//! exclusive, time-bounded leases and never blocks. A caller that cannot get a
//! lease is told who is in the way and when to retry.
//!
//! ## Scope
//!
//! The lease table lives in process memory, so mutual exclusion only holds
//! between callers sharing one [`LockManager`] instance. Running several
//! instances of the service needs a shared store with conditional writes and
//! TTLs behind the same interface.

pub mod key;
pub mod manager;

pub use key::LockKey;
pub use manager::{
    HeldLocks, LockConflict, LockLease, LockManager, LockManagerConfig, LockSet, MultiLockFailure,
};
