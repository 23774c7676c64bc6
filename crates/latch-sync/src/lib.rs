//! # latch-sync
//!
//! Cross-process coordination primitives anchored to a shared store:
//!
//! - [`OwnerTable`]: a process-liveness table with heartbeat and age-out
//!   semantics. Every other primitive references an owner so crashes are
//!   detectable and recoverable fleet-wide.
//! - [`LockTable`]: single-writer mutual exclusion keyed by an
//!   application-defined key type; locks die with their owner.
//! - [`ProviderTable`]: multi-holder declarations of named capabilities with
//!   a per-process observer set and controller fan-out for
//!   available/unavailable transitions.
//!
//! All consuming processes must use a uniform store definition; coordination
//! only works when the fleet shares the same collections.
//!
//! Each primitive offers an explicit handle API (several handles may share
//! one store, which is how tests model a multi-process fleet) plus the
//! process-wide singleton facade (`initialize_owner`, `locate_lock_table`,
//! `locate_provider_table`).

pub mod lock;
pub mod observer;
pub mod owner;
pub mod provider;

pub use lock::{locate_lock_table, LockHandle, LockRecord, LockTable};
pub use observer::ObserverTable;
pub use owner::{
    initialize_owner, initialize_owner_with_interval, owner, OwnerKey, OwnerRecord, OwnerTable,
};
pub use provider::{
    locate_provider_table, locate_provider_table_with_name, ProviderHandle, ProviderKey,
    ProviderTable, DEFAULT_PROVIDER_TABLE,
};
