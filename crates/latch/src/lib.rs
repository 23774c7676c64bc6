//! # latch
//!
//! Umbrella crate for the latch coordination toolkit.
//!
//! Re-exports every subsystem under one roof for applications that embed
//! the whole stack; services depending on a single concern should depend
//! on that crate directly.
//!
//! | Module | Crate | Responsibility |
//! |--------|-------|----------------|
//! | [`errors`] | `latch-commons` | Coded error taxonomy |
//! | [`store`] | `latch-store` | Document store contract and reference implementation |
//! | [`reconciler`] | `latch-reconciler` | Coalescing pipelines and controller manager |
//! | [`tables`] | `latch-tables` | Typed tables over collections |
//! | [`sync`] | `latch-sync` | Owner liveness, locks, providers |
//! | [`rate`] | `latch-rate` | Shared-budget rate limiting |
//! | [`crypto`] | `latch-crypto` | Field-level encryption |
//! | [`certmanager`] | `latch-certmanager` | Certificate authority for mTLS |

pub use latch_certmanager as certmanager;
pub use latch_commons as errors;
pub use latch_crypto as crypto;
pub use latch_rate as rate;
pub use latch_reconciler as reconciler;
pub use latch_store as store;
pub use latch_sync as sync;
pub use latch_tables as tables;

/// The names most embeddings need, importable in one line.
pub mod prelude {
    pub use latch_commons::{Error, ErrorKind, Result};
    pub use latch_reconciler::{Controller, KeySource, Manager, Pipeline, ReconcileResult};
    pub use latch_store::{
        Collection, EventOp, Filter, FindOptions, MemoryClient, SortDirection, Store, StoreClient,
        WatchHandler,
    };
    pub use latch_sync::{
        initialize_owner, locate_lock_table, locate_provider_table, LockTable, OwnerTable,
        ProviderTable,
    };
    pub use latch_tables::{CacheMode, CachedTable, Table};
}
