//! # latch-store
//!
//! Document-store abstraction for the latch coordination toolkit.
//!
//! This crate defines the store contract every other latch crate builds on:
//! - [`Collection`]: typed-key CRUD, counting, filtered deletes, ordered and
//!   paginated multi-find, and change-feed subscriptions
//! - [`Store`] / [`StoreClient`]: grouping of named collections
//! - [`Filter`] / [`FindOptions`]: driver-independent query model evaluated
//!   against `serde_json` documents
//! - [`MemoryClient`]: a complete in-process reference implementation with a
//!   per-collection change feed, used by tests and single-process embeddings
//!
//! ## Architecture
//!
//! ```text
//! Table<K, E> / sync primitives     ← typed layers (latch-tables, latch-sync)
//!     ↓
//! Collection                        ← document CRUD + watch (this crate)
//!     ↓
//! MemoryCollection / server-backed  ← actual storage implementation
//! ```
//!
//! Server-backed implementations (the reference deployment targets a
//! replica-set document database) plug in behind the same traits; connection
//! management and the wire protocol stay on their side of the boundary.

pub mod config;
pub mod document;
pub mod event_logger;
pub mod memory;
pub mod store;

pub use config::StoreConfig;
pub use document::{canonical_key, compare_values, lookup_path, Filter, FindOptions, SortDirection, SortSpec};
pub use event_logger::EventLogger;
pub use memory::MemoryClient;
pub use store::{Collection, EventOp, Store, StoreClient, WatchHandler};
