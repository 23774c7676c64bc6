//! # latch-tables
//!
//! Typed tables over latch store collections.
//!
//! A table wraps one collection for a `(K, E)` key/entry pair, wires the
//! collection's change feed into an embedded reconciliation manager, and
//! exposes strongly-typed CRUD:
//!
//! - [`Table`]: the direct variant; every read hits the store.
//! - [`CachedTable`]: keeps an in-memory mirror synchronized by the change
//!   feed, with eager preload or read-through population.
//!
//! ## Data flow
//!
//! ```text
//! application mutates table → store → change feed fires
//!     → table watch handler decodes the key
//!     → (cached variant) cache refreshed from store
//!     → reconciliation manager enqueues the key on every controller pipeline
//! ```

pub mod cached;
pub mod table;
pub mod typed;

pub use cached::{CacheMode, CachedTable};
pub use table::Table;
pub use typed::TypedCollection;
