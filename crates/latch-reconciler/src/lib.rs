//! # latch-reconciler
//!
//! Event-driven reconciliation for store-backed tables.
//!
//! A [`Controller`] is a reconcile function registered against a
//! [`Manager`]; each controller gets a private [`Pipeline`], a coalescing
//! work queue that retries on error and supports timed re-queues. The
//! manager fans change notifications out to every registered pipeline and
//! bootstraps new controllers by replaying the keys that already exist in
//! the parent [`KeySource`].
//!
//! ## Contract
//!
//! - Within one pipeline, reconciles are serialized: a controller's
//!   `reconcile` is never called concurrently with itself.
//! - Across pipelines, reconciles run concurrently.
//! - Duplicate enqueues of a key already waiting in a pipeline are absorbed.
//! - A reconcile error re-enqueues the key immediately; a
//!   `requeue_after` schedules a deferred re-enqueue that silently no-ops if
//!   the pipeline is cancelled mid-sleep.

pub mod controller;
pub mod manager;
pub mod pipeline;

pub use controller::{Controller, ReconcileResult};
pub use manager::{KeySource, Manager};
pub use pipeline::Pipeline;
