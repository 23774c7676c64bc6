//! # latch-commons
//!
//! Shared building blocks for the latch coordination toolkit.
//!
//! This crate provides the coded error taxonomy used across all latch crates
//! plus small time helpers. It intentionally has no heavyweight dependencies
//! so every other crate can depend on it.

pub mod errors;
pub mod time;

pub use errors::{Error, ErrorKind, Result};
