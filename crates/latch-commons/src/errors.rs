//! Shared error types for the latch toolkit.
//!
//! Every fallible operation across the latch crates returns an [`Error`]
//! carrying a recognizable [`ErrorKind`] and a human-readable message.
//! Callers branch on the kind, never on the message: `TryAcquire` contention
//! surfaces as `AlreadyExists`, a race-window read as `NotFound`, and so on.
//!
//! ## Example Usage
//!
//! ```rust
//! use latch_commons::errors::{Error, ErrorKind, Result};
//!
//! fn validate_name(name: &str) -> Result<()> {
//!     if name.is_empty() {
//!         return Err(Error::wrap(ErrorKind::InvalidArgument, "name cannot be empty"));
//!     }
//!     Ok(())
//! }
//!
//! let err = validate_name("").unwrap_err();
//! assert!(err.is_invalid_argument());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Recognizable error kinds shared across all latch crates.
///
/// Higher layers compare by kind, never by message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Cause could not be classified
    Unknown,

    /// Item not found in the space
    NotFound,

    /// Item already present in the space
    AlreadyExists,

    /// Argument is not valid
    InvalidArgument,

    /// Caller is not authenticated
    Unauthorized,

    /// Caller is authenticated but not permitted
    Forbidden,
}

impl ErrorKind {
    /// Returns the canonical lowercase label for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unknown => "unknown",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
        }
    }
}

/// Coded error type carrying a kind and a message.
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error without a recognized kind.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            message: message.into(),
        }
    }

    /// Wraps a message with a recognized error kind.
    pub fn wrap(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the kind associated with this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True if the item was not found in the space.
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// True if the item already exists in the space.
    pub fn is_already_exists(&self) -> bool {
        self.kind == ErrorKind::AlreadyExists
    }

    /// True if an argument was not valid.
    pub fn is_invalid_argument(&self) -> bool {
        self.kind == ErrorKind::InvalidArgument
    }

    /// True if the caller was not authenticated.
    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    /// True if the caller was authenticated but not permitted.
    pub fn is_forbidden(&self) -> bool {
        self.kind == ErrorKind::Forbidden
    }
}

/// Result type alias using the latch [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
