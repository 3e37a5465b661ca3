//! The item cache's closed error set.
//!
//! A `thiserror` enum rather than a generic `anyhow`-style error, because
//! callers (in particular the miss loop and the commit path) match on the
//! kind to decide whether to retry, propagate, or treat the result as a
//! normal negative outcome.
//!
//! `NeedsRead` is deliberately **not** a variant here: it signals an
//! internal coverage gap that drives the miss loop and should never reach
//! a caller. Making it unrepresentable in the public error type means a
//! caller can never be handed an internal retry signal by mistake. The
//! miss loop in `icache-cache::cache` uses its own crate-private
//! `NeedsRead` marker for that purpose.

use crate::key::Key;
use thiserror::Error;

/// Result alias used throughout the item cache's public API.
pub type Result<T> = std::result::Result<T, CacheError>;

/// The closed set of failure kinds a caller can observe, minus the
/// caller-invisible `NEEDS_READ` internal signal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Oversized value, a lock whose mode/range does not cover the
    /// requested operation, or a batch with `start > end`.
    #[error("invalid argument: {reason}")]
    InvalidArg {
        /// Human-readable description of which argument was invalid and why.
        reason: String,
    },

    /// Allocation failure while building an item, a range, or a preallocated
    /// update buffer.
    #[error("allocation failed: {context}")]
    NoMem {
        /// What was being allocated when the failure occurred.
        context: String,
    },

    /// Coverage says the key is absent, or a tombstone sits at the key.
    #[error("key not found: {key:?}")]
    NotFound {
        /// The key that was looked up.
        key: Key,
    },

    /// `create` found an existing non-tombstone item at the key.
    #[error("key already exists: {key:?}")]
    AlreadyExists {
        /// The key that conflicted.
        key: Key,
    },

    /// Propagated verbatim from the manifest or segment collaborator.
    #[error("I/O error: {0}")]
    IoError(String),

    /// An invariant was violated (e.g. `create_force` found a live,
    /// non-tombstone item where none should exist). Fatal: the cache
    /// state from this point on should be treated as untrustworthy by the
    /// caller's mount.
    #[error("corruption detected: {reason}")]
    Corruption {
        /// Description of the violated invariant.
        reason: String,
    },
}

impl CacheError {
    /// Short machine-readable tag for telemetry/log correlation.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::InvalidArg { .. } => "INVALID_ARG",
            CacheError::NoMem { .. } => "NO_MEM",
            CacheError::NotFound { .. } => "NOT_FOUND",
            CacheError::AlreadyExists { .. } => "ALREADY_EXISTS",
            CacheError::IoError(_) => "IO_ERROR",
            CacheError::Corruption { .. } => "CORRUPTION",
        }
    }

    /// True for errors where the caller is expected to treat them as a
    /// fatal signal about the cache's state rather than a normal negative
    /// result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CacheError::Corruption { .. })
    }
}
