//! Shared primitives for the item cache: the key type, the closed error
//! set, and the size/boundary limits the cache and shrinker are tuned by.
//!
//! This crate has no knowledge of items, ranges, or the tree that indexes
//! them — see `icache-cache` for that. It exists so the key/error/limits
//! vocabulary can be reused by the cache crate and by any future crate that
//! talks to the same manifest/segment/lock collaborators without pulling
//! in the cache implementation itself.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod limits;

pub use error::{CacheError, Result};
pub use key::Key;
pub use limits::Limits;
