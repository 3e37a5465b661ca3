//! Tunables for the item cache and its shrinker.
//!
//! These defaults should be treated as frozen once a cache is in
//! production use: changing them changes observable behavior (how eagerly
//! the shrinker splits ranges, how large a value `create`/`update` will
//! accept) for every mounted cache.

/// Size and boundary limits for one item cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum accepted value length in bytes. `create`/`update` return
    /// `InvalidArg` above this. Default: 1 MiB.
    pub max_val_size: usize,

    /// Minimum number of steps the shrinker's boundary walk takes (in each
    /// direction) once it has found a numerically sound split point,
    /// before it is allowed to stop early. Default: 32.
    pub boundary_min: usize,

    /// Maximum number of steps the shrinker's boundary walk takes in each
    /// direction before giving up and treating that side as having no
    /// neighbor. Default: 300.
    pub boundary_max: usize,

    /// Initial capacity hint for the LRU's backing storage. Purely an
    /// allocation-amortization hint; never changes observable behavior.
    pub initial_lru_capacity: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_val_size: 1024 * 1024,
            boundary_min: 32,
            boundary_max: 300,
            initial_lru_capacity: 1024,
        }
    }
}

impl Limits {
    /// Limits tuned for fast, deterministic unit/integration tests: a
    /// small `max_val_size` and a narrow shrinker boundary walk so tests
    /// can build tiny scenarios that still exercise every branch of the
    /// boundary walk without allocating thousands of items.
    pub fn for_testing() -> Self {
        Limits {
            max_val_size: 4096,
            boundary_min: 2,
            boundary_max: 8,
            initial_lru_capacity: 16,
        }
    }

    /// Validate a candidate value length against `max_val_size`.
    pub fn validate_val_size(&self, len: usize) -> Result<(), crate::error::CacheError> {
        if len > self.max_val_size {
            return Err(crate::error::CacheError::InvalidArg {
                reason: format!(
                    "value length {len} exceeds max_val_size {}",
                    self.max_val_size
                ),
            });
        }
        Ok(())
    }
}
