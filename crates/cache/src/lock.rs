//! The lock coverage contract.
//!
//! The item cache never implements locking itself — it is handed an
//! opaque `Lock` by the caller and asserts, on every public operation,
//! that the lock's mode and range actually cover what the operation is
//! about to do, keeping the locking implementation itself behind a narrow
//! trait rather than baking a specific lock into the cache.

use icache_core::{CacheError, Key, Result};

/// The three lock modes a lock object must expose.
///
/// `Write` covers everything `Read` does; `WriteOnly` is its own class,
/// used exclusively by the `*_force` operations that intentionally bypass
/// read-coverage checks (they either already know the key's state from
/// elsewhere, or are populating during recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Covers `lookup`/`next`/`prev` and any operation that only inspects
    /// state.
    Read,
    /// Covers every `Read`-mode operation plus mutations that first
    /// consult coverage (`create`, `update`, `delete`, `dirty`, ...).
    Write,
    /// Covers only the `*_force` operations, which bypass coverage checks
    /// entirely.
    WriteOnly,
}

impl LockMode {
    /// Does this mode satisfy a request for `required`? `Write` ⊇ `Read`;
    /// every other mode only satisfies itself.
    pub fn covers(&self, required: LockMode) -> bool {
        match (self, required) {
            (LockMode::Write, LockMode::Read) => true,
            (have, want) => *have == want,
        }
    }
}

/// An external lease specifying an access mode and a covered key range,
/// asserted against on every public cache operation.
pub trait Lock {
    /// This lock's mode.
    fn mode(&self) -> LockMode;
    /// Inclusive start of the covered key range.
    fn start(&self) -> Key;
    /// Inclusive end of the covered key range.
    fn end(&self) -> Key;

    /// Narrow `last` to this lock's `end`: the effective `last`/`first`
    /// for a traversal is always narrowed to the lock's `start`/`end`.
    fn narrow_last(&self, last: Key) -> Key {
        std::cmp::min(last, self.end())
    }

    /// Narrow `first` to this lock's `start`.
    fn narrow_first(&self, first: Key) -> Key {
        std::cmp::max(first, self.start())
    }
}

/// Assert `lock.mode() ⊇ required` and `lock.start() <= k <= lock.end()`.
/// Violations return `INVALID_ARG`.
pub fn assert_covers(lock: &dyn Lock, required: LockMode, k: Key) -> Result<()> {
    if !lock.mode().covers(required) {
        return Err(CacheError::InvalidArg {
            reason: format!(
                "lock mode {:?} does not cover required mode {:?}",
                lock.mode(),
                required
            ),
        });
    }
    if !(lock.start() <= k && k <= lock.end()) {
        return Err(CacheError::InvalidArg {
            reason: format!(
                "key {k:?} outside lock range [{:?}, {:?}]",
                lock.start(),
                lock.end()
            ),
        });
    }
    Ok(())
}

/// Assert lock coverage over a whole `[start, end]` span rather than a
/// single key, used by range-oriented operations (`invalidate`,
/// `range_cached`, `insert_batch`).
pub fn assert_covers_range(
    lock: &dyn Lock,
    required: LockMode,
    start: Key,
    end: Key,
) -> Result<()> {
    if start > end {
        return Err(CacheError::InvalidArg {
            reason: format!("batch range start {start:?} exceeds end {end:?}"),
        });
    }
    if !lock.mode().covers(required) {
        return Err(CacheError::InvalidArg {
            reason: format!(
                "lock mode {:?} does not cover required mode {:?}",
                lock.mode(),
                required
            ),
        });
    }
    if !(lock.start() <= start && end <= lock.end()) {
        return Err(CacheError::InvalidArg {
            reason: format!(
                "range [{start:?}, {end:?}] outside lock range [{:?}, {:?}]",
                lock.start(),
                lock.end()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLock {
        mode: LockMode,
        start: Key,
        end: Key,
    }

    impl Lock for FakeLock {
        fn mode(&self) -> LockMode {
            self.mode
        }
        fn start(&self) -> Key {
            self.start
        }
        fn end(&self) -> Key {
            self.end
        }
    }

    fn lock(mode: LockMode, start: u64, end: u64) -> FakeLock {
        FakeLock {
            mode,
            start: Key::from(start),
            end: Key::from(end),
        }
    }

    #[test]
    fn write_mode_covers_read_requirement() {
        assert!(LockMode::Write.covers(LockMode::Read));
        assert!(LockMode::Write.covers(LockMode::Write));
        assert!(!LockMode::Read.covers(LockMode::Write));
        assert!(!LockMode::WriteOnly.covers(LockMode::Read));
    }

    #[test]
    fn assert_covers_accepts_in_range_key() {
        let l = lock(LockMode::Write, 10, 20);
        assert!(assert_covers(&l, LockMode::Read, Key::from(15u64)).is_ok());
    }

    #[test]
    fn assert_covers_rejects_out_of_range_key() {
        let l = lock(LockMode::Write, 10, 20);
        let err = assert_covers(&l, LockMode::Read, Key::from(25u64)).unwrap_err();
        assert_eq!(err.kind(), "INVALID_ARG");
    }

    #[test]
    fn assert_covers_rejects_insufficient_mode() {
        let l = lock(LockMode::Read, 10, 20);
        let err = assert_covers(&l, LockMode::Write, Key::from(15u64)).unwrap_err();
        assert_eq!(err.kind(), "INVALID_ARG");
    }

    #[test]
    fn assert_covers_range_rejects_inverted_batch() {
        let l = lock(LockMode::Write, 0, 100);
        let err =
            assert_covers_range(&l, LockMode::Write, Key::from(20u64), Key::from(10u64)).unwrap_err();
        assert_eq!(err.kind(), "INVALID_ARG");
    }

    #[test]
    fn narrow_last_and_first_clamp_to_lock_bounds() {
        let l = lock(LockMode::Read, 10, 20);
        assert_eq!(l.narrow_last(Key::from(30u64)), Key::from(20u64));
        assert_eq!(l.narrow_first(Key::from(0u64)), Key::from(10u64));
    }
}
