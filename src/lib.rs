//! fd-state-map: a fixed-bucket concurrent lookup table and a per-descriptor
//! file size cache built on it.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep per-open-file metadata (keyed by descriptor) for an
//!   interposition layer, safe under many threads, without issuing an
//!   `fstat` on every size query.
//! - Layers:
//!   - BucketStore<V>: structural store. A power-of-two array of chains
//!     holding generational keys into a slot arena. No hashing, no locking.
//!   - LookupTable<V>: owns a BucketStore behind one reader/writer lock,
//!     a `fn(&[u8]) -> u32` hash and a fixed key size. Inserts and removes
//!     are exclusive; lookups share the lock.
//!   - FileStateCache: a LookupTable keyed by `RawFd` whose values carry
//!     their own lock over a cached size and its refresh time.
//!   - LifecycleGuard / `process`: exactly-once construction and teardown
//!     of the process-wide cache under concurrent callers.
//!
//! Constraints
//! - Fixed bucket count (at most 65536); no resizing.
//! - One lock for the whole table; it protects membership only. Entry
//!   payloads synchronize themselves.
//! - Keys are unique byte strings of the table's key size; duplicate
//!   inserts fail and leave the existing entry alone.
//! - No reference counting. The table owns each value while it is indexed
//!   and returns it on removal. Handles are generational, so a handle to a
//!   removed entry resolves to nothing rather than to whatever reused its
//!   slot.
//!
//! Size caching
//! - A registered file's size is served from cache while it is younger than
//!   the staleness window (1s by default). The first query after the window
//!   re-stats the descriptor under the entry's exclusive lock.
//! - New entries are stamped with a coarse clock; refreshes use a precise
//!   one. A coarse stamp that runs ahead of the precise clock counts as
//!   fresh.
//!
//! Failure policy
//! - The table returns every failure (`AlreadyExists`, `NotFound`,
//!   `OutOfMemory`, ...). The cache turns registration failures into "not
//!   cached" and callers carry on uncached.
//! - Unregistering a handle the table no longer holds means the cache and
//!   table disagree: logged at error level and a debug assertion.
//!
//! Reentrancy
//! - A hash function or `lookup_with` closure that calls back into the
//!   same table would deadlock on the table lock. A debug-only per-thread
//!   guard turns that into a panic.

mod bucket_store;
#[cfg(test)]
mod bucket_store_proptest;
pub mod config;
mod error;
pub mod file_state;
pub mod hash;
pub mod lifecycle;
pub mod lookup_table;
pub mod process;
mod reentrancy;
pub mod source;
pub mod testing;

// Public surface
pub use bucket_store::{Handle, TableStats};
pub use config::CacheConfig;
pub use error::{Result, TableError};
pub use file_state::{FileState, FileStateCache, StateHandle};
pub use hash::{xor_fold, HashFn};
pub use lifecycle::{LifecycleGuard, Phase};
pub use lookup_table::{LookupTable, MAX_BUCKETS};
pub use source::{Clock, FileMeta, Fstat, StatSource, SystemClock};
