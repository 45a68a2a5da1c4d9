//! LookupTable: fixed-bucket hash table behind a single reader/writer lock.
//!
//! Keys are opaque byte strings of one fixed length per table. The table owns
//! each value for as long as it is indexed and hands it back on removal.
//! Outside code reaches a value only through a closure run under the shared
//! lock or through a generational [`Handle`], so nothing can observe a value
//! after it has been removed.
//!
//! One lock covers every bucket. Inserts and removes take it exclusively,
//! lookups share it. Sharding it per bucket would not change this API.

use crate::bucket_store::{BucketStore, Handle, TableStats};
use crate::error::{Result, TableError};
use crate::hash::{xor_fold, HashFn};
use crate::reentrancy::DebugReentrancy;
use parking_lot::RwLock;
use std::fmt;

/// Upper bound on the bucket count; larger size hints are clamped.
pub const MAX_BUCKETS: usize = 1 << 16;

/// Smallest shift whose bucket count covers `size_hint`, after clamping the
/// hint to [`MAX_BUCKETS`]. Hints of 0 and 1 both give a single bucket.
pub fn bucket_shift(size_hint: usize) -> u8 {
    size_hint.clamp(1, MAX_BUCKETS).next_power_of_two().trailing_zeros() as u8
}

pub struct LookupTable<V> {
    name: String,
    shift: u8,
    key_size: usize,
    hash: HashFn,
    store: RwLock<BucketStore<V>>,
    reentrancy: DebugReentrancy,
}

impl<V> LookupTable<V> {
    /// Builds a table with `2^shift >= size_hint` buckets. `hash` defaults to
    /// [`xor_fold`].
    pub fn create(size_hint: usize, name: &str, hash: Option<HashFn>, key_size: usize) -> Result<Self> {
        if key_size == 0 {
            return Err(TableError::InvalidKeySize);
        }
        let shift = bucket_shift(size_hint);
        let store = BucketStore::with_shift(shift)?;
        tracing::debug!(
            table = name,
            buckets = store.bucket_count(),
            key_size,
            "lookup table created"
        );
        Ok(Self {
            name: name.to_owned(),
            shift,
            key_size,
            hash: hash.unwrap_or(xor_fold),
            store: RwLock::new(store),
            reentrancy: DebugReentrancy::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    pub fn bucket_count(&self) -> usize {
        1 << self.shift
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn len(&self) -> usize {
        let _g = self.reentrancy.enter();
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        let _g = self.reentrancy.enter();
        self.store.read().is_empty()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(TableError::KeyLength {
                expected: self.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Copies the key into an owned buffer; allocation failure is reported
    /// rather than aborting.
    fn own_key(&self, key: &[u8]) -> Result<Box<[u8]>> {
        self.check_key(key)?;
        #[cfg(test)]
        if fail_alloc::take() {
            return Err(TableError::OutOfMemory);
        }
        let mut owned = Vec::new();
        owned
            .try_reserve_exact(key.len())
            .map_err(|_| TableError::OutOfMemory)?;
        owned.extend_from_slice(key);
        Ok(owned.into_boxed_slice())
    }

    /// Indexes `value` under `key`. On `AlreadyExists` the existing entry is
    /// untouched and `value` is dropped once the lock is released.
    pub fn insert(&self, key: &[u8], value: V) -> Result<Handle> {
        let owned = self.own_key(key)?;
        let _g = self.reentrancy.enter();
        let inserted = {
            let mut store = self.store.write();
            let bucket = store.bucket_of((self.hash)(key));
            store.insert(bucket, owned, value)
        };
        inserted.map_err(|_rejected| TableError::AlreadyExists)
    }

    /// Like [`insert`](Self::insert), but `default` runs only when the key is
    /// vacant, under the exclusive lock.
    pub fn insert_with<F>(&self, key: &[u8], default: F) -> Result<Handle>
    where
        F: FnOnce() -> V,
    {
        let owned = self.own_key(key)?;
        let _g = self.reentrancy.enter();
        let mut store = self.store.write();
        let bucket = store.bucket_of((self.hash)(key));
        store
            .insert_with(bucket, owned, default)
            .ok_or(TableError::AlreadyExists)
    }

    /// Runs `f` on the value stored under `key` while holding the shared lock.
    /// `f` must not call back into this table.
    pub fn lookup_with<R, F>(&self, key: &[u8], f: F) -> Result<R>
    where
        F: FnOnce(&V) -> R,
    {
        self.check_key(key)?;
        let _g = self.reentrancy.enter();
        let store = self.store.read();
        let bucket = store.bucket_of((self.hash)(key));
        store
            .find(bucket, key)
            .and_then(|h| store.handle_value(h))
            .map(f)
            .ok_or(TableError::NotFound)
    }

    /// Returns a copy of the value stored under `key`.
    pub fn lookup(&self, key: &[u8]) -> Result<V>
    where
        V: Clone,
    {
        self.lookup_with(key, V::clone)
    }

    pub fn find(&self, key: &[u8]) -> Option<Handle> {
        self.check_key(key).ok()?;
        let _g = self.reentrancy.enter();
        let store = self.store.read();
        let bucket = store.bucket_of((self.hash)(key));
        store.find(bucket, key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    /// Resolves `handle` under the shared lock without hashing. Stale handles
    /// give `None`.
    pub fn with_handle<R, F>(&self, handle: Handle, f: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        let _g = self.reentrancy.enter();
        let store = self.store.read();
        store.handle_value(handle).map(f)
    }

    /// Runs `f` with mutable access to the entry behind `handle`, under the
    /// exclusive lock.
    pub fn with_handle_mut<R, F>(&self, handle: Handle, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        let _g = self.reentrancy.enter();
        let mut store = self.store.write();
        store.handle_value_mut(handle).map(f)
    }

    /// Copy of the key an entry was inserted under.
    pub fn handle_key(&self, handle: Handle) -> Option<Box<[u8]>> {
        let _g = self.reentrancy.enter();
        let store = self.store.read();
        store.handle_key(handle).map(Box::from)
    }

    /// Unlinks the entry for `key` and returns ownership of its value.
    pub fn remove(&self, key: &[u8]) -> Result<V> {
        self.check_key(key)?;
        let _g = self.reentrancy.enter();
        let removed = {
            let mut store = self.store.write();
            let bucket = store.bucket_of((self.hash)(key));
            store.find(bucket, key).and_then(|h| store.remove(h))
        };
        removed.map(|(_key, value)| value).ok_or(TableError::NotFound)
    }

    pub fn remove_handle(&self, handle: Handle) -> Option<(Box<[u8]>, V)> {
        let _g = self.reentrancy.enter();
        let mut store = self.store.write();
        store.remove(handle)
    }

    #[cfg(test)]
    pub(crate) fn store_for_tests(&self) -> parking_lot::RwLockReadGuard<'_, BucketStore<V>> {
        self.store.read()
    }

    pub fn stats(&self) -> TableStats {
        let _g = self.reentrancy.enter();
        self.store.read().stats()
    }

    /// Releases every entry and the table itself. Values are dropped after
    /// the lock is released. Returns how many entries were still indexed.
    pub fn destroy(self) -> usize {
        let values = {
            let _g = self.reentrancy.enter();
            let mut store = self.store.write();
            store.drain()
        };
        let released = values.len();
        drop(values);
        tracing::debug!(table = %self.name, released, "lookup table destroyed");
        released
    }
}

impl<V> fmt::Debug for LookupTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupTable")
            .field("name", &self.name)
            .field("buckets", &self.bucket_count())
            .field("key_size", &self.key_size)
            .finish_non_exhaustive()
    }
}
