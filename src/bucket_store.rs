//! BucketStore: structural layer with fixed hash chains and stable handles.
//!
//! Entries live in a generational slot arena; each bucket is an ordered chain
//! of arena keys. Unlinking an entry removes it from its chain and hands the
//! owned `(key, value)` back to the caller. The store does no hashing and no
//! locking; `LookupTable` supplies both.

use crate::error::{Result, TableError};
use slotmap::{DefaultKey, SlotMap};

/// Stable reference to an entry. Stays unique across slot reuse, so a handle
/// to a removed entry never resolves to a newer one.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.0
    }
}

#[derive(Debug)]
struct Entry<V> {
    key: Box<[u8]>,
    value: V,
    bucket: u32,
}

/// Occupancy snapshot used for bucket-count tuning.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TableStats {
    pub entries: usize,
    pub buckets: usize,
    pub empty_buckets: usize,
    pub longest_chain: usize,
}

#[derive(Debug)]
pub(crate) struct BucketStore<V> {
    slots: SlotMap<DefaultKey, Entry<V>>,
    buckets: Box<[Vec<DefaultKey>]>,
}

impl<V> BucketStore<V> {
    /// Allocates `1 << shift` empty chains.
    pub(crate) fn with_shift(shift: u8) -> Result<Self> {
        let count = 1usize << shift;
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(count)
            .map_err(|_| TableError::OutOfMemory)?;
        buckets.resize_with(count, Vec::new);
        Ok(Self {
            slots: SlotMap::with_key(),
            buckets: buckets.into_boxed_slice(),
        })
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket index for a hash: the low bits selected by the bucket mask.
    pub(crate) fn bucket_of(&self, hash: u32) -> u32 {
        hash & (self.buckets.len() as u32 - 1)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn find(&self, bucket: u32, key: &[u8]) -> Option<Handle> {
        self.buckets[bucket as usize]
            .iter()
            .copied()
            .find(|&k| {
                self.slots
                    .get(k)
                    .map(|e| &*e.key == key)
                    .unwrap_or(false)
            })
            .map(Handle::new)
    }

    /// Appends to the tail of `bucket` unless the key is already present, in
    /// which case the rejected value is handed back.
    pub(crate) fn insert(
        &mut self,
        bucket: u32,
        key: Box<[u8]>,
        value: V,
    ) -> std::result::Result<Handle, V> {
        if self.find(bucket, &key).is_some() {
            return Err(value);
        }
        let k = self.slots.insert(Entry { key, value, bucket });
        self.buckets[bucket as usize].push(k);
        Ok(Handle::new(k))
    }

    /// Like `insert`, but `default` runs only when the key is vacant.
    pub(crate) fn insert_with<F>(&mut self, bucket: u32, key: Box<[u8]>, default: F) -> Option<Handle>
    where
        F: FnOnce() -> V,
    {
        if self.find(bucket, &key).is_some() {
            return None;
        }
        let value = default();
        let k = self.slots.insert(Entry { key, value, bucket });
        self.buckets[bucket as usize].push(k);
        Some(Handle::new(k))
    }

    pub(crate) fn remove(&mut self, handle: Handle) -> Option<(Box<[u8]>, V)> {
        let k = handle.raw_handle();

        // Remove slot
        let entry = self.slots.remove(k)?;

        // Unlink from its chain, keeping the order of the survivors
        let chain = &mut self.buckets[entry.bucket as usize];
        let pos = chain
            .iter()
            .position(|&kk| kk == k)
            .expect("bucket chain out of sync with slot arena");
        chain.remove(pos);

        Some((entry.key, entry.value))
    }

    pub(crate) fn handle_key(&self, h: Handle) -> Option<&[u8]> {
        self.slots.get(h.raw_handle()).map(|e| &*e.key)
    }

    pub(crate) fn handle_value(&self, h: Handle) -> Option<&V> {
        self.slots.get(h.raw_handle()).map(|e| &e.value)
    }

    pub(crate) fn handle_value_mut(&mut self, h: Handle) -> Option<&mut V> {
        self.slots.get_mut(h.raw_handle()).map(|e| &mut e.value)
    }

    /// Keys of one chain in insertion order.
    #[cfg(test)]
    pub(crate) fn chain_keys(&self, bucket: u32) -> impl Iterator<Item = &[u8]> + '_ {
        self.buckets[bucket as usize]
            .iter()
            .filter_map(move |&k| self.slots.get(k).map(|e| &*e.key))
    }

    /// Empties every chain and returns all values in bucket order.
    pub(crate) fn drain(&mut self) -> Vec<V> {
        let mut values = Vec::with_capacity(self.slots.len());
        for chain in self.buckets.iter_mut() {
            for k in chain.drain(..) {
                if let Some(entry) = self.slots.remove(k) {
                    values.push(entry.value);
                }
            }
        }
        debug_assert!(self.slots.is_empty());
        values
    }

    pub(crate) fn stats(&self) -> TableStats {
        let mut stats = TableStats {
            entries: self.slots.len(),
            buckets: self.buckets.len(),
            ..TableStats::default()
        };
        for chain in self.buckets.iter() {
            if chain.is_empty() {
                stats.empty_buckets += 1;
            }
            stats.longest_chain = stats.longest_chain.max(chain.len());
        }
        stats
    }
}
