use crossbeam_skiplist::SkipMap;

use crate::kv::{KVPair, Key, Value};

/// A bounded, ordered in-memory run.
///
/// One of the R runs in the write buffer ring. The skiplist keeps entries in
/// key order; inserting an existing key overwrites its value. The coordinator
/// rotates to the next run before capacity is exceeded, so `insert` never
/// sees more than `capacity` distinct keys.
#[derive(Debug)]
pub struct MemRun {
    data: SkipMap<Key, Value>,
    capacity: usize,
}

impl MemRun {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: SkipMap::new(),
            capacity,
        }
    }

    /// Insert a pair, overwriting any existing value for the key.
    pub fn insert(&self, key: Key, value: Value) {
        self.data.insert(key, value);
    }

    /// Point lookup. Tombstone values are returned as-is.
    pub fn get(&self, key: Key) -> Option<Value> {
        self.data.get(&key).map(|entry| *entry.value())
    }

    /// All pairs with `lo <= key < hi`, in key order.
    pub fn scan(&self, lo: Key, hi: Key) -> Vec<KVPair> {
        self.data
            .range(lo..hi)
            .map(|entry| KVPair::new(*entry.key(), *entry.value()))
            .collect()
    }

    /// Every pair in key order.
    pub fn all(&self) -> Vec<KVPair> {
        self.data
            .iter()
            .map(|entry| KVPair::new(*entry.key(), *entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Smallest key present, if any.
    pub fn min(&self) -> Option<Key> {
        self.data.front().map(|entry| *entry.key())
    }

    /// Largest key present, if any.
    pub fn max(&self) -> Option<Key> {
        self.data.back().map(|entry| *entry.key())
    }
}
