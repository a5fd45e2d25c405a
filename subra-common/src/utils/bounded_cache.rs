use std::hash::Hash;

use linked_hash_map::LinkedHashMap;

/// An insertion-order cache with a fixed capacity and LRU eviction. Reads
/// refresh the entry's position, so the entry dropped when the cache is full
/// is always the least recently touched one.
pub struct BoundedCache<K: Eq + Hash, V> {
    capacity: usize,
    entries: LinkedHashMap<K, V>,
}

impl<K: Eq + Hash, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: LinkedHashMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.entries.get_refresh(key).map(|v| &*v)
    }

    pub fn put(&mut self, key: K, value: V) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.entries.pop_front();
        }
        self.entries.insert(key, value);
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
