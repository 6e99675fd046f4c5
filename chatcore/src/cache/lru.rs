use indexmap::IndexMap;
use std::hash::Hash;

/// Bounded least-recently-used map.
///
/// Entries are kept in recency order inside an `IndexMap`: the front is the
/// least recently used, the back the most recent. Both `get` hits and `set`
/// move an entry to the back.
#[derive(Debug, Clone)]
pub struct KeyedCache<K, V>
where
    K: Eq + Hash,
{
    entries: IndexMap<K, V>,
    capacity: usize,
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash,
{
    /// Create a cache holding at most `capacity` entries. A zero capacity is
    /// raised to one.
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            log::warn!("KeyedCache created with capacity 0, using 1");
        }
        let capacity = capacity.max(1);
        Self {
            entries: IndexMap::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, v)| v)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or overwrite `key`, marking it most recently used.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        let (index, _) = self.entries.insert_full(key, value);
        let last = self.entries.len() - 1;
        if index != last {
            self.entries.move_index(index, last);
        }
        if self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0)
        } else {
            None
        }
    }

    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }
}
