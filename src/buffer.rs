use crossbeam_skiplist::SkipMap;

use crate::entry::{Entry, Key, Value};

/// In-memory sorted write buffer with a fixed entry capacity.
///
/// Keys are unique. Updating a key that is already present always succeeds;
/// a fresh insert fails once the buffer is full, which signals the tree to
/// flush. Lock-free reads come from the skip list, so the read path can probe
/// the buffer while no writer is active.
#[derive(Debug)]
pub struct Buffer {
    data: SkipMap<Key, Value>,
    capacity: usize,
}

impl Buffer {
    /// Creates an empty buffer holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: SkipMap::new(),
            capacity,
        }
    }

    /// Inserts or updates a key-value pair. Returns false if the buffer is
    /// full and the key is not already present.
    pub fn put(&self, key: Key, value: Value) -> bool {
        if self.data.contains_key(&key) || self.data.len() < self.capacity {
            self.data.insert(key, value);
            true
        } else {
            false
        }
    }

    /// Retrieves the current value for a key, including a tombstone.
    pub fn get(&self, key: Key) -> Option<Value> {
        self.data.get(&key).map(|entry| *entry.value())
    }

    /// Entries with `start <= key <= end`, in key order.
    pub fn range(&self, start: Key, end: Key) -> Vec<Entry> {
        self.data
            .range(start..=end)
            .map(|entry| Entry::new(*entry.key(), *entry.value()))
            .collect()
    }

    /// Iterates over all entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        self.data
            .iter()
            .map(|entry| Entry::new(*entry.key(), *entry.value()))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Discards all entries.
    pub fn empty(&mut self) {
        self.data = SkipMap::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::TOMBSTONE;

    #[test]
    fn test_put_and_get() {
        let buffer = Buffer::new(4);

        assert!(buffer.put(2, 20));
        assert!(buffer.put(1, 10));
        assert_eq!(buffer.get(1), Some(10));
        assert_eq!(buffer.get(2), Some(20));
        assert_eq!(buffer.get(3), None);
    }

    #[test]
    fn test_update_in_place() {
        let buffer = Buffer::new(2);

        assert!(buffer.put(1, 10));
        assert!(buffer.put(1, 11));
        assert_eq!(buffer.get(1), Some(11));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_full_buffer_rejects_new_key_but_updates() {
        let buffer = Buffer::new(2);

        assert!(buffer.put(1, 10));
        assert!(buffer.put(2, 20));
        // Full: a new key is rejected, an update still lands.
        assert!(!buffer.put(3, 30));
        assert!(buffer.put(1, 11));
        assert_eq!(buffer.get(1), Some(11));
        assert_eq!(buffer.get(3), None);
    }

    #[test]
    fn test_tombstone_is_stored() {
        let buffer = Buffer::new(2);

        assert!(buffer.put(1, TOMBSTONE));
        assert_eq!(buffer.get(1), Some(TOMBSTONE));
    }

    #[test]
    fn test_range_is_inclusive_and_sorted() {
        let buffer = Buffer::new(8);
        for key in [5, 1, 3, 2, 4] {
            assert!(buffer.put(key, key * 10));
        }

        let entries = buffer.range(2, 4);
        assert_eq!(
            entries,
            vec![Entry::new(2, 20), Entry::new(3, 30), Entry::new(4, 40)]
        );
        assert!(buffer.range(6, 9).is_empty());
    }

    #[test]
    fn test_entries_are_sorted_for_flush() {
        let buffer = Buffer::new(8);
        for key in [3, 1, 2] {
            assert!(buffer.put(key, key));
        }

        let keys: Vec<_> = buffer.entries().map(|entry| entry.key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_discards_entries() {
        let mut buffer = Buffer::new(2);
        assert!(buffer.put(1, 10));
        assert!(buffer.put(2, 20));

        buffer.empty();
        assert!(buffer.is_empty());
        assert_eq!(buffer.get(1), None);
        // Capacity is available again.
        assert!(buffer.put(3, 30));
    }
}
