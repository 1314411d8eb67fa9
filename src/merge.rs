//! K-way merge across sorted entry streams.
//!
//! The merge context combines several sorted, unique-key streams into one
//! sorted, deduplicated sequence. Streams are registered in freshness order:
//! the stream added first is the newest, and wins whenever multiple streams
//! carry the same key. This is how a flush batch or a range query resolves
//! the same key appearing in several runs.
//!
//! A min-heap over the head of each stream picks the next smallest key; on a
//! tie, the lowest source index (the freshest stream) surfaces first and the
//! stale versions are drained in the same step, so the heap is empty exactly
//! when every input is exhausted.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::{Entry, Key, Value};

type EntryStream<'a> = Box<dyn Iterator<Item = Entry> + 'a>;

/// Head element of one input stream.
struct HeapEntry {
    key: Key,
    value: Value,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior: smallest key first, and among equal
        // keys the lowest (freshest) source.
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.source.cmp(&other.source).reverse(),
            ord => ord.reverse(),
        }
    }
}

/// Merges registered streams into one freshness-resolved sorted sequence.
pub struct MergeContext<'a> {
    streams: Vec<EntryStream<'a>>,
    heap: BinaryHeap<HeapEntry>,
}

impl<'a> MergeContext<'a> {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            heap: BinaryHeap::new(),
        }
    }

    /// Registers a sorted input stream. Streams added earlier are fresher and
    /// win duplicate keys.
    pub fn add(&mut self, stream: impl Iterator<Item = Entry> + 'a) {
        let source = self.streams.len();
        let mut stream: EntryStream<'a> = Box::new(stream);
        if let Some(entry) = stream.next() {
            self.heap.push(HeapEntry {
                key: entry.key,
                value: entry.value,
                source,
            });
        }
        self.streams.push(stream);
    }

    /// True once every input stream is exhausted.
    pub fn done(&self) -> bool {
        self.heap.is_empty()
    }

    /// Refills the heap from the stream that just surfaced an entry.
    fn advance(&mut self, source: usize) {
        if let Some(entry) = self.streams[source].next() {
            self.heap.push(HeapEntry {
                key: entry.key,
                value: entry.value,
                source,
            });
        }
    }
}

impl Default for MergeContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for MergeContext<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        let head = self.heap.pop()?;
        self.advance(head.source);

        // Consume stale versions of this key from older streams so the heap
        // only ever holds keys that are still pending.
        while let Some(dup) = self.heap.peek() {
            if dup.key != head.key {
                break;
            }
            let source = dup.source;
            self.heap.pop();
            self.advance(source);
        }

        Some(Entry::new(head.key, head.value))
    }
}
