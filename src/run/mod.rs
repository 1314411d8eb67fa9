//! Immutable on-disk runs.
//!
//! A run is a sorted sequence of fixed-width entries written once and never
//! mutated. Its lifecycle is a small state machine:
//!
//! ```text
//! Unmapped --map_write()--> Writing --unmap_write()--> Unmapped
//! Unmapped --map_read()---> Readable --unmap_read()--> Unmapped
//! ```
//!
//! While `Writing`, entries are appended in strictly increasing key order and
//! a Bloom filter plus fence pointers are accumulated alongside. Sealing the
//! run persists both in a checksummed footer (see [`meta`]). While
//! `Readable`, the file is memory-mapped and serves shared point and range
//! lookups: the filter screens out absent keys, the fence pointers narrow the
//! search to one page, and a binary search finishes inside it.

mod meta;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use memmap2::Mmap;

use crate::entry::{Entry, Key, Value, ENTRY_SIZE};
use crate::error::{Error, Result};
use meta::RunMeta;

/// Entries per fence-pointer page: one page of entries spans 4096 bytes.
pub const PAGE_ENTRIES: usize = 4096 / ENTRY_SIZE;

/// False-positive rate the per-run Bloom filter is sized for.
const BLOOM_FP_RATE: f64 = 0.01;

enum State {
    /// Open for sequential append; not yet readable.
    Writing(Writer),
    /// Memory-mapped for point and range reads.
    Readable(Reader),
    /// Closed. The file stays on disk until the run is removed.
    Unmapped,
}

struct Writer {
    file: BufWriter<File>,
    filter: Bloom<Key>,
    fences: Vec<Key>,
    last_key: Option<Key>,
}

struct Reader {
    mmap: Mmap,
    filter: Bloom<Key>,
    fences: Vec<Key>,
}

/// An immutable on-disk sorted sequence of entries.
pub struct Run {
    path: PathBuf,
    /// Number of entries in the run.
    pub size: usize,
    /// Declared entry capacity.
    pub max_run_size: usize,
    state: State,
}

impl Run {
    /// Creates a handle for a run that does not exist on disk yet.
    pub fn new(path: impl Into<PathBuf>, max_run_size: usize) -> Self {
        Self {
            path: path.into(),
            size: 0,
            max_run_size,
            state: State::Unmapped,
        }
    }

    /// Reopens an existing run file and maps it for reading.
    pub fn open(path: impl Into<PathBuf>, max_run_size: usize) -> Result<Self> {
        let mut run = Self::new(path, max_run_size);
        run.map_read()?;
        Ok(run)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the backing file and opens it for sequential append.
    pub fn map_write(&mut self) -> Result<()> {
        if !matches!(self.state, State::Unmapped) {
            return Err(Error::InvalidOperation(
                "run is already mapped".to_string(),
            ));
        }
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&self.path)?;
        self.state = State::Writing(Writer {
            file: BufWriter::new(file),
            filter: Bloom::new_for_fp_rate(self.max_run_size.max(1), BLOOM_FP_RATE),
            fences: Vec::new(),
            last_key: None,
        });
        Ok(())
    }

    /// Appends an entry. The caller guarantees strictly increasing keys and
    /// that the declared capacity is not exceeded.
    pub fn put(&mut self, entry: Entry) -> Result<()> {
        let size = self.size;
        let writer = match &mut self.state {
            State::Writing(writer) => writer,
            _ => {
                return Err(Error::InvalidOperation(
                    "run is not open for writing".to_string(),
                ))
            }
        };
        debug_assert!(
            writer.last_key.map_or(true, |last| entry.key > last),
            "keys must arrive in strictly increasing order"
        );
        debug_assert!(size < self.max_run_size, "run past its declared capacity");

        if size % PAGE_ENTRIES == 0 {
            writer.fences.push(entry.key);
        }
        writer.filter.set(&entry.key);
        entry.write_to(&mut writer.file)?;
        writer.last_key = Some(entry.key);
        self.size += 1;
        Ok(())
    }

    /// Seals the run: flushes the entry region, appends the footer, and
    /// closes the file.
    pub fn unmap_write(&mut self) -> Result<()> {
        let writer = match std::mem::replace(&mut self.state, State::Unmapped) {
            State::Writing(writer) => writer,
            other => {
                self.state = other;
                return Err(Error::InvalidOperation(
                    "run is not open for writing".to_string(),
                ));
            }
        };
        let mut file = writer
            .file
            .into_inner()
            .map_err(|e| Error::IO(e.to_string()))?;
        let meta = RunMeta {
            entry_count: self.size as u64,
            fences: writer.fences,
            filter_bitmap: writer.filter.bitmap(),
            filter_bits: writer.filter.number_of_bits(),
            filter_hashes: writer.filter.number_of_hash_functions(),
            filter_sip_keys: writer.filter.sip_keys(),
        };
        meta.write_to(&mut file, (self.size * ENTRY_SIZE) as u64)?;
        file.flush()?;
        Ok(())
    }

    /// Maps the run for reading, restoring the fence pointers and Bloom
    /// filter from its checksum-verified footer.
    pub fn map_read(&mut self) -> Result<()> {
        match self.state {
            State::Unmapped => {}
            State::Readable(_) => return Ok(()),
            State::Writing(_) => {
                return Err(Error::InvalidOperation(
                    "run is still being written".to_string(),
                ))
            }
        }
        let mut file = File::open(&self.path)?;
        let (meta, data_len) = RunMeta::read_from(&mut file)?;
        if data_len != meta.entry_count * ENTRY_SIZE as u64 {
            return Err(Error::Corrupt(format!(
                "entry region is {data_len} bytes but the footer declares {} entries",
                meta.entry_count
            )));
        }
        let mmap = unsafe { Mmap::map(&file)? };
        let filter = Bloom::from_existing(
            &meta.filter_bitmap,
            meta.filter_bits,
            meta.filter_hashes,
            meta.filter_sip_keys,
        );
        self.size = meta.entry_count as usize;
        self.state = State::Readable(Reader {
            mmap,
            filter,
            fences: meta.fences,
        });
        Ok(())
    }

    /// Releases the read mapping. The file stays on disk.
    pub fn unmap_read(&mut self) {
        if matches!(self.state, State::Readable(_)) {
            self.state = State::Unmapped;
        }
    }

    /// Unmaps the run and deletes its backing file.
    pub fn remove(mut self) -> Result<()> {
        // The mapping must be gone before the unlink.
        self.unmap_read();
        fs::remove_file(&self.path)?;
        Ok(())
    }

    fn reader(&self) -> Result<&Reader> {
        match &self.state {
            State::Readable(reader) => Ok(reader),
            _ => Err(Error::InvalidOperation(
                "run is not mapped for reading".to_string(),
            )),
        }
    }

    /// Point lookup. Returns the stored value, including a tombstone.
    pub fn get(&self, key: Key) -> Result<Option<Value>> {
        let reader = self.reader()?;
        if self.size == 0 || !reader.filter.check(&key) {
            return Ok(None);
        }
        let index = reader.lower_bound(self.size, key);
        if index < self.size {
            let entry = reader.entry_at(index);
            if entry.key == key {
                return Ok(Some(entry.value));
            }
        }
        Ok(None)
    }

    /// Entries with `start <= key <= end`, in key order.
    pub fn range(&self, start: Key, end: Key) -> Result<Vec<Entry>> {
        let reader = self.reader()?;
        let mut entries = Vec::new();
        let mut index = reader.lower_bound(self.size, start);
        while index < self.size {
            let entry = reader.entry_at(index);
            if entry.key > end {
                break;
            }
            entries.push(entry);
            index += 1;
        }
        Ok(entries)
    }

    /// Iterates over every entry in key order.
    pub fn iter(&self) -> Result<impl Iterator<Item = Entry> + '_> {
        let reader = self.reader()?;
        Ok((0..self.size).map(move |index| reader.entry_at(index)))
    }
}

impl Reader {
    fn entry_at(&self, index: usize) -> Entry {
        Entry::decode(&self.mmap[index * ENTRY_SIZE..])
    }

    /// Index of the first entry with key >= `key`. The fence pointers narrow
    /// the binary search to a single page.
    fn lower_bound(&self, size: usize, key: Key) -> usize {
        if size == 0 {
            return 0;
        }
        let page = self
            .fences
            .partition_point(|fence| *fence <= key)
            .saturating_sub(1);
        let lo = page * PAGE_ENTRIES;
        let hi = (lo + PAGE_ENTRIES).min(size);

        let mut left = lo;
        let mut right = hi;
        while left < right {
            let mid = left + (right - left) / 2;
            if self.entry_at(mid).key < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }
}
