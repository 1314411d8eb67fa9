//! The LSM tree façade.
//!
//! # Data flow
//!
//! ```text
//! writes ──> Buffer ──flush──> Level 0 ──merge──> Level 1 ──merge──> ...
//!            (memory)          (runs)             (runs, fanout× larger)
//! ```
//!
//! Writes land in the in-memory buffer. When a write cannot fit, the buffer
//! is flushed as a new run at level 0; when a level has no free run slot, a
//! batch of its oldest runs is k-way merged into a single run one level down.
//! Capacities grow geometrically, so each level absorbs `fanout` merges from
//! the level above before overflowing itself.
//!
//! Reads go the other way: the buffer first, then every run from newest to
//! oldest until the first hit. The run search fans out over a worker pool,
//! with the freshest hit winning. Deletions are writes of a tombstone value
//! that shadows older versions until a merge into the deepest level drops it.
//!
//! The write path (`put`, `del`, `load` and the merges they trigger) is
//! single-threaded against the tree; only the read path runs in parallel.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rayon::ThreadPool;

use crate::buffer::Buffer;
use crate::config::TreeConfig;
use crate::entry::{Entry, Key, Value, TOMBSTONE};
use crate::error::{Error, Result};
use crate::level::Level;
use crate::merge::MergeContext;
use crate::run::Run;

/// An LSM tree mapping fixed-width integer keys to fixed-width integer
/// values.
pub struct LsmTree {
    config: TreeConfig,
    buffer: Buffer,
    levels: Vec<Level>,
    pool: ThreadPool,
    /// Tree-wide run creation counter. It is embedded in file names so that
    /// per-level freshness order survives a restart.
    next_seq: u64,
}

impl LsmTree {
    /// Opens a tree in `dir` with default parameters.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(TreeConfig::new(dir))
    }

    /// Opens a tree with the given configuration, rediscovering any runs a
    /// previous instance left in the data directory.
    pub fn open_with_config(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let mut levels = Vec::with_capacity(config.depth);
        let mut max_run_size = config.buffer_capacity;
        for _ in 0..config.depth {
            levels.push(Level::new(config.fanout, max_run_size));
            max_run_size *= config.fanout;
        }

        let mut tree = Self {
            buffer: Buffer::new(config.buffer_capacity),
            levels,
            pool,
            next_seq: 0,
            config,
        };
        tree.recover()?;
        Ok(tree)
    }

    /// Read-only view of the levels, oldest run first within each.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Rebuilds level contents from run files left by a previous instance.
    /// File names carry the level and creation order; footers carry the rest.
    fn recover(&mut self) -> Result<()> {
        let mut found = Vec::new();
        for dir_entry in fs::read_dir(&self.config.dir)? {
            let path = dir_entry?.path();
            if let Some((level, seq)) = parse_run_name(&path) {
                found.push((level, seq, path));
            }
        }
        if found.is_empty() {
            return Ok(());
        }

        let count = found.len();
        found.sort_by_key(|&(level, seq, _)| (level, seq));
        for (level, seq, path) in found {
            if level >= self.levels.len() {
                return Err(Error::Corrupt(format!(
                    "run {} belongs to level {level}, but the tree only has {} levels",
                    path.display(),
                    self.levels.len()
                )));
            }
            if self.levels[level].remaining() == 0 {
                return Err(Error::Corrupt(format!(
                    "level {level} holds more runs than its fanout allows"
                )));
            }
            let run = Run::open(&path, self.levels[level].max_run_size)?;
            self.levels[level].runs.push(run);
            self.next_seq = self.next_seq.max(seq + 1);
        }
        tracing::info!(runs = count, dir = %self.config.dir.display(), "recovered runs");
        Ok(())
    }

    fn next_run_path(&mut self, level: usize) -> PathBuf {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.config.dir.join(format!("L{level:02}-{seq:08}.run"))
    }

    /// Inserts or updates a key. If the buffer cannot take the write, it is
    /// flushed to level 0 first, merging level 0 down when it has no free
    /// slot.
    pub fn put(&mut self, key: Key, value: Value) -> Result<()> {
        if self.buffer.put(key, value) {
            return Ok(());
        }

        if self.levels[0].remaining() == 0 {
            self.merge_down(0)?;
        }

        let mut run = Run::new(self.next_run_path(0), self.levels[0].max_run_size);
        run.map_write()?;
        for entry in self.buffer.entries() {
            run.put(entry)?;
        }
        run.unmap_write()?;
        run.map_read()?;
        tracing::debug!(entries = run.size, path = %run.path().display(), "flushed buffer");
        self.levels[0].runs.push(run);

        self.buffer.empty();
        let inserted = self.buffer.put(key, value);
        debug_assert!(inserted, "an emptied buffer must accept one entry");
        Ok(())
    }

    /// Records a deletion for `key`.
    pub fn del(&mut self, key: Key) -> Result<()> {
        self.put(key, TOMBSTONE)
    }

    /// Merges the oldest runs of level `current` into a single run one level
    /// down, recursively freeing space below first when the next level is
    /// full. Tombstones are dropped once they land in the deepest level.
    fn merge_down(&mut self, current: usize) -> Result<()> {
        if self.levels[current].is_empty() {
            return Ok(());
        }
        if current + 1 == self.levels.len() {
            return Err(Error::TreeFull);
        }
        let next = current + 1;
        if self.levels[next].remaining() == 0 {
            self.merge_down(next)?;
            debug_assert!(self.levels[next].remaining() > 0);
        }

        // A degenerate ratio must still consume at least one run, or the
        // level could never drain.
        let merge_size = {
            let level = &self.levels[current];
            ((self.config.merge_ratio * level.max_runs as f64) as usize)
                .clamp(1, level.runs.len())
        };
        let deepest = next + 1 == self.levels.len();
        tracing::debug!(level = current, target = next, runs = merge_size, "merging down");

        let consumed: Vec<Run> = self.levels[current].runs.drain(..merge_size).collect();
        let mut run = Run::new(self.next_run_path(next), self.levels[next].max_run_size);
        run.map_write()?;
        {
            let mut merge = MergeContext::new();
            // The newest runs of the batch sit at its tail; register them
            // first so they win duplicate keys.
            for source in consumed.iter().rev() {
                merge.add(source.iter()?);
            }
            for entry in merge {
                // Nothing older can exist below the deepest level, so a
                // tombstone arriving there has nothing left to shadow.
                if deepest && entry.is_tombstone() {
                    continue;
                }
                run.put(entry)?;
            }
        }
        run.unmap_write()?;
        run.map_read()?;
        self.levels[next].runs.push(run);

        for source in consumed {
            if let Err(e) = source.remove() {
                tracing::warn!(error = %e, "failed to delete merged run file");
            }
        }
        Ok(())
    }

    /// Global freshness index over runs: 0 is the newest run anywhere, with
    /// indexes increasing toward the oldest run of the deepest level.
    fn run_at(&self, mut index: usize) -> Option<&Run> {
        for level in &self.levels {
            if index < level.runs.len() {
                // The newest runs are at the tail.
                return Some(&level.runs[level.runs.len() - index - 1]);
            }
            index -= level.runs.len();
        }
        None
    }

    /// Looks up the freshest value for `key`. Returns `None` for a missing
    /// or deleted key.
    pub fn get(&self, key: Key) -> Result<Option<Value>> {
        if let Some(value) = self.buffer.get(key) {
            return Ok((value != TOMBSTONE).then_some(value));
        }

        let counter = AtomicUsize::new(0);
        let best: Mutex<Option<(usize, Value)>> = Mutex::new(None);
        let failed: Mutex<Option<Error>> = Mutex::new(None);

        // Every worker loops claiming the next unsearched run. Workers stop
        // when the indexes run out or a hit at least as fresh as their claim
        // exists; the smallest-index hit is the freshness winner.
        self.pool.broadcast(|_| loop {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let found = best.lock().unwrap();
            if found.map_or(false, |(at, _)| at <= index) {
                return;
            }
            drop(found);

            let Some(run) = self.run_at(index) else { return };
            match run.get(key) {
                Ok(Some(value)) => {
                    let mut found = best.lock().unwrap();
                    if found.map_or(true, |(at, _)| index < at) {
                        *found = Some((index, value));
                    }
                    return;
                }
                Ok(None) => continue,
                Err(e) => {
                    let mut slot = failed.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    return;
                }
            }
        });

        if let Some(e) = failed.into_inner().unwrap() {
            return Err(e);
        }
        match best.into_inner().unwrap() {
            Some((_, value)) if value != TOMBSTONE => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Collects the live entries in the half-open key range `[start, end)`:
    /// the newest version of each key, sorted by key, tombstones removed.
    pub fn range(&self, start: Key, end: Key) -> Result<Vec<Entry>> {
        if end <= start {
            return Ok(Vec::new());
        }
        let end_inclusive = end - 1;

        // Sub-ranges keyed by freshness rank: 0 is the buffer, run index + 1
        // for the runs. The map's ascending order is newest first.
        let ranges: Mutex<BTreeMap<usize, Vec<Entry>>> = Mutex::new(BTreeMap::new());
        ranges
            .lock()
            .unwrap()
            .insert(0, self.buffer.range(start, end_inclusive));

        let counter = AtomicUsize::new(0);
        let failed: Mutex<Option<Error>> = Mutex::new(None);
        self.pool.broadcast(|_| loop {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let Some(run) = self.run_at(index) else { return };
            match run.range(start, end_inclusive) {
                Ok(sub) => {
                    ranges.lock().unwrap().insert(index + 1, sub);
                }
                Err(e) => {
                    let mut slot = failed.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    return;
                }
            }
        });
        if let Some(e) = failed.into_inner().unwrap() {
            return Err(e);
        }

        let ranges = ranges.into_inner().unwrap();
        let mut merge = MergeContext::new();
        for sub in ranges.values() {
            merge.add(sub.iter().copied());
        }
        Ok(merge.filter(|entry| !entry.is_tombstone()).collect())
    }

    /// Bulk-loads fixed-width records from `path`, applying each as a put.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::FileNotFound(path.display().to_string()),
            _ => e.into(),
        })?;

        let mut reader = BufReader::new(file);
        let mut records = 0u64;
        while let Some(entry) = Entry::read_from(&mut reader)? {
            self.put(entry.key, entry.value)?;
            records += 1;
        }
        tracing::debug!(records, path = %path.display(), "bulk load complete");
        Ok(())
    }
}

/// Parses `L{level}-{seq}.run` file names; anything else is ignored during
/// recovery.
fn parse_run_name(path: &Path) -> Option<(usize, u64)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".run")?;
    let (level, seq) = stem.strip_prefix('L')?.split_once('-')?;
    Some((level.parse().ok()?, seq.parse().ok()?))
}
