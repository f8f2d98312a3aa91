//! The LSM coordinator.
//!
//! Writes land in a ring of R in-memory runs with per-run bloom filters.
//! When every run is full, the M oldest are handed to a background thread
//! that sorts and dedups them into a single batch and installs it at disk
//! level 0, cascading full disk levels downward under the merge mutex.
//!
//! The foreground is the single writer. It touches disk state only after
//! joining the merge thread, so any key visible on disk is also visible to
//! the query that reads it. There is at most one merge task in flight: a new
//! drain joins the previous one before spawning.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::bloom::BloomFilter;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::kv::{KVPair, Key, Value, KEY_MAX, TOMBSTONE};
use crate::level::DiskLevel;
use crate::memrun::MemRun;

/// The ordered list of disk levels, shared with the merge thread. The mutex
/// around it is the merge mutex: the background thread holds it while
/// installing a batch; the foreground takes it only after joining the thread.
pub(crate) struct DiskStack {
    dir: PathBuf,
    num_runs: usize,
    merge_size: usize,
    page_size: usize,
    bf_fp: f64,
    levels: Vec<DiskLevel>,
}

impl DiskStack {
    fn new(config: &Config) -> Self {
        let dir = config.dir.clone();
        let num_runs = config.disk_runs_per_level;
        let merge_size = config.disk_merge_size();
        // Level 1 runs are the size of one drained buffer batch.
        let run_size = config.mem_merge_size() * config.elts_per_run;
        let first = DiskLevel::new(
            dir.clone(),
            1,
            run_size,
            num_runs,
            merge_size,
            config.page_size,
            config.bf_fp,
        );
        Self {
            dir,
            num_runs,
            merge_size,
            page_size: config.page_size,
            bf_fp: config.bf_fp,
            levels: vec![first],
        }
    }

    pub(crate) fn levels(&self) -> &[DiskLevel] {
        &self.levels
    }

    /// Install a drained buffer batch at level 0, merging downward first if
    /// the level is full.
    fn flush_batch(&mut self, batch: &[KVPair]) -> Result<()> {
        if self.levels[0].is_full() {
            self.merge_down(1)?;
        }
        self.levels[0].add_sorted_batch(batch)
    }

    /// Merge the oldest runs of level `target - 1` into level `target`,
    /// recursively freeing space below and appending a new deepest level
    /// when the cascade runs off the end.
    fn merge_down(&mut self, target: usize) -> Result<()> {
        if target == self.levels.len() {
            let run_size = self.levels[target - 1].run_size() * self.merge_size;
            tracing::info!(level = target + 1, run_size, "creating disk level");
            self.levels.push(DiskLevel::new(
                self.dir.clone(),
                target + 1,
                run_size,
                self.num_runs,
                self.merge_size,
                self.page_size,
                self.bf_fp,
            ));
        }
        if self.levels[target].is_full() {
            self.merge_down(target + 1)?;
        }

        // The deepest level, while still empty, is where tombstones go to die.
        let terminal = target + 1 == self.levels.len() && self.levels[target].is_empty();

        let sources = self.levels[target - 1].take_merge_sources();
        let moved: usize = sources.iter().map(|run| run.len()).sum();
        self.levels[target].add_runs(&sources, terminal)?;
        self.levels[target - 1].retire_merged(sources)?;

        tracing::info!(
            from = target,
            to = target + 1,
            records = moved,
            terminal,
            "merged runs downward"
        );
        Ok(())
    }

    fn get(&self, key: Key) -> Option<Value> {
        self.levels.iter().find_map(|level| level.get(key))
    }
}

/// A skiplist-buffered tiered LSM key/value store.
pub struct LsmTree {
    config: Config,
    mem_merge_size: usize,
    /// Index of the writable in-memory run.
    active_run: usize,
    /// The buffer ring, oldest run first.
    mem: Vec<MemRun>,
    /// Per-run bloom filters, parallel to `mem`.
    filters: Vec<BloomFilter>,
    disk: Arc<Mutex<DiskStack>>,
    merge: Option<JoinHandle<Result<()>>>,
}

impl LsmTree {
    /// Open a store in the configured directory. The store starts empty;
    /// run files are owned by this process and removed when it closes.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir)?;

        let mem = (0..config.num_runs)
            .map(|_| MemRun::new(config.elts_per_run))
            .collect();
        let filters = (0..config.num_runs)
            .map(|_| BloomFilter::new(config.elts_per_run, config.bf_fp))
            .collect();
        let disk = Arc::new(Mutex::new(DiskStack::new(&config)));

        Ok(Self {
            mem_merge_size: config.mem_merge_size(),
            config,
            active_run: 0,
            mem,
            filters,
            disk,
            merge: None,
        })
    }

    /// Insert a pair. A later insert of the same key shadows this one.
    ///
    /// `Key::MAX` is reserved; inserting the tombstone value is a delete.
    pub fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        debug_assert!(key != KEY_MAX, "Key::MAX is reserved");

        if self.mem[self.active_run].is_full() {
            self.active_run += 1;
        }
        if self.active_run == self.config.num_runs {
            self.drain_buffer()?;
        }

        self.mem[self.active_run].insert(key, value);
        self.filters[self.active_run].add(key);
        Ok(())
    }

    /// Delete a key by writing a tombstone over it.
    pub fn delete(&mut self, key: Key) -> Result<()> {
        self.insert(key, TOMBSTONE)
    }

    /// Point lookup: newest in-memory run first, then disk levels top-down,
    /// newest run first within a level. The first hit wins; a tombstone hit
    /// reports the key as absent.
    pub fn get(&mut self, key: Key) -> Result<Option<Value>> {
        for i in (0..=self.active_run).rev() {
            let run = &self.mem[i];
            let (Some(min), Some(max)) = (run.min(), run.max()) else {
                continue;
            };
            if key < min || key > max || !self.filters[i].may_contain(key) {
                continue;
            }
            if let Some(value) = run.get(key) {
                return Ok((value != TOMBSTONE).then_some(value));
            }
        }

        // Not in the buffer; make sure disk state is quiescent before reading.
        self.join_merge()?;
        let disk = self.disk.lock()?;
        Ok(disk.get(key).and_then(|value| (value != TOMBSTONE).then_some(value)))
    }

    /// All live pairs with `lo <= key < hi`. Key order is not guaranteed.
    ///
    /// Sources are visited newest to oldest and the first writer of each key
    /// wins, so shadowed versions and deleted keys never appear.
    pub fn range(&mut self, lo: Key, hi: Key) -> Result<Vec<KVPair>> {
        if hi <= lo {
            return Ok(Vec::new());
        }

        let mut claimed: HashSet<Key> = HashSet::new();
        let mut out = Vec::new();

        for i in (0..=self.active_run).rev() {
            for pair in self.mem[i].scan(lo, hi) {
                if claimed.insert(pair.key) && !pair.is_tombstone() {
                    out.push(pair);
                }
            }
        }

        self.join_merge()?;
        let disk = self.disk.lock()?;
        for level in disk.levels() {
            for run in level.runs().iter().rev() {
                // The run interval is inclusive of its upper key.
                let (i1, i2) = run.range(lo, hi - 1);
                for pair in &run.live()[i1..i2] {
                    if claimed.insert(pair.key) && !pair.is_tombstone() {
                        out.push(*pair);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Number of live keys in the store.
    pub fn size(&mut self) -> Result<usize> {
        Ok(self.range(Key::MIN, Key::MAX)?.len())
    }

    /// Number of records currently buffered in memory, tombstones included.
    pub fn buffer_len(&mut self) -> Result<usize> {
        self.join_merge()?;
        Ok(self.mem[..=self.active_run].iter().map(MemRun::len).sum())
    }

    /// On-disk record count per level, shallowest first, tombstones included.
    pub fn disk_level_sizes(&mut self) -> Result<Vec<usize>> {
        self.join_merge()?;
        let disk = self.disk.lock()?;
        Ok(disk.levels().iter().map(DiskLevel::num_elements).collect())
    }

    /// Dump every run of the buffer and every disk level to stdout.
    pub fn print_elts(&mut self) -> Result<()> {
        self.join_merge()?;

        println!("MEMORY BUFFER");
        for (i, run) in self.mem[..=self.active_run].iter().enumerate() {
            let line: Vec<String> = run.all().iter().map(|p| p.to_string()).collect();
            println!("  run {i}: {}", line.join(" "));
        }

        let disk = self.disk.lock()?;
        println!("DISK LEVELS");
        for level in disk.levels() {
            println!("  level {}", level.level_no());
            for (r, run) in level.runs().iter().enumerate() {
                let line: Vec<String> = run.live().iter().map(|p| p.to_string()).collect();
                println!("    run {r}: {}", line.join(" "));
            }
        }
        Ok(())
    }

    /// Print summary statistics followed by a full element dump.
    pub fn print_stats(&mut self) -> Result<()> {
        let size = self.size()?;
        let buffered = self.buffer_len()?;
        println!("live keys: {size}");
        println!("buffered records (including deletes): {buffered}");
        {
            let disk = self.disk.lock()?;
            for level in disk.levels() {
                println!(
                    "disk level {} records (including deletes): {}",
                    level.level_no(),
                    level.num_elements()
                );
            }
        }
        self.print_elts()
    }

    /// Hand the M oldest buffer runs to a background merge task and reset
    /// the ring. Joins any still-running previous merge first, so at most
    /// one task exists at a time.
    fn drain_buffer(&mut self) -> Result<()> {
        let m = self.mem_merge_size;
        if m == 0 {
            return Ok(());
        }

        let drained: Vec<MemRun> = self.mem.drain(..m).collect();
        self.filters.drain(..m);
        self.join_merge()?;

        let disk = Arc::clone(&self.disk);
        let handle = thread::Builder::new()
            .name("shaledb-merge".into())
            .spawn(move || merge_drained(disk, drained))?;
        self.merge = Some(handle);

        self.active_run -= m;
        for _ in 0..m {
            self.mem.push(MemRun::new(self.config.elts_per_run));
            self.filters
                .push(BloomFilter::new(self.config.elts_per_run, self.config.bf_fp));
        }
        Ok(())
    }

    /// Wait for the in-flight merge, if any, and surface its result.
    fn join_merge(&mut self) -> Result<()> {
        if let Some(handle) = self.merge.take() {
            handle
                .join()
                .map_err(|_| Error::Merge("merge thread panicked".into()))??;
        }
        Ok(())
    }
}

impl Drop for LsmTree {
    fn drop(&mut self) {
        if let Err(err) = self.join_merge() {
            tracing::error!(error = %err, "merge failed during shutdown");
        }
    }
}

/// Merge-thread body: flatten the drained runs into one sorted, deduplicated
/// batch (newest write per key wins) and install it at disk level 0.
fn merge_drained(disk: Arc<Mutex<DiskStack>>, drained: Vec<MemRun>) -> Result<()> {
    let total: usize = drained.iter().map(MemRun::len).sum();
    let mut batch = Vec::with_capacity(total);
    for run in &drained {
        batch.extend(run.all());
    }

    // Runs were appended oldest first and the sort is stable, so the last
    // record of any equal-key group is the newest write.
    batch.sort_by_key(|pair| pair.key);
    let mut deduped: Vec<KVPair> = Vec::with_capacity(batch.len());
    for pair in batch {
        match deduped.last_mut() {
            Some(last) if last.key == pair.key => *last = pair,
            _ => deduped.push(pair),
        }
    }

    tracing::debug!(records = deduped.len(), "installing drained buffer at level 1");
    let mut disk = disk.lock()?;
    disk.flush_batch(&deduped)
}
