//! Disk levels: tiers of overlapping sorted runs.
//!
//! A level holds up to `num_runs` disk runs of a common target size. Run
//! slots fill as a prefix; key ranges of sibling runs may overlap, and a
//! higher run index means newer data. When the level fills, its `merge_size`
//! oldest runs are k-way merged into a single run at the next level.
//!
//! The merge keeps at most one record per key: when the heap pops a key equal
//! to the previous one, the pop from the newer source wins. On a merge into
//! the terminal level, tombstones are dropped instead of being copied down.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;

use crate::diskrun::DiskRun;
use crate::error::Result;
use crate::kv::{KVPair, Key, Value};

pub struct DiskLevel {
    dir: PathBuf,
    /// 1-based level number, used in run file names.
    level_no: usize,
    /// Target records per run at this level.
    run_size: usize,
    /// Run slots (R).
    num_runs: usize,
    /// Oldest runs merged downward at a time (M).
    merge_size: usize,
    page_size: usize,
    bf_fp: f64,
    /// Occupied runs only, oldest first; index == run slot == file runID.
    runs: Vec<DiskRun>,
}

/// Heap entry for the k-way merge. Ordered so that `BinaryHeap` pops the
/// smallest key first and, on equal keys, the oldest (lowest) source first.
struct MergeEntry {
    pair: KVPair,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.pair.key == other.pair.key && self.source == other.source
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.pair.key.cmp(&other.pair.key) {
            Ordering::Equal => other.source.cmp(&self.source),
            ord => ord.reverse(), // Reverse for min-heap behavior
        }
    }
}

impl DiskLevel {
    pub fn new(
        dir: PathBuf,
        level_no: usize,
        run_size: usize,
        num_runs: usize,
        merge_size: usize,
        page_size: usize,
        bf_fp: f64,
    ) -> Self {
        Self {
            dir,
            level_no,
            run_size,
            num_runs,
            merge_size,
            page_size,
            bf_fp,
            runs: Vec::with_capacity(num_runs),
        }
    }

    pub fn is_full(&self) -> bool {
        self.runs.len() == self.num_runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn num_elements(&self) -> usize {
        self.runs.iter().map(DiskRun::len).sum()
    }

    pub fn run_size(&self) -> usize {
        self.run_size
    }

    pub fn level_no(&self) -> usize {
        self.level_no
    }

    pub fn runs(&self) -> &[DiskRun] {
        &self.runs
    }

    /// Point lookup, newest run first. Tombstones are returned as-is; the
    /// coordinator distinguishes them.
    pub fn get(&self, key: Key) -> Option<Value> {
        self.runs.iter().rev().find_map(|run| run.get(key))
    }

    /// Ingest a pre-sorted, deduplicated batch as a new run. Level-0 only:
    /// this is how a buffer drain lands on disk.
    pub fn add_sorted_batch(&mut self, batch: &[KVPair]) -> Result<()> {
        assert!(!self.is_full(), "cannot add a run to a full level");
        assert!(!batch.is_empty() && batch.len() <= self.run_size);
        debug_assert!(batch.windows(2).all(|w| w[0].key < w[1].key));

        let mut run = DiskRun::create(
            &self.dir,
            batch.len(),
            self.page_size,
            self.level_no,
            self.runs.len(),
            self.bf_fp,
        )?;
        run.write_data(batch);
        run.construct_index();
        self.runs.push(run);
        Ok(())
    }

    /// Detach the `merge_size` oldest runs for merging into the next level.
    /// The caller returns them to `retire_merged` once the merge lands.
    pub fn take_merge_sources(&mut self) -> Vec<DiskRun> {
        assert!(
            self.runs.len() >= self.merge_size,
            "level has fewer runs than the merge width"
        );
        self.runs.drain(..self.merge_size).collect()
    }

    /// K-way merge `merge_size` runs from the preceding level into a single
    /// new run here. With `terminal` set, tombstones are collapsed away
    /// instead of being carried down.
    pub fn add_runs(&mut self, sources: &[DiskRun], terminal: bool) -> Result<()> {
        assert!(!self.is_full(), "cannot merge into a full level");
        assert_eq!(sources.len(), self.merge_size, "merge width mismatch");
        assert!(
            sources.iter().all(|s| s.level() + 1 == self.level_no),
            "merge source from the wrong level"
        );

        let total: usize = sources.iter().map(DiskRun::len).sum();
        let mut dest = DiskRun::create(
            &self.dir,
            total,
            self.page_size,
            self.level_no,
            self.runs.len(),
            self.bf_fp,
        )?;

        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut heads = vec![0usize; sources.len()];
        for (source, run) in sources.iter().enumerate() {
            heap.push(MergeEntry {
                pair: run.live()[0],
                source,
            });
        }

        let out = dest.pairs_mut();
        let mut len = 0usize;
        let mut last_key: Option<Key> = None;
        let mut last_source = 0usize;

        while let Some(MergeEntry { pair, source }) = heap.pop() {
            heads[source] += 1;
            if heads[source] < sources[source].len() {
                heap.push(MergeEntry {
                    pair: sources[source].live()[heads[source]],
                    source,
                });
            }

            if last_key == Some(pair.key) {
                // Same key as the slot just committed: a pop from a newer
                // source replaces it, an older one is dropped.
                if last_source < source {
                    out[len - 1] = pair;
                }
            } else {
                if terminal && len > 0 && out[len - 1].is_tombstone() {
                    len -= 1;
                }
                out[len] = pair;
                len += 1;
            }
            last_key = Some(pair.key);
            last_source = source;
        }
        if terminal && len > 0 && out[len - 1].is_tombstone() {
            len -= 1;
        }

        dest.set_capacity(len);
        if len == 0 {
            // Every record was a collapsed tombstone; the run never existed.
            tracing::debug!(level = self.level_no, "merge output empty, dropping run");
            return Ok(());
        }
        dest.truncate_to_capacity()?;
        dest.construct_index();
        self.runs.push(dest);
        Ok(())
    }

    /// Release merged-away source runs (unlinking their files) and compact
    /// the surviving runs back into slot order `0..`.
    pub fn retire_merged(&mut self, sources: Vec<DiskRun>) -> Result<()> {
        assert_eq!(sources.len(), self.merge_size, "merge width mismatch");
        assert!(
            sources.iter().all(|s| s.level() == self.level_no),
            "retiring a run from the wrong level"
        );
        drop(sources);

        for (slot, run) in self.runs.iter_mut().enumerate() {
            run.rename_to_slot(slot)?;
        }
        Ok(())
    }
}
