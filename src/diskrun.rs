//! Memory-mapped disk runs.
//!
//! A disk run is an immutable sorted array of records backed by a file named
//! `C_{level}_{runID}.txt`: exactly `capacity * 16` bytes of packed
//! host-endian `(key, value)` records in ascending key order, no header, no
//! padding. The file is mapped shared read+write for the run's lifetime and
//! the mapping is the canonical storage.
//!
//! Index structures are not persisted. `construct_index` rebuilds them from
//! the mapped bytes: a bloom filter over every key, a fence pointer for the
//! key of every `page_size`-th record, and the min/max key bounds. A point
//! lookup binary-searches the fence pointers for the page bracket, then
//! binary-searches the bracket.
//!
//! Dropping a run flushes dirty pages, releases the mapping, and unlinks the
//! file.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::bloom::BloomFilter;
use crate::error::Result;
use crate::kv::{KVPair, Key, Value, PAIR_SIZE};

pub struct DiskRun {
    file: File,
    map: MmapMut,
    path: PathBuf,
    level: usize,
    run_id: usize,
    /// Record slots in the mapping.
    mapped: usize,
    /// Live records, `<= mapped`.
    capacity: usize,
    page_size: usize,
    bf_fp: f64,
    bf: BloomFilter,
    fences: Vec<Key>,
    /// (min_key, max_key) of the live records; `None` until indexed.
    bounds: Option<(Key, Key)>,
}

fn run_file_name(level: usize, run_id: usize) -> String {
    format!("C_{level}_{run_id}.txt")
}

impl DiskRun {
    /// Create the backing file for a run of up to `capacity` records and map
    /// it. The run holds no live records until `write_data` is called.
    pub fn create(
        dir: &Path,
        capacity: usize,
        page_size: usize,
        level: usize,
        run_id: usize,
        bf_fp: f64,
    ) -> Result<Self> {
        assert!(capacity > 0, "disk run must hold at least one record");

        let path = dir.join(run_file_name(level, run_id));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len((capacity * PAIR_SIZE) as u64)?;

        // Safety: the file is exclusively owned by this run for its lifetime.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            file,
            map,
            path,
            level,
            run_id,
            mapped: capacity,
            capacity: 0,
            page_size,
            bf_fp,
            bf: BloomFilter::new(0, bf_fp),
            fences: Vec::new(),
            bounds: None,
        })
    }

    /// View of every mapped record slot.
    fn pairs(&self) -> &[KVPair] {
        // Safety: the mapping is page-aligned (stricter than KVPair's 8-byte
        // alignment) and spans exactly `mapped` packed 16-byte records.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr() as *const KVPair, self.mapped) }
    }

    pub(crate) fn pairs_mut(&mut self) -> &mut [KVPair] {
        // Safety: as `pairs`, and the mapping is private to this run.
        unsafe {
            std::slice::from_raw_parts_mut(self.map.as_mut_ptr() as *mut KVPair, self.mapped)
        }
    }

    /// The live records.
    pub fn live(&self) -> &[KVPair] {
        &self.pairs()[..self.capacity]
    }

    /// Copy a pre-sorted batch into the run and set its live length. Runs are
    /// write-once: this is called exactly once, before `construct_index`.
    pub fn write_data(&mut self, src: &[KVPair]) {
        assert!(src.len() <= self.mapped, "batch exceeds run allocation");
        self.pairs_mut()[..src.len()].copy_from_slice(src);
        self.capacity = src.len();
    }

    /// Used by the k-way merge, which writes records in place and only knows
    /// the final length once its heap drains.
    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        assert!(capacity <= self.mapped);
        self.capacity = capacity;
    }

    /// Shrink the backing file to the live length and remap, so the file is
    /// exactly `capacity * 16` bytes on disk.
    pub fn truncate_to_capacity(&mut self) -> Result<()> {
        assert!(self.capacity > 0, "cannot truncate a run to zero records");
        if self.capacity == self.mapped {
            return Ok(());
        }
        self.map.flush()?;
        self.file.set_len((self.capacity * PAIR_SIZE) as u64)?;
        // Safety: as in `create`; the stale wider mapping is replaced before
        // any further access.
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        self.mapped = self.capacity;
        Ok(())
    }

    /// Scan the live records and rebuild the bloom filter, fence pointers,
    /// and key bounds.
    pub fn construct_index(&mut self) {
        let mut bf = BloomFilter::new(self.capacity, self.bf_fp);
        let mut fences = Vec::with_capacity(self.capacity.div_ceil(self.page_size));

        let live = self.live();
        for (j, pair) in live.iter().enumerate() {
            bf.add(pair.key);
            if j % self.page_size == 0 {
                fences.push(pair.key);
            }
        }
        self.bounds = live.first().map(|first| (first.key, live[live.len() - 1].key));
        self.bf = bf;
        self.fences = fences;
    }

    /// Point lookup. Returns the stored value (tombstones included) or None.
    pub fn get(&self, key: Key) -> Option<Value> {
        let (min, max) = self.bounds?;
        if key < min || key > max || !self.bf.may_contain(key) {
            return None;
        }

        // Largest fence i with fences[i] <= key; the bounds check above
        // guarantees fences[0] = min <= key.
        let page = self.fences.partition_point(|fence| *fence <= key) - 1;
        let start = page * self.page_size;
        let end = ((page + 1) * self.page_size).min(self.capacity);

        let bracket = &self.live()[start..end];
        bracket
            .binary_search_by_key(&key, |pair| pair.key)
            .ok()
            .map(|i| bracket[i].value)
    }

    /// Index interval `[i1, i2)` of the live records with `lo <= key <= hi`.
    /// Both are 0 when the run is disjoint from the range.
    pub fn range(&self, lo: Key, hi: Key) -> (usize, usize) {
        let Some((min, max)) = self.bounds else {
            return (0, 0);
        };
        if lo > max || hi < min {
            return (0, 0);
        }
        let live = self.live();
        let i1 = live.partition_point(|pair| pair.key < lo);
        let i2 = live.partition_point(|pair| pair.key <= hi);
        (i1, i2)
    }

    /// Move the backing file to the slot `run_id`, keeping level and
    /// directory. Used when a level compacts its run vector after a merge.
    pub fn rename_to_slot(&mut self, run_id: usize) -> Result<()> {
        if run_id == self.run_id {
            return Ok(());
        }
        let new_path = self
            .path
            .parent()
            .expect("run path has a parent directory")
            .join(run_file_name(self.level, run_id));
        fs::rename(&self.path, &new_path)?;
        self.path = new_path;
        self.run_id = run_id;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.capacity == 0
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn min_key(&self) -> Option<Key> {
        self.bounds.map(|(min, _)| min)
    }

    pub fn max_key(&self) -> Option<Key> {
        self.bounds.map(|(_, max)| max)
    }
}

impl Drop for DiskRun {
    fn drop(&mut self) {
        if let Err(err) = self.map.flush() {
            tracing::error!(path = %self.path.display(), error = %err, "failed to flush run");
        }
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::error!(path = %self.path.display(), error = %err, "failed to unlink run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sequential_pairs(n: usize) -> Vec<KVPair> {
        (0..n as Key).map(|key| KVPair::new(key * 2, key * 20)).collect()
    }

    fn build_run(dir: &Path, pairs: &[KVPair], page_size: usize) -> DiskRun {
        let mut run =
            DiskRun::create(dir, pairs.len(), page_size, 1, 0, 0.001).expect("create run");
        run.write_data(pairs);
        run.construct_index();
        run
    }

    #[test]
    fn test_get_present_and_absent() {
        let dir = TempDir::new().unwrap();
        let run = build_run(dir.path(), &sequential_pairs(100), 8);

        // Even keys 0..198 are present, odd keys are not.
        assert_eq!(run.get(0), Some(0));
        assert_eq!(run.get(84), Some(840));
        assert_eq!(run.get(198), Some(1980));
        assert_eq!(run.get(85), None);
        assert_eq!(run.get(-1), None);
        assert_eq!(run.get(200), None);
    }

    #[test]
    fn test_fence_pointers_match_pages() {
        let dir = TempDir::new().unwrap();
        let run = build_run(dir.path(), &sequential_pairs(50), 8);

        assert_eq!(run.fences.len(), 7);
        for (i, fence) in run.fences.iter().enumerate() {
            assert_eq!(*fence, run.live()[i * 8].key);
        }
        assert_eq!(run.min_key(), Some(0));
        assert_eq!(run.max_key(), Some(98));
    }

    #[test]
    fn test_get_across_page_boundaries() {
        let dir = TempDir::new().unwrap();
        let run = build_run(dir.path(), &sequential_pairs(40), 4);

        for pair in run.live().to_vec() {
            assert_eq!(run.get(pair.key), Some(pair.value));
        }
    }

    #[test]
    fn test_range_intervals() {
        let dir = TempDir::new().unwrap();
        let run = build_run(dir.path(), &sequential_pairs(10), 4);
        // Keys: 0 2 4 6 8 10 12 14 16 18

        assert_eq!(run.range(4, 10), (2, 6)); // inclusive of hi
        assert_eq!(run.range(3, 9), (2, 5));
        assert_eq!(run.range(-5, 100), (0, 10));
        assert_eq!(run.range(19, 30), (0, 0)); // disjoint above
        assert_eq!(run.range(-9, -1), (0, 0)); // disjoint below
    }

    #[test]
    fn test_file_is_exactly_capacity_records() {
        let dir = TempDir::new().unwrap();
        let pairs = sequential_pairs(16);
        let mut run = DiskRun::create(dir.path(), 64, 8, 1, 0, 0.001).unwrap();
        run.write_data(&pairs);
        run.truncate_to_capacity().unwrap();
        run.construct_index();

        let meta = fs::metadata(dir.path().join("C_1_0.txt")).unwrap();
        assert_eq!(meta.len() as usize, 16 * PAIR_SIZE);
        assert_eq!(run.get(6), Some(60));
    }

    #[test]
    fn test_drop_unlinks_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("C_1_0.txt");
        {
            let _run = build_run(dir.path(), &sequential_pairs(4), 4);
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_rename_to_slot() {
        let dir = TempDir::new().unwrap();
        let mut run = build_run(dir.path(), &sequential_pairs(4), 4);
        run.rename_to_slot(3).unwrap();

        assert!(!dir.path().join("C_1_0.txt").exists());
        assert!(dir.path().join("C_1_3.txt").exists());
        assert_eq!(run.get(2), Some(20));
    }

    #[test]
    fn test_unindexed_run_finds_nothing() {
        let dir = TempDir::new().unwrap();
        let mut run = DiskRun::create(dir.path(), 8, 4, 1, 0, 0.001).unwrap();
        run.write_data(&sequential_pairs(8));
        // No construct_index yet.
        assert_eq!(run.get(0), None);
        assert_eq!(run.range(0, 100), (0, 0));
    }
}
