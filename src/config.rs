use std::path::PathBuf;

use crate::error::{Error, Result};

/// Configuration for the LSM store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the run files (default: "./shaledb")
    pub dir: PathBuf,

    /// Capacity of each in-memory run, in elements (default: 65536)
    pub elts_per_run: usize,

    /// Number of in-memory runs in the buffer ring (default: 8)
    pub num_runs: usize,

    /// Fraction of a full tier drained per merge, in (0, 1] (default: 0.5)
    pub frac_merged: f64,

    /// Target bloom filter false-positive rate, in (0, 1) (default: 0.001)
    pub bf_fp: f64,

    /// Fence-pointer stride for disk runs, in records (default: 1024)
    pub page_size: usize,

    /// Run slots per disk level (default: 8)
    pub disk_runs_per_level: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./shaledb"),
            elts_per_run: 65536,
            num_runs: 8,
            frac_merged: 0.5,
            bf_fp: 0.001,
            page_size: 1024,
            disk_runs_per_level: 8,
        }
    }
}

impl Config {
    /// Create a new config with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the in-memory run capacity.
    pub fn elts_per_run(mut self, elts: usize) -> Self {
        self.elts_per_run = elts;
        self
    }

    /// Set the number of in-memory runs.
    pub fn num_runs(mut self, runs: usize) -> Self {
        self.num_runs = runs;
        self
    }

    /// Set the fraction of runs drained per merge.
    pub fn frac_merged(mut self, frac: f64) -> Self {
        self.frac_merged = frac;
        self
    }

    /// Set the bloom filter false-positive rate.
    pub fn bf_fp(mut self, fp: f64) -> Self {
        self.bf_fp = fp;
        self
    }

    /// Set the fence-pointer stride.
    pub fn page_size(mut self, records: usize) -> Self {
        self.page_size = records;
        self
    }

    /// Set the number of run slots per disk level.
    pub fn disk_runs_per_level(mut self, runs: usize) -> Self {
        self.disk_runs_per_level = runs;
        self
    }

    /// Number of in-memory runs drained per merge.
    pub fn mem_merge_size(&self) -> usize {
        (self.frac_merged * self.num_runs as f64).ceil() as usize
    }

    /// Number of disk runs merged downward per level.
    pub fn disk_merge_size(&self) -> usize {
        (self.frac_merged * self.disk_runs_per_level as f64).ceil() as usize
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.elts_per_run == 0 {
            return Err(Error::Config("elts_per_run must be at least 1".into()));
        }
        if self.num_runs == 0 || self.disk_runs_per_level == 0 {
            return Err(Error::Config("run counts must be at least 1".into()));
        }
        if !(self.frac_merged > 0.0 && self.frac_merged <= 1.0) {
            return Err(Error::Config(format!(
                "frac_merged must be in (0, 1], got {}",
                self.frac_merged
            )));
        }
        if !(self.bf_fp > 0.0 && self.bf_fp < 1.0) {
            return Err(Error::Config(format!(
                "bf_fp must be in (0, 1), got {}",
                self.bf_fp
            )));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dir, PathBuf::from("./shaledb"));
        assert_eq!(config.elts_per_run, 65536);
        assert_eq!(config.num_runs, 8);
        assert_eq!(config.mem_merge_size(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/test")
            .elts_per_run(128)
            .num_runs(4)
            .frac_merged(1.0)
            .page_size(16)
            .disk_runs_per_level(2);

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.elts_per_run, 128);
        assert_eq!(config.mem_merge_size(), 4);
        assert_eq!(config.disk_merge_size(), 2);
    }

    #[test]
    fn test_merge_size_rounds_up() {
        let config = Config::default().num_runs(3).frac_merged(0.5);
        assert_eq!(config.mem_merge_size(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_fractions() {
        assert!(Config::default().frac_merged(0.0).validate().is_err());
        assert!(Config::default().frac_merged(1.5).validate().is_err());
        assert!(Config::default().bf_fp(0.0).validate().is_err());
        assert!(Config::default().bf_fp(1.0).validate().is_err());
        assert!(Config::default().page_size(0).validate().is_err());
    }
}
