//! shaledb: a skiplist-buffered, tiered LSM key/value store.
//!
//! Writes go to a ring of in-memory skiplist runs; full runs are drained by
//! a background task into memory-mapped sorted run files organized in tiers,
//! with per-run bloom filters and sparse fence pointers serving point
//! lookups. Deletes are tombstones that collapse when they reach the deepest
//! tier.
//!
//! ```no_run
//! use shaledb::{Config, LsmTree};
//!
//! # fn main() -> shaledb::Result<()> {
//! let mut store = LsmTree::open(Config::new("./data"))?;
//! store.insert(1, 100)?;
//! assert_eq!(store.get(1)?, Some(100));
//! store.delete(1)?;
//! assert_eq!(store.get(1)?, None);
//! # Ok(())
//! # }
//! ```

pub mod bloom;
pub mod config;
pub mod diskrun;
pub mod error;
pub mod kv;
pub mod level;
pub mod memrun;
pub mod tree;

pub use config::Config;
pub use error::{Error, Result};
pub use kv::{KVPair, Key, Value, KEY_MAX, TOMBSTONE};
pub use tree::LsmTree;
