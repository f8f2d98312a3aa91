//! End-to-end scenarios for the store: visibility across forced merges,
//! cascades, tombstone collapse, and shadowing across tiers, plus a
//! model-based randomized workload.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use shaledb::{Config, KVPair, Key, LsmTree, Value};

/// E=2, R=2, M=2: every fifth insert drains four records to disk.
fn small_config(dir: &TempDir) -> Config {
    Config::new(dir.path())
        .elts_per_run(2)
        .num_runs(2)
        .frac_merged(1.0)
        .page_size(4)
        .disk_runs_per_level(2)
}

/// E=1, R=2, M=2, two runs per disk level: cascades almost immediately.
fn cascade_config(dir: &TempDir) -> Config {
    Config::new(dir.path())
        .elts_per_run(1)
        .num_runs(2)
        .frac_merged(1.0)
        .page_size(4)
        .disk_runs_per_level(2)
}

fn sorted_keys(pairs: &[KVPair]) -> Vec<(Key, Value)> {
    let mut out: Vec<_> = pairs.iter().map(|p| (p.key, p.value)).collect();
    out.sort_unstable();
    out
}

#[test]
fn overwrite_wins() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(small_config(&dir)).unwrap();

    store.insert(5, 100).unwrap();
    store.insert(5, 200).unwrap();
    assert_eq!(store.get(5).unwrap(), Some(200));
}

#[test]
fn delete_then_reinsert() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(small_config(&dir)).unwrap();

    store.insert(7, 1).unwrap();
    store.delete(7).unwrap();
    assert_eq!(store.get(7).unwrap(), None);

    store.insert(7, 2).unwrap();
    assert_eq!(store.get(7).unwrap(), Some(2));
}

#[test]
fn forced_merge_keeps_keys_visible() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(small_config(&dir)).unwrap();

    for key in 1..=5 {
        store.insert(key, key).unwrap();
    }

    // The first four pairs now live on disk as a single sorted run.
    assert_eq!(store.disk_level_sizes().unwrap(), vec![4]);
    assert_eq!(store.get(3).unwrap(), Some(3));
    assert_eq!(store.get(5).unwrap(), Some(5));
}

#[test]
fn cascading_merge_creates_deeper_level() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(cascade_config(&dir)).unwrap();

    for key in 1..=8 {
        store.insert(key, key).unwrap();
    }

    let sizes = store.disk_level_sizes().unwrap();
    assert_eq!(sizes.len(), 2, "cascade should have opened a second level");
    assert_eq!(sizes[1], 4, "the older batches should have merged downward");

    let pairs = store.range(1, 9).unwrap();
    assert_eq!(
        sorted_keys(&pairs),
        (1..=8).map(|k| (k, k)).collect::<Vec<_>>()
    );
}

#[test]
fn tombstone_collapses_at_terminal_level() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(cascade_config(&dir)).unwrap();

    store.insert(42, 999).unwrap();
    store.delete(42).unwrap();

    // Push unrelated keys through until the tombstone reaches the deepest
    // level and collapses.
    for key in 1..=8 {
        store.insert(key, key * 10).unwrap();
    }

    assert_eq!(store.get(42).unwrap(), None);
    assert!(store.range(42, 43).unwrap().is_empty());

    // Nothing on disk should be holding key 42 anymore: every on-disk record
    // accounts for one of the live unrelated keys.
    let on_disk: usize = store.disk_level_sizes().unwrap().iter().sum();
    let buffered = store.buffer_len().unwrap();
    assert_eq!(on_disk + buffered, 8);
}

#[test]
fn range_across_tiers_respects_shadowing() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(small_config(&dir)).unwrap();

    // Land (1,A)..(4,D) on disk, then shadow key 2 from the buffer.
    store.insert(1, 100).unwrap();
    store.insert(2, 200).unwrap();
    store.insert(3, 300).unwrap();
    store.insert(4, 400).unwrap();
    store.insert(2, 201).unwrap();
    assert_eq!(store.disk_level_sizes().unwrap(), vec![4]);

    let pairs = store.range(2, 4).unwrap();
    assert_eq!(sorted_keys(&pairs), vec![(2, 201), (3, 300)]);
}

#[test]
fn last_writer_wins_across_forced_merges() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(small_config(&dir)).unwrap();

    // Rewrite the same five keys across enough rounds that every version but
    // the last ends up buried in older runs and levels.
    for round in 0..10 {
        for key in 0..5 {
            store.insert(key, round * 100 + key).unwrap();
        }
    }

    for key in 0..5 {
        assert_eq!(store.get(key).unwrap(), Some(900 + key));
    }
    assert_eq!(store.size().unwrap(), 5);
}

#[test]
fn deletes_shadow_older_tiers() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(small_config(&dir)).unwrap();

    for key in 1..=8 {
        store.insert(key, key).unwrap();
    }
    // Keys 1..=4 are on disk by now; delete two of them from the buffer side.
    store.delete(1).unwrap();
    store.delete(3).unwrap();

    assert_eq!(store.get(1).unwrap(), None);
    assert_eq!(store.get(3).unwrap(), None);
    assert_eq!(store.get(2).unwrap(), Some(2));

    let pairs = store.range(1, 9).unwrap();
    assert_eq!(
        sorted_keys(&pairs),
        vec![(2, 2), (4, 4), (5, 5), (6, 6), (7, 7), (8, 8)]
    );
}

#[test]
fn randomized_workload_matches_model() {
    let dir = TempDir::new().unwrap();
    let config = Config::new(dir.path())
        .elts_per_run(8)
        .num_runs(4)
        .frac_merged(0.5)
        .page_size(4)
        .disk_runs_per_level(3);
    let mut store = LsmTree::open(config).unwrap();

    let mut model: HashMap<Key, Value> = HashMap::new();
    let mut rng = StdRng::seed_from_u64(0x5ca1ab1e);

    for step in 0..5000 {
        let key = rng.gen_range(0..200);
        if rng.gen_bool(0.25) {
            store.delete(key).unwrap();
            model.remove(&key);
        } else {
            let value = step as Value;
            store.insert(key, value).unwrap();
            model.insert(key, value);
        }

        if step % 97 == 0 {
            let probe = rng.gen_range(0..200);
            assert_eq!(
                store.get(probe).unwrap(),
                model.get(&probe).copied(),
                "lookup mismatch for key {probe} at step {step}"
            );
        }
    }

    // Every key agrees with the model at the end.
    for key in 0..200 {
        assert_eq!(store.get(key).unwrap(), model.get(&key).copied());
    }

    // A full range scan returns exactly the live pairs, no duplicates.
    let pairs = store.range(0, 200).unwrap();
    assert_eq!(pairs.len(), model.len());
    let mut expected: Vec<_> = model.iter().map(|(&k, &v)| (k, v)).collect();
    expected.sort_unstable();
    assert_eq!(sorted_keys(&pairs), expected);

    // And a window of it honors the bounds.
    let window = store.range(50, 100).unwrap();
    let mut expected_window: Vec<_> = model
        .iter()
        .filter(|(&k, _)| (50..100).contains(&k))
        .map(|(&k, &v)| (k, v))
        .collect();
    expected_window.sort_unstable();
    assert_eq!(sorted_keys(&window), expected_window);
}

#[test]
fn negative_keys_and_values_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut store = LsmTree::open(small_config(&dir)).unwrap();

    for key in -6..0 {
        store.insert(key, key * 2).unwrap();
    }
    for key in -6..0 {
        assert_eq!(store.get(key).unwrap(), Some(key * 2));
    }

    let pairs = store.range(-6, 0).unwrap();
    assert_eq!(pairs.len(), 6);
    assert!(store.range(0, 10).unwrap().is_empty());
}
