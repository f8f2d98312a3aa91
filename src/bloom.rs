//! Bloom filter for skipping runs on point lookups.
//!
//! Sized from an expected element count `n` and a target false-positive rate
//! `p`: `m = ceil(-n * ln(p) / (ln 2)^2)` bits and `k = ceil((m/n) * ln 2)`
//! probes. The probe positions come from double hashing over a single 128-bit
//! hash of the key bytes:
//!
//! - `(h1, h2)` = high and low halves of `xxh3_128(key)`
//! - bit i = `(h1 + i * h2) mod m`
//!
//! `h2` is forced odd so the probe stride never collapses when `m` shares a
//! factor with an even `h2`.

use xxhash_rust::xxh3::xxh3_128;

use crate::kv::Key;

/// Probabilistic set over the keys of a single run. No false negatives.
#[derive(Debug)]
pub struct BloomFilter {
    /// Bit array stored as bytes
    bits: Vec<u8>,
    /// Number of hash probes (k)
    num_hashes: u32,
    /// Total number of bits (m)
    num_bits: u64,
}

impl BloomFilter {
    /// Creates a filter sized for `n` expected keys at false-positive rate `fp`.
    pub fn new(n: usize, fp: f64) -> Self {
        const LN2_SQUARED: f64 = std::f64::consts::LN_2 * std::f64::consts::LN_2;

        if n == 0 {
            return Self {
                bits: Vec::new(),
                num_hashes: 0,
                num_bits: 0,
            };
        }

        let num_bits = (-(n as f64) * fp.ln() / LN2_SQUARED).ceil() as u64;
        let num_bits = num_bits.max(8);
        let num_hashes =
            ((num_bits as f64 / n as f64) * std::f64::consts::LN_2).ceil() as u32;

        Self {
            bits: vec![0u8; num_bits.div_ceil(8) as usize],
            num_hashes: num_hashes.max(1),
            num_bits,
        }
    }

    /// Adds a key to the filter.
    pub fn add(&mut self, key: Key) {
        if self.num_bits == 0 {
            return;
        }
        let (h1, h2) = Self::hash(key);
        for i in 0..self.num_hashes {
            let pos = self.bit_position(h1, h2, i);
            self.bits[(pos >> 3) as usize] |= 1 << (pos & 7);
        }
    }

    /// Tests whether a key might be in the set.
    ///
    /// `false` means the key was definitely never added; `true` may be a
    /// false positive at roughly the configured rate.
    pub fn may_contain(&self, key: Key) -> bool {
        if self.num_bits == 0 {
            return false;
        }
        let (h1, h2) = Self::hash(key);
        for i in 0..self.num_hashes {
            let pos = self.bit_position(h1, h2, i);
            if self.bits[(pos >> 3) as usize] & (1 << (pos & 7)) == 0 {
                return false;
            }
        }
        true
    }

    #[inline]
    fn hash(key: Key) -> (u64, u64) {
        let h = xxh3_128(&key.to_le_bytes());
        let h1 = (h >> 64) as u64;
        let h2 = h as u64 | 1;
        (h1, h2)
    }

    #[inline]
    fn bit_position(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}
