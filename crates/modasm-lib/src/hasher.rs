//! Seeded scrambling hasher for modimizer sampling
//!
//! A `ModHasher` fixes the sampling parameters (k, w, seed) and derives from
//! the seed a multiplicative scrambling factor. Hashing a packed k-mer is a
//! single multiply and shift, so the canonical hash of both strands can be
//! recomputed at every base.

use crate::constants::is_valid_k;
use crate::error::ModError;
use crate::modimizer::ModimizerIterator;

/// Deterministic k-mer scrambler shared read-only by every sampler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModHasher {
    k: usize,
    w: u64,
    seed: u64,
    mask: u64,
    shift: u32,
    factor: u64,
    pattern_rc: [u64; 4],
}

/// splitmix64 step, used to expand the seed into the scrambling factor
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl ModHasher {
    /// Create a new hasher for k-mer length `k`, modulus `w` and `seed`
    pub fn new(k: usize, w: usize, seed: u64) -> Result<Self, ModError> {
        let mut state = seed;
        let factor = splitmix64(&mut state) | 0x01;
        Self::from_parts(k, w, seed, factor)
    }

    /// Rebuild a hasher from persisted parts
    pub fn from_parts(k: usize, w: usize, seed: u64, factor: u64) -> Result<Self, ModError> {
        if !is_valid_k(k) {
            return Err(ModError::InvalidConfig(format!(
                "k must be between 1 and 31, got k={}",
                k
            )));
        }
        if w == 0 {
            return Err(ModError::InvalidConfig("w must be positive".to_string()));
        }
        if factor & 1 == 0 {
            return Err(ModError::InvalidConfig(format!(
                "scrambling factor {:#x} must be odd",
                factor
            )));
        }

        let mut pattern_rc = [0u64; 4];
        for (code, slot) in pattern_rc.iter_mut().enumerate() {
            *slot = (3 - code as u64) << (2 * (k - 1));
        }

        Ok(Self {
            k,
            w: w as u64,
            seed,
            mask: (1u64 << (2 * k)) - 1,
            shift: 64 - 2 * k as u32,
            factor,
            pattern_rc,
        })
    }

    /// Scrambled hash of a packed k-mer
    #[inline]
    pub fn hash(&self, kmer: u64) -> u64 {
        kmer.wrapping_mul(self.factor) >> self.shift
    }

    /// Canonical hash of a forward/reverse pair; returns `(hash, is_forward)`
    #[inline]
    pub fn canonical(&self, forward: u64, reverse: u64) -> (u64, bool) {
        let hash_f = self.hash(forward);
        let hash_r = self.hash(reverse);
        if hash_f < hash_r {
            (hash_f, true)
        } else {
            (hash_r, false)
        }
    }

    /// Whether a canonical hash is sampled
    #[inline]
    pub fn is_sampled(&self, hash: u64) -> bool {
        hash % self.w == 0
    }

    /// Sample the modimizers of a 2-bit encoded sequence
    pub fn sample<'a>(&'a self, codes: &'a [u8]) -> ModimizerIterator<'a> {
        ModimizerIterator::new(self, codes)
    }

    /// Whether two hashers produce identical fingerprint streams
    pub fn is_compatible(&self, other: &ModHasher) -> bool {
        self.k == other.k && self.w == other.w && self.factor == other.factor
    }

    /// K-mer length
    pub fn k(&self) -> usize {
        self.k
    }

    /// Sampling modulus
    pub fn w(&self) -> usize {
        self.w as usize
    }

    /// Seed the factor was derived from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Multiplicative scrambling factor
    pub fn factor(&self) -> u64 {
        self.factor
    }

    /// Mask of the 2k low bits
    #[inline]
    pub(crate) fn mask(&self) -> u64 {
        self.mask
    }

    /// Contribution of a base to the reverse-complement rolling value
    #[inline]
    pub(crate) fn pattern_rc(&self, code: u8) -> u64 {
        self.pattern_rc[(code & 0b11) as usize]
    }

    /// Log hasher parameters via tracing
    pub fn print(&self) {
        tracing::info!("SH k {}  w {}  seed {}", self.k, self.w, self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_factor() {
        let h1 = ModHasher::new(19, 31, 17).unwrap();
        let h2 = ModHasher::new(19, 31, 17).unwrap();
        let h3 = ModHasher::new(19, 31, 18).unwrap();

        assert_eq!(h1.factor(), h2.factor());
        assert_ne!(h1.factor(), h3.factor());
        assert_eq!(h1.factor() & 1, 1);
        assert!(h1.is_compatible(&h2));
        assert!(!h1.is_compatible(&h3));
    }

    #[test]
    fn test_hash_range() {
        let hasher = ModHasher::new(19, 31, 17).unwrap();
        // The hash keeps the top 2k bits of the product
        for kmer in [0u64, 1, 12345, hasher.mask()] {
            assert!(hasher.hash(kmer) < (1u64 << 38));
        }
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(ModHasher::new(0, 31, 1).is_err());
        assert!(ModHasher::new(32, 31, 1).is_err());
        assert!(ModHasher::new(19, 0, 1).is_err());
        assert!(ModHasher::from_parts(19, 31, 1, 2).is_err());
    }

    #[test]
    fn test_pattern_rc() {
        let hasher = ModHasher::new(4, 1, 1).unwrap();
        // A (0) contributes T (3) at the top base position
        assert_eq!(hasher.pattern_rc(0), 3 << 6);
        assert_eq!(hasher.pattern_rc(3), 0);
    }
}
