//! Build configuration for fingerprint index construction
//!
//! Sampling parameters, table size and resource limits shared by the index,
//! read-set and reference builders.

use crate::constants::{
    is_valid_k, is_valid_table_bits, DEFAULT_K, DEFAULT_SEED, DEFAULT_TABLE_BITS, DEFAULT_W, MAX_K,
    MAX_TABLE_BITS, MIN_K, MIN_TABLE_BITS,
};
use crate::error::ModResult;
use crate::hasher::ModHasher;
use crate::modset::Modset;

/// Configuration parameters for building a fingerprint index
#[derive(Debug, Clone, PartialEq)]
pub struct HasherConfig {
    /// K-mer length
    pub k: usize,

    /// Sampling modulus: a k-mer is kept when its hash is divisible by `w`
    pub w: usize,

    /// Seed for the hash multiplier
    pub seed: u64,

    /// log2 of the probe table size
    pub table_bits: u32,

    /// Maximum number of entries (0 = default for the table size)
    pub capacity: u32,

    /// Number of threads for parallel operations (0 = all available cores)
    pub num_threads: usize,

    /// Sequences sampled together before their fingerprints are inserted
    pub batch_size: usize,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            w: DEFAULT_W,
            seed: DEFAULT_SEED,
            table_bits: DEFAULT_TABLE_BITS,
            capacity: 0,
            num_threads: 0,
            batch_size: 4096,
        }
    }
}

impl HasherConfig {
    /// Create a configuration with the given sampling parameters
    pub fn new(k: usize, w: usize, seed: u64) -> Result<Self, String> {
        let config = Self {
            k,
            w,
            seed,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_k(self.k) {
            return Err(format!("k must be in range [{}, {}], got k={}", MIN_K, MAX_K, self.k));
        }
        if self.w == 0 {
            return Err("w must be positive".to_string());
        }
        if !is_valid_table_bits(self.table_bits) {
            return Err(format!(
                "table bits must be in range [{}, {}], got {}",
                MIN_TABLE_BITS, MAX_TABLE_BITS, self.table_bits
            ));
        }
        if self.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        Ok(())
    }

    /// The hasher these parameters describe
    pub fn hasher(&self) -> ModResult<ModHasher> {
        ModHasher::new(self.k, self.w, self.seed)
    }

    /// An empty index with these parameters
    pub fn empty_modset(&self) -> ModResult<Modset> {
        Modset::new(self.hasher()?, self.table_bits, self.capacity)
    }

    /// A rayon pool with `num_threads` threads
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool, String> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .map_err(|e| format!("Failed to create thread pool: {e}"))
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Index Configuration:");
        tracing::info!("  k = {}", self.k);
        tracing::info!("  w = {}", self.w);
        tracing::debug!("  seed = {}", self.seed);
        tracing::info!("  table_bits = {}", self.table_bits);
        if self.capacity == 0 {
            tracing::debug!("  capacity = default");
        } else {
            tracing::debug!("  capacity = {}", self.capacity);
        }
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        tracing::debug!("  batch_size = {}", self.batch_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HasherConfig::default();
        assert_eq!(config.k, 19);
        assert_eq!(config.w, 31);
        assert_eq!(config.seed, 17);
        assert_eq!(config.table_bits, 28);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_new_config() {
        let config = HasherConfig::new(15, 11, 3).unwrap();
        assert_eq!(config.k, 15);
        assert_eq!(config.w, 11);
        assert_eq!(config.hasher().unwrap().seed(), 3);
    }

    #[test]
    fn test_validate_k_out_of_range() {
        assert!(HasherConfig::new(32, 31, 17).is_err());
        assert!(HasherConfig::new(0, 31, 17).is_err());
    }

    #[test]
    fn test_validate_zero_w() {
        assert!(HasherConfig::new(19, 0, 17).is_err());
    }

    #[test]
    fn test_validate_table_bits() {
        let config = HasherConfig { table_bits: 8, ..HasherConfig::default() };
        assert!(config.validate().is_err());
        let config = HasherConfig { table_bits: 20, ..HasherConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_modset() {
        let config = HasherConfig { table_bits: 20, ..HasherConfig::default() };
        let ms = config.empty_modset().unwrap();
        assert_eq!(ms.max(), 0);
        assert_eq!(ms.table_bits(), 20);
        assert_eq!(ms.hasher().k(), 19);
    }
}
