//! Constants and defaults for modasm
//!
//! This module defines the default sampling parameters, the bit layouts shared
//! by the index and the read set, and the magic tags of the persisted formats.

/// Default k-mer length
pub const DEFAULT_K: usize = 19;

/// Default sampling modulus (mean density is 1/w)
pub const DEFAULT_W: usize = 31;

/// Default seed for the scrambling factor
pub const DEFAULT_SEED: u64 = 17;

/// Default number of bits of the fingerprint index probe table
pub const DEFAULT_TABLE_BITS: u32 = 28;

/// Smallest allowed probe table
pub const MIN_TABLE_BITS: u32 = 20;

/// Largest allowed probe table (keeps dense IDs inside 32 bits)
pub const MAX_TABLE_BITS: u32 = 34;

/// Maximum k-mer length: a k-mer must fit in 2k < 64 bits
pub const MAX_K: usize = 31;

/// Minimum k-mer length
pub const MIN_K: usize = 1;

/// Set on a hit for forward orientation, clear for reverse
pub const TOPBIT: u32 = 0x8000_0000;

/// Mask extracting the fingerprint ID from a hit
pub const TOPMASK: u32 = 0x7fff_ffff;

/// Depth value meaning "too frequent to index usefully"
pub const DEPTH_SATURATED: u16 = u16::MAX;

/// Version number
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Check if a k-mer size is valid for the modimizer hasher
#[inline]
pub const fn is_valid_k(k: usize) -> bool {
    k >= MIN_K && k <= MAX_K
}

/// Check if a table size is valid for the fingerprint index
#[inline]
pub const fn is_valid_table_bits(bits: u32) -> bool {
    bits >= MIN_TABLE_BITS && bits <= MAX_TABLE_BITS
}
