// modasm: modimizer read overlaps and draft layout
//
// A Rust library that samples long reads into sparse fingerprint hits,
// finds read-to-read overlaps, flags problem reads and lays reads out
// along a consensus path.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod constants;
pub mod encoding;
pub mod error;
pub mod hasher;
pub mod modimizer;
pub mod modset;
pub mod inverse;
pub mod readset;
pub mod config;
pub mod context;
pub mod overlap;
pub mod classify;
pub mod assembly;
pub mod reference;
pub mod builder;
pub mod serialization;

// Re-export common types at crate root
pub use error::{ModError, ModResult};
pub use hasher::ModHasher;
pub use modimizer::Modimizer;
pub use modset::{Modset, ModsetSummary};
pub use readset::{BadFlags, Read, Readset, ReadsetStats};
pub use config::{AssemblyConfig, ClassifierConfig, CopyThresholds, MappingConfig, OverlapConfig};
pub use context::RunContext;
pub use overlap::{find_all_overlaps, find_overlaps, Overlap, OverlapReport};
pub use classify::{mark_bad_reads, mark_contained};
pub use assembly::{assemble, assemble_both_ways, Layout, Seed};
pub use reference::{QueryMap, RefMap};
pub use builder::{HasherConfig, ModsetBuilder, ReadsetBuilder};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let (major, minor, patch) = version();
        assert_eq!(major, 0);
        assert_eq!(minor, 1);
        assert_eq!(patch, 0);
    }
}
