//! Read-set construction from read files
//!
//! Depths in the index are reset and recounted from the reads. Each batch of
//! records is sampled against the index in parallel; reads are appended in
//! file order by a single writer.

use std::path::Path;

use anyhow::{anyhow, Result};
use rayon::prelude::*;
use tracing::info;

use crate::builder::config::HasherConfig;
use crate::builder::parse::{parse_batches, SequenceRecord};
use crate::config::CopyThresholds;
use crate::modset::Modset;
use crate::readset::{sample_read, Readset, SampledRead};

/// Append `batch` to `readset`, sampling on the current pool; returns the
/// ID of the first added read
pub fn add_read_batch(readset: &mut Readset, batch: &[SequenceRecord]) -> u32 {
    let modset = readset.modset();
    let sampled: Vec<SampledRead> = batch
        .par_iter()
        .map(|r| sample_read(modset, &r.codes))
        .collect();
    let first = readset.num_reads() + 1;
    for s in &sampled {
        readset.push(s);
    }
    first
}

/// Builder for read sets
pub struct ReadsetBuilder {
    config: HasherConfig,
    thresholds: Option<CopyThresholds>,
}

impl ReadsetBuilder {
    /// Create a builder; thread count and batch size come from `config`
    pub fn new(config: HasherConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            config,
            thresholds: None,
        })
    }

    /// Reclassify copy numbers from the recounted depths before the inverse
    /// index is built
    pub fn with_copy_thresholds(mut self, thresholds: CopyThresholds) -> Result<Self, String> {
        thresholds.validate()?;
        self.thresholds = Some(thresholds);
        Ok(self)
    }

    /// Build a read set over `modset` from read files
    pub fn build_from_files<P: AsRef<Path> + Sync>(&self, mut modset: Modset, paths: &[P]) -> Result<Readset> {
        modset.clear_depths();
        let mut readset = Readset::new(modset)?;

        let pool = self.config.thread_pool().map_err(|e| anyhow!(e))?;
        pool.install(|| -> Result<()> {
            for path in paths {
                let path = path.as_ref();
                let before = readset.num_reads();
                parse_batches(path, self.config.batch_size, |batch| {
                    add_read_batch(&mut readset, &batch);
                    Ok(())
                })?;
                info!("  {} reads from {}", readset.num_reads() - before, path.display());
            }
            Ok(())
        })?;

        if let Some(thresholds) = &self.thresholds {
            thresholds.print();
            readset.modset_mut().set_copy_by_depth(thresholds);
        }
        readset.rebuild_inverse();
        info!(
            "read {} reads with {} hits",
            readset.num_reads(),
            readset.total_hits()
        );
        Ok(readset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::modset_builder::ModsetBuilder;
    use crate::encoding::decode_sequence;
    use crate::modset::{COPY_1, INFO_REPEAT};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn random_codes(n: usize, seed: u64) -> Vec<u8> {
        let mut x = seed;
        (0..n)
            .map(|_| {
                x = x
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((x >> 33) & 3) as u8
            })
            .collect()
    }

    fn config(threads: usize) -> HasherConfig {
        HasherConfig {
            table_bits: 20,
            num_threads: threads,
            batch_size: 3,
            ..HasherConfig::default()
        }
    }

    #[test]
    fn test_depths_recounted_from_reads() -> Result<()> {
        let genome = random_codes(6000, 11);
        let mut file = NamedTempFile::new()?;
        for (i, start) in [0usize, 1000, 2000, 3000, 4000].iter().enumerate() {
            writeln!(file, ">r{}", i)?;
            writeln!(file, "{}", decode_sequence(&genome[*start..*start + 2000]))?;
        }
        file.flush()?;

        let ms = ModsetBuilder::new(config(2))
            .unwrap()
            .build_from_files(&[file.path()])?;
        let thresholds = CopyThresholds::new(1, 3, 10).unwrap();
        let rs = ReadsetBuilder::new(config(2))
            .unwrap()
            .with_copy_thresholds(thresholds)
            .unwrap()
            .build_from_files(ms, &[file.path()])?;

        assert_eq!(rs.num_reads(), 5);
        let ms = rs.modset();
        // every 1000-base tile is covered by one or two reads
        assert!((1..=ms.max()).all(|id| (1..=2).contains(&ms.depth(id))));
        assert!((1..=ms.max()).all(|id| ms.copy(id) == COPY_1));
        assert_eq!(rs.read(2).n_copy[1], rs.read(2).n_hit);
        assert!(!rs.inverse().is_empty());
        Ok(())
    }

    #[test]
    fn test_repeat_marked_in_index() -> Result<()> {
        let unit = random_codes(200, 4);
        let tandem: Vec<u8> = unit.iter().cycle().take(2000).copied().collect();
        let mut file = NamedTempFile::new()?;
        writeln!(file, ">tandem")?;
        writeln!(file, "{}", decode_sequence(&tandem))?;
        file.flush()?;

        let ms = ModsetBuilder::new(config(1))
            .unwrap()
            .build_from_files(&[file.path()])?;
        let rs = ReadsetBuilder::new(config(1))
            .unwrap()
            .build_from_files(ms, &[file.path()])?;
        let ms = rs.modset();
        assert!(ms.max() > 0);
        assert!((1..=ms.max()).any(|id| ms.has_flag(id, INFO_REPEAT)));
        Ok(())
    }

    #[test]
    fn test_bad_thresholds_rejected() {
        let thresholds = CopyThresholds {
            copy1_min: 5,
            copy2_min: 2,
            copy_m_min: 10,
        };
        assert!(ReadsetBuilder::new(config(1))
            .unwrap()
            .with_copy_thresholds(thresholds)
            .is_err());
    }
}
