//! Fingerprint index construction from sequence files
//!
//! Records are read in batches; each batch is sampled in parallel and its
//! fingerprints are then inserted by a single writer, in record order, so
//! dense IDs do not depend on the thread count.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use tracing::info;

use crate::builder::config::HasherConfig;
use crate::builder::parse::{parse_batches, SequenceRecord};
use crate::error::ModResult;
use crate::modset::Modset;

/// Totals of sequences added to an index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddSummary {
    /// Records read
    pub sequences: u64,
    /// Bases read
    pub bases: u64,
    /// Fingerprints sampled
    pub fingerprints: u64,
}

impl AddSummary {
    fn absorb(&mut self, other: &AddSummary) {
        self.sequences += other.sequences;
        self.bases += other.bases;
        self.fingerprints += other.fingerprints;
    }
}

/// Sample `batch` in parallel on the current pool and insert every fingerprint
pub fn add_batch(modset: &mut Modset, batch: &[SequenceRecord]) -> ModResult<AddSummary> {
    let hasher = modset.hasher().clone();
    let sampled: Vec<Vec<u64>> = batch
        .par_iter()
        .map(|r| hasher.sample(&r.codes).map(|m| m.kmer).collect())
        .collect();

    let mut summary = AddSummary {
        sequences: batch.len() as u64,
        bases: batch.iter().map(|r| r.codes.len() as u64).sum(),
        fingerprints: 0,
    };
    for kmers in &sampled {
        summary.fingerprints += modset.add_kmers(kmers)? as u64;
    }
    Ok(summary)
}

/// Builder for fingerprint indexes
pub struct ModsetBuilder {
    config: HasherConfig,
}

impl ModsetBuilder {
    /// Create a new index builder with the given configuration
    pub fn new(config: HasherConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration
    pub fn config(&self) -> &HasherConfig {
        &self.config
    }

    /// Build a new index from sequence files
    ///
    /// # Parallelism
    /// The number of threads is controlled by `config.num_threads`:
    /// - `0`: use all available CPU cores (rayon default)
    /// - `N`: use exactly N threads
    pub fn build_from_files<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Result<Modset> {
        self.config.print();
        let mut modset = self.config.empty_modset()?;
        self.add_files(&mut modset, paths)?;
        modset.pack();
        info!("{}", modset.summary());
        Ok(modset)
    }

    /// Add the sequences of `paths` to an existing index
    pub fn add_files<P: AsRef<Path> + Sync>(&self, modset: &mut Modset, paths: &[P]) -> Result<AddSummary> {
        let pool = self.config.thread_pool().map_err(|e| anyhow!(e))?;
        pool.install(|| {
            let mut total = AddSummary::default();
            for path in paths {
                let path = path.as_ref();
                let summary = self.add_file(modset, path)?;
                info!(
                    "  {} sequences, {} bases, {} fingerprints from {}",
                    summary.sequences,
                    summary.bases,
                    summary.fingerprints,
                    path.display()
                );
                total.absorb(&summary);
            }
            Ok(total)
        })
    }

    fn add_file(&self, modset: &mut Modset, path: &Path) -> Result<AddSummary> {
        let mut summary = AddSummary::default();
        parse_batches(path, self.config.batch_size, |batch| {
            let added = add_batch(modset, &batch)
                .with_context(|| format!("Failed to index sequences from {}", path.display()))?;
            summary.absorb(&added);
            Ok(())
        })?;
        Ok(summary)
    }
}
