//! Reference map construction from FASTA files

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::builder::parse::parse_sequences;
use crate::modset::Modset;
use crate::reference::{RefCopyCounts, RefMap, RefMapBuilder};

/// Load every sequence of `paths` into a reference map over `modset`
///
/// With `insert`, fingerprints missing from the index are added; otherwise
/// they are skipped and the index is left as it is.
pub fn build_reference<P: AsRef<Path>>(modset: Modset, insert: bool, paths: &[P]) -> Result<(RefMap, RefCopyCounts)> {
    let mut builder = RefMapBuilder::new(modset, insert);
    for path in paths {
        let path = path.as_ref();
        let mut n = 0usize;
        parse_sequences(path, |id, codes| {
            let name = String::from_utf8_lossy(id);
            let name = name.split_whitespace().next().unwrap_or_default();
            builder
                .add_sequence(name, codes)
                .with_context(|| format!("Failed to add reference sequence {name}"))?;
            n += 1;
            Ok(())
        })?;
        info!("  {} reference sequences from {}", n, path.display());
    }
    let (refmap, counts) = builder.finish();
    info!("reference: {} sequences, {} slots", refmap.names().len(), refmap.num_slots());
    Ok((refmap, counts))
}
