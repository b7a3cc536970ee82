//! Sequence file reading
//!
//! FASTA and FASTQ, plain or gzipped, are read through needletail. Records
//! leave this module as screened 2-bit codes: degenerate bases become A so
//! that sampling never has to skip a base.

use std::path::Path;

use anyhow::{Context, Result};
use needletail::parse_fastx_file;

use crate::encoding::screen_sequence;

/// One parsed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Header line after the marker
    pub id: String,
    /// Screened 2-bit base codes
    pub codes: Vec<u8>,
}

impl SequenceRecord {
    /// First word of the header
    pub fn name(&self) -> &str {
        self.id.split_whitespace().next().unwrap_or_default()
    }
}

/// Call `on_record` with the raw header and screened codes of every record
/// in `path`, stopping at the first error
pub fn parse_sequences<P, F>(path: P, mut on_record: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    let path = path.as_ref();
    let mut reader = parse_fastx_file(path)
        .with_context(|| format!("Failed to open sequence file: {}", path.display()))?;

    let mut n = 0usize;
    while let Some(record) = reader.next() {
        n += 1;
        let record = record.with_context(|| format!("Bad record {} in {}", n, path.display()))?;
        on_record(record.id(), &screen_sequence(&record.seq()))?;
    }
    Ok(())
}

/// Read `path` in batches of at most `batch_size` records
///
/// The last batch may be short; an empty file yields no batch.
pub fn parse_batches<P, F>(path: P, batch_size: usize, mut on_batch: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(Vec<SequenceRecord>) -> Result<()>,
{
    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    parse_sequences(path, |id, codes| {
        batch.push(SequenceRecord {
            id: String::from_utf8_lossy(id).into_owned(),
            codes: codes.to_vec(),
        });
        if batch.len() == batch_size {
            on_batch(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)))?;
        }
        Ok(())
    })?;
    if batch.is_empty() {
        return Ok(());
    }
    on_batch(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fasta(records: &[(&str, &str)]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for (id, seq) in records {
            writeln!(file, ">{}\n{}", id, seq).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_records_screened() -> Result<()> {
        let file = fasta(&[("r1 first read", "ACGT"), ("r2", "GNNtR")]);
        let mut seen = Vec::new();
        parse_sequences(file.path(), |id, codes| {
            seen.push((String::from_utf8_lossy(id).into_owned(), codes.to_vec()));
            Ok(())
        })?;
        assert_eq!(
            seen,
            vec![
                ("r1 first read".to_string(), vec![0, 1, 2, 3]),
                ("r2".to_string(), vec![2, 0, 0, 3, 0]),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_wrapped_fasta_joined() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, ">wrapped\nACGT\nTTGG\nCA\n")?;
        file.flush()?;
        let mut codes = Vec::new();
        parse_sequences(file.path(), |_, c| {
            codes = c.to_vec();
            Ok(())
        })?;
        assert_eq!(codes, vec![0, 1, 2, 3, 3, 3, 2, 2, 1, 0]);
        Ok(())
    }

    #[test]
    fn test_fastq_batches() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        for i in 0..5 {
            write!(file, "@q{} run=1\nACGTACGT\n+\nIIIIIIII\n", i)?;
        }
        file.flush()?;

        let mut sizes = Vec::new();
        let mut names = Vec::new();
        parse_batches(file.path(), 2, |batch| {
            sizes.push(batch.len());
            names.extend(batch.iter().map(|r| r.name().to_string()));
            Ok(())
        })?;
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(names, vec!["q0", "q1", "q2", "q3", "q4"]);
        Ok(())
    }

    #[test]
    fn test_callback_error_stops() {
        let file = fasta(&[("a", "AC"), ("b", "GT"), ("c", "TT")]);
        let mut calls = 0;
        let err = parse_batches(file.path(), 1, |_| {
            calls += 1;
            anyhow::bail!("stop")
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.to_string(), "stop");
    }

    #[test]
    fn test_missing_file() {
        let err = parse_sequences("/nonexistent/reads.fa", |_, _| Ok(())).unwrap_err();
        assert!(err.to_string().contains("Failed to open sequence file"));
    }
}
