//! Builder module for constructing indexes, read sets and reference maps
//!
//! This module implements the file-driven build pipeline:
//! 1. Parse and screen input sequences (FASTA/FASTQ, optionally gzipped)
//! 2. Sample modimizers for each batch of records in parallel
//! 3. Insert fingerprints into the index in record order, counting depth
//! 4. Recount depths from the reads and assign copy numbers
//! 5. Store read hit lists and build the inverse index
//! 6. Place reference sequences and classify copy by reference depth

pub mod config;
pub mod parse;
pub mod modset_builder;
pub mod readset_builder;
pub mod reference_builder;

pub use config::HasherConfig;
pub use parse::{parse_batches, parse_sequences, SequenceRecord};
pub use modset_builder::{AddSummary, ModsetBuilder};
pub use readset_builder::ReadsetBuilder;
pub use reference_builder::build_reference;
