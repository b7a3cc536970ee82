//! Library error type

use std::io;

use thiserror::Error;

use crate::serialization::SerializationError;

/// Errors returned by index, read-set, overlap and assembly operations
#[derive(Error, Debug)]
pub enum ModError {
    /// The fingerprint index has no room for another entry
    #[error("fingerprint index full: capacity {capacity} reached")]
    IndexFull {
        /// Maximum number of entries
        capacity: u32,
    },

    /// Two indexes were built with different sampling parameters
    #[error("incompatible index: {0}")]
    IncompatibleIndex(String),

    /// An assembly seed is not a single-copy fingerprint
    #[error("seed fingerprint {id} has copy number {copy}, not 1")]
    SeedNotUnique {
        /// Fingerprint ID
        id: u32,
        /// Its copy-number class
        copy: u8,
    },

    /// A seed read carries no single-copy fingerprint
    #[error("read {read} has no copy-1 fingerprint to seed from")]
    NoUniqueSeed {
        /// Read ID
        read: u32,
    },

    /// A fingerprint ID is outside the index
    #[error("fingerprint {id} not in index (max {max})")]
    UnknownFingerprint {
        /// Requested ID
        id: u32,
        /// Largest valid ID
        max: u32,
    },

    /// A read ID is outside the read set
    #[error("read {read} not in read set ({count} reads)")]
    UnknownRead {
        /// Requested read
        read: u32,
        /// Number of reads
        count: u32,
    },

    /// Two reference sequences share a name
    #[error("duplicate reference sequence name {0}")]
    DuplicateSequence(String),

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persistence error
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// I/O error outside of the persisted formats
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for library operations
pub type ModResult<T> = Result<T, ModError>;
