//! Binary persistence helpers shared by the index, read set and reference map
//!
//! Every persisted file starts with a [`FileHeader`]:
//!
//! ```text
//! FileHeader
//!   ├─ magic: [u8; 8]        ("MODSETv1", "READSTv1", "REFMAPv1")
//!   ├─ version_major: u32
//!   └─ version_minor: u32
//! ```
//!
//! followed by the body of the owning structure, written field by field in
//! little-endian order. A file that ends early is reported as
//! [`SerializationError::Truncated`], never as a partially loaded structure.
//!
//! The fingerprint index embeds the hasher parameters in their own block
//! (magic `MODHSHv1`), so that a loaded index always samples sequences exactly
//! the way it was built.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::hasher::ModHasher;

/// Magic bytes of the fingerprint index file
pub const MODSET_MAGIC: &[u8; 8] = b"MODSETv1";

/// Magic bytes of the hasher block embedded in the index file
pub const HASHER_MAGIC: &[u8; 8] = b"MODHSHv1";

/// Magic bytes of the read-set file
pub const READSET_MAGIC: &[u8; 8] = b"READSTv1";

/// Magic bytes of the reference map file
pub const REFMAP_MAGIC: &[u8; 8] = b"REFMAPv1";

/// File format version: (major, minor)
/// Increment major on breaking changes, minor on compatible changes
pub const FORMAT_VERSION: (u32, u32) = (1, 0);

/// Serialization errors
#[derive(Error, Debug)]
pub enum SerializationError {
    /// I/O error during serialization
    #[error("IO error: {0}")]
    Io(io::Error),
    /// The input ended before the structure was complete
    #[error("truncated file while reading {0}")]
    Truncated(&'static str),
    /// The file does not start with the expected magic tag
    #[error("invalid magic {found:?}, expected {expected:?}")]
    BadMagic {
        /// Magic tag the reader asked for
        expected: String,
        /// Tag found in the file
        found: String,
    },
    /// The major format version is not understood
    #[error("incompatible format version {major}.{minor}, expected {}.{}", FORMAT_VERSION.0, FORMAT_VERSION.1)]
    IncompatibleVersion {
        /// Major version in the file
        major: u32,
        /// Minor version in the file
        minor: u32,
    },
    /// The body is inconsistent with its own header
    #[error("corrupt file: {0}")]
    Corrupt(String),
}

impl From<io::Error> for SerializationError {
    fn from(err: io::Error) -> Self {
        SerializationError::Io(err)
    }
}

/// Result type for serialization operations
pub type SerializationResult<T> = Result<T, SerializationError>;

/// Header at the start of every persisted file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic number for format identification
    pub magic: [u8; 8],
    /// Format version major number
    pub version_major: u32,
    /// Format version minor number
    pub version_minor: u32,
}

impl FileHeader {
    /// Create a header with the current format version
    pub fn new(magic: &[u8; 8]) -> Self {
        Self {
            magic: *magic,
            version_major: FORMAT_VERSION.0,
            version_minor: FORMAT_VERSION.1,
        }
    }

    /// Write header to a writer
    pub fn write(&self, writer: &mut dyn Write) -> SerializationResult<()> {
        writer.write_all(&self.magic)?;
        write_u32(writer, self.version_major)?;
        write_u32(writer, self.version_minor)?;
        Ok(())
    }

    /// Read a header and check it against the expected magic
    pub fn read(reader: &mut dyn Read, expected: &[u8; 8]) -> SerializationResult<Self> {
        let mut magic = [0u8; 8];
        read_exact(reader, &mut magic, "file header")?;
        if &magic != expected {
            return Err(SerializationError::BadMagic {
                expected: String::from_utf8_lossy(expected).into_owned(),
                found: String::from_utf8_lossy(&magic).into_owned(),
            });
        }

        let version_major = read_u32(reader, "format version")?;
        let version_minor = read_u32(reader, "format version")?;
        if version_major != FORMAT_VERSION.0 {
            return Err(SerializationError::IncompatibleVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        Ok(Self {
            magic,
            version_major,
            version_minor,
        })
    }
}

fn read_exact(reader: &mut dyn Read, buf: &mut [u8], what: &'static str) -> SerializationResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SerializationError::Truncated(what),
        _ => SerializationError::Io(e),
    })
}

/// Write one byte
pub fn write_u8(writer: &mut dyn Write, value: u8) -> SerializationResult<()> {
    writer.write_all(&[value])?;
    Ok(())
}

/// Write a little-endian u16
pub fn write_u16(writer: &mut dyn Write, value: u16) -> SerializationResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian u32
pub fn write_u32(writer: &mut dyn Write, value: u32) -> SerializationResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian u64
pub fn write_u64(writer: &mut dyn Write, value: u64) -> SerializationResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Write a slice of u32 values without a length prefix
pub fn write_u32_slice(writer: &mut dyn Write, values: &[u32]) -> SerializationResult<()> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    writer.write_all(&buf)?;
    Ok(())
}

/// Read one byte
pub fn read_u8(reader: &mut dyn Read, what: &'static str) -> SerializationResult<u8> {
    let mut b = [0u8; 1];
    read_exact(reader, &mut b, what)?;
    Ok(b[0])
}

/// Read a little-endian u16
pub fn read_u16(reader: &mut dyn Read, what: &'static str) -> SerializationResult<u16> {
    let mut b = [0u8; 2];
    read_exact(reader, &mut b, what)?;
    Ok(u16::from_le_bytes(b))
}

/// Read a little-endian u32
pub fn read_u32(reader: &mut dyn Read, what: &'static str) -> SerializationResult<u32> {
    let mut b = [0u8; 4];
    read_exact(reader, &mut b, what)?;
    Ok(u32::from_le_bytes(b))
}

/// Read a little-endian u64
pub fn read_u64(reader: &mut dyn Read, what: &'static str) -> SerializationResult<u64> {
    let mut b = [0u8; 8];
    read_exact(reader, &mut b, what)?;
    Ok(u64::from_le_bytes(b))
}

/// Values read per chunk by [`read_u32_vec`]
const READ_CHUNK: usize = 1 << 16;

/// Read `n` little-endian u32 values
///
/// `n` usually comes from a file header, so the values are read in bounded
/// chunks: a count larger than the file ends in `Truncated` without reserving
/// `n` slots first.
pub fn read_u32_vec(reader: &mut dyn Read, n: usize, what: &'static str) -> SerializationResult<Vec<u32>> {
    let mut values = Vec::with_capacity(n.min(READ_CHUNK));
    let mut buf = vec![0u8; 4 * n.min(READ_CHUNK)];
    let mut left = n;
    while left > 0 {
        let m = left.min(READ_CHUNK);
        let bytes = &mut buf[..4 * m];
        read_exact(reader, bytes, what)?;
        values.extend(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        left -= m;
    }
    Ok(values)
}

/// Write a length-prefixed UTF-8 string
pub fn write_string(writer: &mut dyn Write, value: &str) -> SerializationResult<()> {
    write_u32(writer, value.len() as u32)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// Read a length-prefixed UTF-8 string
pub fn read_string(reader: &mut dyn Read, what: &'static str) -> SerializationResult<String> {
    let len = read_u32(reader, what)? as u64;
    let mut buf = Vec::new();
    reader.take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(SerializationError::Truncated(what));
    }
    String::from_utf8(buf).map_err(|_| SerializationError::Corrupt(format!("{} is not UTF-8", what)))
}

/// Write the hasher block: magic, k, w, seed, factor, shift
pub fn write_hasher(writer: &mut dyn Write, hasher: &ModHasher) -> SerializationResult<()> {
    writer.write_all(HASHER_MAGIC)?;
    write_u32(writer, hasher.k() as u32)?;
    write_u32(writer, hasher.w() as u32)?;
    write_u64(writer, hasher.seed())?;
    write_u64(writer, hasher.factor())?;
    write_u32(writer, 64 - 2 * hasher.k() as u32)?;
    Ok(())
}

/// Read a hasher block written by [`write_hasher`]
pub fn read_hasher(reader: &mut dyn Read) -> SerializationResult<ModHasher> {
    let mut magic = [0u8; 8];
    read_exact(reader, &mut magic, "hasher block")?;
    if &magic != HASHER_MAGIC {
        return Err(SerializationError::BadMagic {
            expected: String::from_utf8_lossy(HASHER_MAGIC).into_owned(),
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    let k = read_u32(reader, "hasher block")? as usize;
    let w = read_u32(reader, "hasher block")? as usize;
    let seed = read_u64(reader, "hasher block")?;
    let factor = read_u64(reader, "hasher block")?;
    let shift = read_u32(reader, "hasher block")?;

    let hasher = ModHasher::from_parts(k, w, seed, factor)
        .map_err(|e| SerializationError::Corrupt(e.to_string()))?;
    if shift != 64 - 2 * k as u32 {
        return Err(SerializationError::Corrupt(format!(
            "hasher shift {} does not match k={}",
            shift, k
        )));
    }
    Ok(hasher)
}

/// Append `.ext` to a root path unless it already carries that extension
fn root_with_extension<P: AsRef<Path>>(root: P, ext: &str) -> PathBuf {
    let path = root.as_ref().to_path_buf();
    match path.extension() {
        Some(e) if e == ext => path,
        _ => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".");
            name.push(ext);
            PathBuf::from(name)
        }
    }
}

/// Path of the fingerprint index file for a root name
pub fn index_file_path<P: AsRef<Path>>(root: P) -> PathBuf {
    root_with_extension(root, "mod")
}

/// Path of the read-set file for a root name
pub fn readset_file_path<P: AsRef<Path>>(root: P) -> PathBuf {
    root_with_extension(root, "readset")
}

/// Path of the reference map file for a root name
pub fn reference_file_path<P: AsRef<Path>>(root: P) -> PathBuf {
    root_with_extension(root, "ref")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader::new(READSET_MAGIC);
        let mut buffer = Vec::new();
        header.write(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 16);

        let header2 = FileHeader::read(&mut buffer.as_slice(), READSET_MAGIC).unwrap();
        assert_eq!(header, header2);
    }

    #[test]
    fn test_header_bad_magic() {
        let mut buffer = Vec::new();
        FileHeader::new(READSET_MAGIC).write(&mut buffer).unwrap();
        let err = FileHeader::read(&mut buffer.as_slice(), MODSET_MAGIC).unwrap_err();
        assert!(matches!(err, SerializationError::BadMagic { .. }));
    }

    #[test]
    fn test_header_future_major() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(REFMAP_MAGIC);
        buffer.extend_from_slice(&(FORMAT_VERSION.0 + 1).to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());
        let err = FileHeader::read(&mut buffer.as_slice(), REFMAP_MAGIC).unwrap_err();
        assert!(matches!(err, SerializationError::IncompatibleVersion { .. }));
    }

    #[test]
    fn test_truncated_read() {
        let buffer = [1u8, 2, 3];
        let err = read_u32(&mut buffer.as_slice(), "depth array").unwrap_err();
        assert!(matches!(err, SerializationError::Truncated("depth array")));
    }

    #[test]
    fn test_hasher_block() {
        let hasher = ModHasher::new(19, 31, 17).unwrap();
        let mut buffer = Vec::new();
        write_hasher(&mut buffer, &hasher).unwrap();
        let loaded = read_hasher(&mut buffer.as_slice()).unwrap();
        assert_eq!(hasher, loaded);
    }

    #[test]
    fn test_u32_vec() {
        let values = vec![0u32, 1, 0x8000_0001, u32::MAX];
        let mut buffer = Vec::new();
        write_u32_slice(&mut buffer, &values).unwrap();
        assert_eq!(read_u32_vec(&mut buffer.as_slice(), 4, "hits").unwrap(), values);
        assert!(read_u32_vec(&mut buffer.as_slice(), 5, "hits").is_err());
    }

    #[test]
    fn test_huge_counts_truncated() {
        let buffer = [7u8; 12];
        let err = read_u32_vec(&mut buffer.as_slice(), usize::MAX / 8, "hits").unwrap_err();
        assert!(matches!(err, SerializationError::Truncated("hits")));

        let mut buffer = u32::MAX.to_le_bytes().to_vec();
        buffer.extend_from_slice(b"chr1");
        let err = read_string(&mut buffer.as_slice(), "name").unwrap_err();
        assert!(matches!(err, SerializationError::Truncated("name")));
    }

    #[test]
    fn test_string_truncated() {
        let mut buffer = Vec::new();
        write_string(&mut buffer, "chr1").unwrap();
        assert_eq!(read_string(&mut buffer.as_slice(), "name").unwrap(), "chr1");
        buffer.pop();
        let err = read_string(&mut buffer.as_slice(), "name").unwrap_err();
        assert!(matches!(err, SerializationError::Truncated("name")));
    }

    #[test]
    fn test_file_path_construction() {
        let base = Path::new("/tmp/reads");
        assert!(index_file_path(base).to_string_lossy().ends_with("reads.mod"));
        assert!(readset_file_path(base).to_string_lossy().ends_with("reads.readset"));
        assert!(reference_file_path(base).to_string_lossy().ends_with("reads.ref"));
        assert_eq!(index_file_path("/tmp/reads.mod"), PathBuf::from("/tmp/reads.mod"));
        assert_eq!(index_file_path("run.v2"), PathBuf::from("run.v2.mod"));
    }
}
