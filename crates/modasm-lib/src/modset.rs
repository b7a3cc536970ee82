//! Modset - the persistent fingerprint index
//!
//! An open-addressed table maps canonical fingerprints to dense IDs assigned
//! in first-seen order (`1..=max`, `0` means absent). Per ID the index keeps
//! the fingerprint value, a saturating 16-bit depth and a byte of
//! classification bits:
//!
//! ```text
//! info byte
//!   bits 0-1  copy number in {0, 1, 2, M}
//!   0x04      minor variant
//!   0x08      repeated within a read
//!   0x10      internal within a read
//!   0x20      rDNA / tandem repeat region
//! ```
//!
//! Probing starts at `kmer & mask` and steps by an odd stride taken from the
//! higher bits of the fingerprint, so every slot of the power-of-two table is
//! reachable. The number of entries is capped at a quarter of the table.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::config::CopyThresholds;
use crate::constants::{is_valid_table_bits, DEPTH_SATURATED, MAX_TABLE_BITS, MIN_TABLE_BITS};
use crate::encoding::kmer_string;
use crate::error::{ModError, ModResult};
use crate::hasher::ModHasher;
use crate::serialization::{
    index_file_path, read_hasher, read_u16, read_u32, read_u32_vec, read_u64, read_u8,
    write_hasher, write_u16, write_u32, write_u32_slice, write_u64, write_u8, FileHeader,
    SerializationError, SerializationResult, MODSET_MAGIC,
};

/// Copy number 0: noise or sequencing error
pub const COPY_0: u8 = 0;
/// Copy number 1: unique anchor
pub const COPY_1: u8 = 1;
/// Copy number 2: duplicated
pub const COPY_2: u8 = 2;
/// Copy number M: repetitive
pub const COPY_M: u8 = 3;

const COPY_MASK: u8 = 0x03;

/// Minor variant: less than half the depth of a neighbour in some read
pub const INFO_MINOR: u8 = 0x04;
/// Seen more than once within a single read
pub const INFO_REPEAT: u8 = 0x08;
/// Both neighbours within w in some read
pub const INFO_INTERNAL: u8 = 0x10;
/// Domain flag, used for rDNA / tandem repeat membership
pub const INFO_RDNA: u8 = 0x20;

/// Open-addressed fingerprint index with dense IDs
#[derive(Clone, Debug)]
pub struct Modset {
    hasher: ModHasher,
    table_bits: u32,
    table_mask: u64,
    /// Probe table of `1 << table_bits` slots holding IDs
    index: Vec<u32>,
    /// Per-ID arrays, all of length `max + 1`; slot 0 is unused
    value: Vec<u64>,
    depth: Vec<u16>,
    info: Vec<u8>,
    capacity: u32,
    max: u32,
}

/// Largest number of entries a table of `table_bits` can hold
#[inline]
fn default_capacity(table_bits: u32) -> u32 {
    (((1u64 << table_bits) >> 2) - 1) as u32
}

/// Validate `table_bits` and resolve `capacity` (0 = default)
fn checked_capacity(table_bits: u32, capacity: u32) -> ModResult<u32> {
    if !is_valid_table_bits(table_bits) {
        return Err(ModError::InvalidConfig(format!(
            "table bits {} must be between {} and {}",
            table_bits, MIN_TABLE_BITS, MAX_TABLE_BITS
        )));
    }
    let limit = default_capacity(table_bits);
    match capacity {
        0 => Ok(limit),
        c if c > limit => Err(ModError::InvalidConfig(format!(
            "capacity {} is too big for {} table bits",
            c, table_bits
        ))),
        c => Ok(c),
    }
}

impl Modset {
    /// Create an empty index
    ///
    /// `capacity == 0` selects the default of a quarter of the table minus one;
    /// an explicit capacity must stay below a quarter of the table.
    pub fn new(hasher: ModHasher, table_bits: u32, capacity: u32) -> ModResult<Self> {
        let capacity = checked_capacity(table_bits, capacity)?;
        Ok(Self::with_probe_table(
            hasher,
            table_bits,
            capacity,
            vec![0u32; 1usize << table_bits],
        ))
    }

    fn with_probe_table(hasher: ModHasher, table_bits: u32, capacity: u32, index: Vec<u32>) -> Self {
        Self {
            hasher,
            table_bits,
            table_mask: (index.len() - 1) as u64,
            index,
            value: vec![0u64],
            depth: vec![0u16],
            info: vec![0u8],
            capacity,
            max: 0,
        }
    }

    /// Probe for `kmer`; returns the final slot and the ID found there (0 if absent)
    #[inline]
    fn probe(&self, kmer: u64) -> (usize, u32) {
        let mut slot = kmer & self.table_mask;
        let mut stride = 0u64;
        loop {
            let id = self.index[slot as usize];
            if id == 0 || self.value[id as usize] == kmer {
                return (slot as usize, id);
            }
            if stride == 0 {
                stride = ((kmer >> self.table_bits) & self.table_mask) | 1;
            }
            slot = (slot + stride) & self.table_mask;
        }
    }

    /// Look up a fingerprint; 0 if absent
    #[inline]
    pub fn find(&self, kmer: u64) -> u32 {
        self.probe(kmer).1
    }

    /// Look up a fingerprint, allocating the next ID if absent and `insert` is set
    pub fn find_or_insert(&mut self, kmer: u64, insert: bool) -> ModResult<u32> {
        let (slot, id) = self.probe(kmer);
        if id != 0 || !insert {
            return Ok(id);
        }
        if self.max >= self.capacity {
            return Err(ModError::IndexFull {
                capacity: self.capacity,
            });
        }
        self.max += 1;
        self.index[slot] = self.max;
        self.value.push(kmer);
        self.depth.push(0);
        self.info.push(0);
        Ok(self.max)
    }

    /// Add `n` to the depth of `id`, clamping at the saturation sentinel
    #[inline]
    pub fn add_depth(&mut self, id: u32, n: u16) {
        let d = &mut self.depth[id as usize];
        *d = d.saturating_add(n);
    }

    /// Reset every depth to zero
    pub fn clear_depths(&mut self) {
        self.depth.iter_mut().for_each(|d| *d = 0);
    }

    /// Sample a screened sequence and insert every fingerprint, counting depth
    ///
    /// Returns the number of sampled fingerprints.
    pub fn add_sequence(&mut self, codes: &[u8]) -> ModResult<usize> {
        let kmers: Vec<u64> = self.hasher.sample(codes).map(|m| m.kmer).collect();
        self.add_kmers(&kmers)
    }

    /// Insert pre-sampled fingerprints, counting depth
    pub fn add_kmers(&mut self, kmers: &[u64]) -> ModResult<usize> {
        for &kmer in kmers {
            let id = self.find_or_insert(kmer, true)?;
            self.add_depth(id, 1);
        }
        Ok(kmers.len())
    }

    /// Rebuild the table keeping entries with `min <= depth` and
    /// (`max == 0` or `depth < max`); surviving IDs keep their relative order
    pub fn prune(&mut self, min_depth: u32, max_depth: u32) -> ModResult<()> {
        let old_max = self.max;
        let value = std::mem::take(&mut self.value);
        let depth = std::mem::take(&mut self.depth);
        let info = std::mem::take(&mut self.info);

        self.index.iter_mut().for_each(|slot| *slot = 0);
        self.value = vec![0u64];
        self.depth = vec![0u16];
        self.info = vec![0u8];
        self.max = 0;

        for i in 1..=old_max as usize {
            let d = depth[i] as u32;
            if d >= min_depth && (max_depth == 0 || d < max_depth) {
                let id = self.find_or_insert(value[i], true)?;
                self.depth[id as usize] = depth[i];
                self.info[id as usize] = info[i];
            }
        }

        info!(
            "pruned Modset from {} to {} with min {} <= depth < max {}",
            old_max, self.max, min_depth, max_depth
        );
        Ok(())
    }

    /// Fold `other` into this index
    ///
    /// Both indexes must sample identically (k, w and factor). Depths add
    /// with saturation and copy numbers add, capped at M; the other info bits
    /// of this index are kept.
    pub fn merge(&mut self, other: &Modset) -> ModResult<()> {
        if !self.hasher.is_compatible(&other.hasher) {
            return Err(ModError::IncompatibleIndex(format!(
                "k {} w {} factor {:#x} vs k {} w {} factor {:#x}",
                self.hasher.k(),
                self.hasher.w(),
                self.hasher.factor(),
                other.hasher.k(),
                other.hasher.w(),
                other.hasher.factor()
            )));
        }

        let wanted = (self.max as u64 + other.max as u64 + 1).min(default_capacity(self.table_bits) as u64);
        self.capacity = self.capacity.max(wanted as u32);

        for i in 1..=other.max as usize {
            let id = self.find_or_insert(other.value[i], true)? as usize;
            self.depth[id] = self.depth[id].saturating_add(other.depth[i]);
            let c = ((self.info[id] & COPY_MASK) + (other.info[i] & COPY_MASK)).min(COPY_M);
            self.info[id] = (self.info[id] & !COPY_MASK) | c;
        }
        debug!("merged {} entries, new max {}", other.max, self.max);
        Ok(())
    }

    /// Release spare capacity of the per-entry arrays; true if anything changed
    pub fn pack(&mut self) -> bool {
        let before = self.value.capacity();
        self.value.shrink_to_fit();
        self.depth.shrink_to_fit();
        self.info.shrink_to_fit();
        before != self.value.capacity()
    }

    /// Reassign every copy number from depth
    pub fn set_copy_by_depth(&mut self, thresholds: &CopyThresholds) {
        for i in 1..=self.max as usize {
            let d = self.depth[i] as u32;
            let c = if d < thresholds.copy1_min {
                COPY_0
            } else if d < thresholds.copy2_min {
                COPY_1
            } else if d < thresholds.copy_m_min {
                COPY_2
            } else {
                COPY_M
            };
            self.info[i] = (self.info[i] & !COPY_MASK) | c;
        }
    }

    /// Set copy M on every entry with depth at least `min_depth`
    pub fn set_copy_multi_above(&mut self, min_depth: u32) {
        for i in 1..=self.max as usize {
            if self.depth[i] as u32 >= min_depth {
                self.info[i] |= COPY_M;
            }
        }
    }

    /// Copy number of `id` (0..=3)
    #[inline]
    pub fn copy(&self, id: u32) -> u8 {
        self.info[id as usize] & COPY_MASK
    }

    /// Whether `id` is a single-copy anchor
    #[inline]
    pub fn is_copy1(&self, id: u32) -> bool {
        self.copy(id) == COPY_1
    }

    /// Overwrite the copy number of `id`
    #[inline]
    pub fn set_copy(&mut self, id: u32, copy: u8) {
        let i = id as usize;
        self.info[i] = (self.info[i] & !COPY_MASK) | (copy & COPY_MASK);
    }

    /// Set info flag bits on `id`
    #[inline]
    pub fn set_flag(&mut self, id: u32, flag: u8) {
        self.info[id as usize] |= flag & !COPY_MASK;
    }

    /// Whether any of `flag` is set on `id`
    #[inline]
    pub fn has_flag(&self, id: u32, flag: u8) -> bool {
        self.info[id as usize] & flag != 0
    }

    /// Raw info byte of `id`
    #[inline]
    pub fn info(&self, id: u32) -> u8 {
        self.info[id as usize]
    }

    /// Depth of `id`
    #[inline]
    pub fn depth(&self, id: u32) -> u16 {
        self.depth[id as usize]
    }

    /// Whether `id` hit the saturation sentinel
    #[inline]
    pub fn is_saturated(&self, id: u32) -> bool {
        self.depth[id as usize] == DEPTH_SATURATED
    }

    /// Fingerprint value of `id`
    #[inline]
    pub fn value(&self, id: u32) -> u64 {
        self.value[id as usize]
    }

    /// Largest assigned ID (= number of entries)
    #[inline]
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of bits of the probe table
    pub fn table_bits(&self) -> u32 {
        self.table_bits
    }

    /// The hasher every sequence must be sampled with
    pub fn hasher(&self) -> &ModHasher {
        &self.hasher
    }

    /// Lower-case sequence of the fingerprint `id`
    pub fn kmer_string(&self, id: u32) -> String {
        kmer_string(self.value(id), self.hasher.k())
    }

    /// Number of entries per depth, indexed by depth
    pub fn depth_histogram(&self) -> Vec<u32> {
        let mut h: Vec<u32> = Vec::with_capacity(256);
        for &d in &self.depth[1..] {
            let d = d as usize;
            if d >= h.len() {
                h.resize(d + 1, 0);
            }
            h[d] += 1;
        }
        h
    }

    /// Write the histogram as `DP depth count` lines, skipping empty depths
    pub fn write_histogram(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for (depth, &count) in self.depth_histogram().iter().enumerate() {
            if count > 0 {
                writeln!(out, "DP\t{}\t{}", depth, count)?;
            }
        }
        Ok(())
    }

    /// Write one `MH` line per entry: fingerprint, copy, depth, then its depth
    /// in each of `others` (0 where absent)
    pub fn write_depth_report(&self, others: &[Modset], out: &mut dyn Write) -> std::io::Result<()> {
        for i in 1..=self.max {
            write!(out, "MH\t{:x}\t{}\t{}", self.value(i), self.copy(i), self.depth(i))?;
            for other in others {
                match other.find(self.value(i)) {
                    0 => write!(out, "\t0")?,
                    id => write!(out, "\t{}", other.depth(id))?,
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }

    /// Entry, depth and copy-number totals
    pub fn summary(&self) -> ModsetSummary {
        let hist = self.depth_histogram();
        let mut copy = [0u32; 4];
        for &b in &self.info[1..] {
            copy[(b & COPY_MASK) as usize] += 1;
        }

        let mut entries = 0u64;
        let mut total = 0u64;
        for (d, &n) in hist.iter().enumerate() {
            entries += n as u64;
            total += d as u64 * n as u64;
        }
        let mut half = (total / 2) as i64;
        let mut n50 = hist.len();
        for (d, &n) in hist.iter().enumerate() {
            half -= d as i64 * n as i64;
            if half < 0 {
                n50 = d;
                break;
            }
        }

        ModsetSummary {
            k: self.hasher.k(),
            w: self.hasher.w(),
            seed: self.hasher.seed(),
            table_bits: self.table_bits,
            entries: self.max,
            total_count: total,
            mean_depth: if entries > 0 { total as f64 / entries as f64 } else { 0.0 },
            n50_depth: n50 as u32,
            copy,
        }
    }

    /// Serialize to a writer
    ///
    /// ```text
    /// FileHeader ("MODSETv1")
    /// table_bits: u32, entries: u32 (= max + 1)
    /// hasher block ("MODHSHv1", k, w, seed, factor, shift)
    /// probe table: [u32; 1 << table_bits]
    /// value: [u64; max + 1], depth: [u16; max + 1], info: [u8; max + 1]
    /// ```
    pub fn write_to(&self, writer: &mut dyn Write) -> SerializationResult<()> {
        FileHeader::new(MODSET_MAGIC).write(writer)?;
        write_u32(writer, self.table_bits)?;
        write_u32(writer, self.max + 1)?;
        write_hasher(writer, &self.hasher)?;
        write_u32_slice(writer, &self.index)?;
        for &v in &self.value {
            write_u64(writer, v)?;
        }
        for &d in &self.depth {
            write_u16(writer, d)?;
        }
        for &b in &self.info {
            write_u8(writer, b)?;
        }
        Ok(())
    }

    /// Deserialize from a reader
    pub fn read_from(reader: &mut dyn Read) -> SerializationResult<Self> {
        FileHeader::read(reader, MODSET_MAGIC)?;
        let table_bits = read_u32(reader, "table bits")?;
        let size = read_u32(reader, "entry count")?;
        let hasher = read_hasher(reader)?;

        if size == 0 {
            return Err(SerializationError::Corrupt("entry count must include slot 0".to_string()));
        }
        let capacity =
            checked_capacity(table_bits, 0).map_err(|e| SerializationError::Corrupt(e.to_string()))?;
        let max = size - 1;
        if max > capacity {
            return Err(SerializationError::Corrupt(format!(
                "{} entries exceed capacity {}",
                max, capacity
            )));
        }

        let index = read_u32_vec(reader, 1usize << table_bits, "probe table")?;
        if index.iter().any(|&id| id > max) {
            return Err(SerializationError::Corrupt("probe table refers past the last entry".to_string()));
        }
        let mut ms = Self::with_probe_table(hasher, table_bits, capacity, index);
        ms.value = (0..size)
            .map(|_| read_u64(reader, "fingerprint values"))
            .collect::<SerializationResult<_>>()?;
        ms.depth = (0..size)
            .map(|_| read_u16(reader, "depths"))
            .collect::<SerializationResult<_>>()?;
        ms.info = (0..size)
            .map(|_| read_u8(reader, "info bits"))
            .collect::<SerializationResult<_>>()?;
        ms.max = max;
        Ok(ms)
    }

    /// Save to `<root>.mod`
    pub fn save<P: AsRef<Path>>(&self, root: P) -> SerializationResult<()> {
        let path = index_file_path(root);
        let mut writer = BufWriter::new(File::create(&path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        debug!("wrote {} entries to {}", self.max, path.display());
        Ok(())
    }

    /// Load from `<root>.mod`
    pub fn load<P: AsRef<Path>>(root: P) -> SerializationResult<Self> {
        let path = index_file_path(root);
        let mut reader = BufReader::new(File::open(&path)?);
        Self::read_from(&mut reader)
    }
}

/// Totals reported after every index operation
#[derive(Clone, Debug, PartialEq)]
pub struct ModsetSummary {
    /// k-mer length
    pub k: usize,
    /// sampling modulus
    pub w: usize,
    /// hasher seed
    pub seed: u64,
    /// probe table bits
    pub table_bits: u32,
    /// number of entries
    pub entries: u32,
    /// sum of depths
    pub total_count: u64,
    /// mean depth per entry
    pub mean_depth: f64,
    /// depth at which half the total count is reached
    pub n50_depth: u32,
    /// entries per copy number
    pub copy: [u32; 4],
}

impl fmt::Display for ModsetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SH k {}  w/m {}  s {}", self.k, self.w, self.seed)?;
        write!(
            f,
            "MS table bits {} size {} number of entries {}",
            self.table_bits,
            1u64 << self.table_bits,
            self.entries
        )?;
        if self.entries == 0 {
            return Ok(());
        }
        write!(
            f,
            " total count {}\nMS average depth {:.1} N50 depth {}",
            self.total_count, self.mean_depth, self.n50_depth
        )?;
        if self.copy[0] < self.entries {
            write!(
                f,
                " copy0 {} copy1 {} copy2 {} copyM {}",
                self.copy[0], self.copy[1], self.copy[2], self.copy[3]
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> ModHasher {
        ModHasher::new(19, 31, 17).unwrap()
    }

    fn empty() -> Modset {
        Modset::new(hasher(), MIN_TABLE_BITS, 0).unwrap()
    }

    #[test]
    fn test_dense_ids_in_insert_order() {
        let mut ms = empty();
        let kmers: Vec<u64> = (0..1000u64).map(|i| i.wrapping_mul(0x9e37_79b9) ^ 0x55).collect();
        for (i, &k) in kmers.iter().enumerate() {
            assert_eq!(ms.find_or_insert(k, true).unwrap(), i as u32 + 1);
        }
        for (i, &k) in kmers.iter().enumerate() {
            assert_eq!(ms.find(k), i as u32 + 1);
            assert_eq!(ms.find_or_insert(k, true).unwrap(), i as u32 + 1);
        }
        assert_eq!(ms.max(), 1000);
        assert_eq!(ms.find(0xdead_beef_0000), 0);
        assert_eq!(ms.find_or_insert(0xdead_beef_0000, false).unwrap(), 0);
        assert_eq!(ms.max(), 1000);
    }

    #[test]
    fn test_colliding_slots() {
        let mut ms = empty();
        // Same low bits, different strides
        let base = 12345u64;
        let a = base;
        let b = base | (1u64 << 20);
        let c = base | (2u64 << 20);
        assert_eq!(ms.find_or_insert(a, true).unwrap(), 1);
        assert_eq!(ms.find_or_insert(b, true).unwrap(), 2);
        assert_eq!(ms.find_or_insert(c, true).unwrap(), 3);
        assert_eq!((ms.find(a), ms.find(b), ms.find(c)), (1, 2, 3));
    }

    #[test]
    fn test_capacity_limits() {
        assert!(Modset::new(hasher(), 19, 0).is_err());
        assert!(Modset::new(hasher(), 35, 0).is_err());
        assert!(Modset::new(hasher(), 20, 1 << 18).is_err());
        assert_eq!(empty().capacity(), (1 << 18) - 1);

        let mut ms = Modset::new(hasher(), 20, 3).unwrap();
        for k in 1..=3u64 {
            ms.find_or_insert(k, true).unwrap();
        }
        let err = ms.find_or_insert(4, true).unwrap_err();
        assert!(matches!(err, ModError::IndexFull { capacity: 3 }));
        assert_eq!(ms.find_or_insert(4, false).unwrap(), 0);
    }

    #[test]
    fn test_depth_saturates() {
        let mut ms = empty();
        let id = ms.find_or_insert(7, true).unwrap();
        ms.add_depth(id, u16::MAX - 1);
        ms.add_depth(id, 5);
        assert_eq!(ms.depth(id), DEPTH_SATURATED);
        assert!(ms.is_saturated(id));
    }

    #[test]
    fn test_prune_keeps_order() {
        let mut ms = empty();
        for (k, d) in [(10u64, 1u16), (20, 5), (30, 3), (40, 9), (50, 4)] {
            let id = ms.find_or_insert(k, true).unwrap();
            ms.add_depth(id, d);
        }
        ms.set_flag(ms.find(30), INFO_REPEAT);
        ms.prune(3, 9).unwrap();

        assert_eq!(ms.max(), 3);
        assert_eq!(ms.find(20), 1);
        assert_eq!(ms.find(30), 2);
        assert_eq!(ms.find(50), 3);
        assert_eq!(ms.find(10), 0);
        assert_eq!(ms.find(40), 0);
        assert_eq!(ms.depth(2), 3);
        assert!(ms.has_flag(2, INFO_REPEAT));
    }

    #[test]
    fn test_prune_no_upper_bound() {
        let mut ms = empty();
        for (k, d) in [(1u64, 1u16), (2, 1000)] {
            let id = ms.find_or_insert(k, true).unwrap();
            ms.add_depth(id, d);
        }
        ms.prune(1, 0).unwrap();
        assert_eq!(ms.max(), 2);
    }

    #[test]
    fn test_merge() {
        let mut a = empty();
        let mut b = empty();
        let ia = a.find_or_insert(100, true).unwrap();
        a.add_depth(ia, 4);
        a.set_copy(ia, COPY_2);
        a.set_flag(ia, INFO_RDNA);

        let ib = b.find_or_insert(100, true).unwrap();
        b.add_depth(ib, u16::MAX - 1);
        b.set_copy(ib, COPY_2);
        let ib2 = b.find_or_insert(200, true).unwrap();
        b.add_depth(ib2, 2);

        a.merge(&b).unwrap();
        assert_eq!(a.max(), 2);
        assert_eq!(a.depth(ia), DEPTH_SATURATED);
        assert_eq!(a.copy(ia), COPY_M);
        assert!(a.has_flag(ia, INFO_RDNA));
        assert_eq!(a.depth(a.find(200)), 2);
    }

    #[test]
    fn test_merge_incompatible() {
        let mut a = empty();
        let b = Modset::new(ModHasher::new(19, 31, 18).unwrap(), 20, 0).unwrap();
        assert!(matches!(a.merge(&b), Err(ModError::IncompatibleIndex(_))));
    }

    #[test]
    fn test_set_copy_by_depth() {
        let mut ms = empty();
        for (k, d) in [(1u64, 0u16), (2, 1), (3, 2), (4, 3), (5, 10), (6, 11)] {
            let id = ms.find_or_insert(k, true).unwrap();
            ms.add_depth(id, d);
        }
        ms.set_flag(2, INFO_REPEAT);
        ms.set_copy_by_depth(&CopyThresholds::new(1, 3, 10).unwrap());
        let copies: Vec<u8> = (1..=6).map(|i| ms.copy(i)).collect();
        assert_eq!(copies, vec![COPY_0, COPY_1, COPY_1, COPY_2, COPY_M, COPY_M]);
        assert!(ms.has_flag(2, INFO_REPEAT));

        ms.set_copy_multi_above(3);
        assert_eq!(ms.copy(4), COPY_M);
        assert_eq!(ms.copy(2), COPY_1);
    }

    #[test]
    fn test_summary_and_histogram() {
        let mut ms = empty();
        for (k, d) in [(1u64, 1u16), (2, 1), (3, 2), (4, 6)] {
            let id = ms.find_or_insert(k, true).unwrap();
            ms.add_depth(id, d);
        }
        let s = ms.summary();
        assert_eq!(s.entries, 4);
        assert_eq!(s.total_count, 10);
        assert!((s.mean_depth - 2.5).abs() < 1e-9);
        assert_eq!(s.n50_depth, 6);
        assert_eq!(s.copy, [4, 0, 0, 0]);

        let mut out = Vec::new();
        ms.write_histogram(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "DP\t1\t2\nDP\t2\t1\nDP\t6\t1\n");
    }

    #[test]
    fn test_depth_report() {
        let mut a = empty();
        let mut b = empty();
        let id = a.find_or_insert(0xabc, true).unwrap();
        a.add_depth(id, 3);
        a.find_or_insert(0xdef, true).unwrap();
        let idb = b.find_or_insert(0xabc, true).unwrap();
        b.add_depth(idb, 7);

        let mut out = Vec::new();
        a.write_depth_report(&[b], &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "MH\tabc\t0\t3\t7\nMH\tdef\t0\t0\t0\n");
    }

    #[test]
    fn test_add_sequence() {
        let mut ms = Modset::new(ModHasher::new(5, 1, 3).unwrap(), 20, 0).unwrap();
        let codes = vec![0u8, 1, 2, 3, 0, 1, 2, 3];
        assert_eq!(ms.add_sequence(&codes).unwrap(), 4);
        let total: u32 = (1..=ms.max()).map(|i| ms.depth(i) as u32).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut ms = empty();
        for k in 0..500u64 {
            let id = ms.find_or_insert(k * 7919 + 3, true).unwrap();
            ms.add_depth(id, (k % 13) as u16);
            ms.set_copy(id, (k % 4) as u8);
        }
        ms.set_flag(17, INFO_INTERNAL);

        let mut buffer = Vec::new();
        ms.write_to(&mut buffer).unwrap();
        let loaded = Modset::read_from(&mut buffer.as_slice()).unwrap();

        assert_eq!(loaded.max(), ms.max());
        assert_eq!(loaded.index, ms.index);
        assert_eq!(loaded.value, ms.value);
        assert_eq!(loaded.depth, ms.depth);
        assert_eq!(loaded.info, ms.info);
        assert!(loaded.hasher().is_compatible(ms.hasher()));
        assert_eq!(loaded.find(3 + 7919 * 42), 43);
    }

    #[test]
    fn test_truncated_file() {
        let mut ms = empty();
        ms.find_or_insert(99, true).unwrap();
        let mut buffer = Vec::new();
        ms.write_to(&mut buffer).unwrap();
        buffer.truncate(buffer.len() - 1);
        let err = Modset::read_from(&mut buffer.as_slice()).unwrap_err();
        assert!(matches!(err, SerializationError::Truncated(_)));
    }

    #[test]
    fn test_header_sizes_not_trusted() {
        let mut buffer = Vec::new();
        FileHeader::new(MODSET_MAGIC).write(&mut buffer).unwrap();
        write_u32(&mut buffer, MAX_TABLE_BITS).unwrap();
        write_u32(&mut buffer, 6).unwrap();
        write_hasher(&mut buffer, &hasher()).unwrap();
        buffer.extend_from_slice(&[0u8; 64]);
        let err = Modset::read_from(&mut buffer.as_slice()).unwrap_err();
        assert!(matches!(err, SerializationError::Truncated("probe table")));

        let mut buffer = Vec::new();
        FileHeader::new(MODSET_MAGIC).write(&mut buffer).unwrap();
        write_u32(&mut buffer, MIN_TABLE_BITS).unwrap();
        write_u32(&mut buffer, u32::MAX).unwrap();
        write_hasher(&mut buffer, &hasher()).unwrap();
        let err = Modset::read_from(&mut buffer.as_slice()).unwrap_err();
        assert!(matches!(err, SerializationError::Corrupt(_)));
    }
}
