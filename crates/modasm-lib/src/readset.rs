//! Readset - per-read hit lists over a fingerprint index
//!
//! Every read is reduced to the ordered list of index fingerprints it
//! contains. A hit is the fingerprint ID with [`TOPBIT`] set when the read
//! carries the fingerprint on its forward strand; alongside each hit the read
//! stores the distance from the previous hit (the first distance is the
//! absolute position of the first hit).
//!
//! All hit and distance lists share two arena vectors; a [`Read`] holds an
//! offset and a count into them. Read 0 is a placeholder so that 0 can mean
//! "no read" in `contained` and elsewhere.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read as _, Write};
use std::ops::{BitOr, BitOrAssign};
use std::path::Path;

use ahash::AHashSet;
use tracing::{debug, info};

use crate::constants::{TOPBIT, TOPMASK};
use crate::error::{ModError, ModResult};
use crate::inverse::InverseIndex;
use crate::modset::{Modset, INFO_REPEAT};
use crate::serialization::{
    read_u32, read_u32_vec, read_u64, read_u8, readset_file_path, write_u32, write_u32_slice,
    write_u64, write_u8, FileHeader, SerializationError, SerializationResult, READSET_MAGIC,
};

/// Reasons a read is considered bad
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BadFlags(u8);

impl BadFlags {
    /// Contains a repeated single-copy fingerprint
    pub const REPEAT: BadFlags = BadFlags(0x01);
    /// Implicated in many bad overlaps
    pub const ORDER10: BadFlags = BadFlags(0x02);
    /// Implicated in remaining bad overlaps
    pub const ORDER1: BadFlags = BadFlags(0x04);
    /// No qualifying overlap
    pub const NO_MATCH: BadFlags = BadFlags(0x08);
    /// Few hits
    pub const LOW_HIT: BadFlags = BadFlags(0x10);
    /// Few single-copy hits
    pub const LOW_COPY1: BadFlags = BadFlags(0x20);

    const NAMES: [(BadFlags, &'static str); 6] = [
        (Self::REPEAT, "repeat"),
        (Self::ORDER10, "order10"),
        (Self::ORDER1, "order1"),
        (Self::NO_MATCH, "no_match"),
        (Self::LOW_HIT, "low_hit"),
        (Self::LOW_COPY1, "low_copy1"),
    ];

    /// No flag set
    pub const fn empty() -> Self {
        BadFlags(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// From raw bits, dropping unknown ones
    pub const fn from_bits_truncate(bits: u8) -> Self {
        BadFlags(bits & 0x3f)
    }

    /// Whether every flag of `other` is set
    pub const fn contains(self, other: BadFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set the flags of `other`
    pub fn insert(&mut self, other: BadFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for BadFlags {
    type Output = BadFlags;
    fn bitor(self, rhs: BadFlags) -> BadFlags {
        BadFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for BadFlags {
    fn bitor_assign(&mut self, rhs: BadFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for BadFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "good");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// One read of the set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Read {
    /// Sequence length in bases
    pub len: u32,
    /// Number of index hits
    pub n_hit: u32,
    /// Number of sampled fingerprints absent from the index
    pub n_miss: u32,
    /// Hits per copy number, refreshed by [`Readset::rebuild_inverse`]
    pub n_copy: [u32; 4],
    /// Bad-read reasons
    pub bad: BadFlags,
    /// Read containing this one, 0 if none
    pub contained: u32,
    offset: usize,
}

impl Read {
    /// This read's slice of an arena vector
    #[inline]
    pub(crate) fn hit_slice<'a>(&self, arena: &'a [u32]) -> &'a [u32] {
        &arena[self.offset..self.offset + self.n_hit as usize]
    }

    /// Whether any bad reason is set
    #[inline]
    pub fn is_bad(&self) -> bool {
        !self.bad.is_empty()
    }
}

/// Hits of one sequence, computed without touching the read set
#[derive(Clone, Debug, Default)]
pub struct SampledRead {
    /// Sequence length
    pub len: u32,
    /// Hits with strand bit
    pub hits: Vec<u32>,
    /// Distance to the previous hit
    pub dx: Vec<u32>,
    /// Sampled fingerprints not in the index
    pub n_miss: u32,
    /// Fingerprint IDs seen more than once in this sequence
    pub repeated: Vec<u32>,
}

/// Sample a screened sequence against `modset` without inserting
pub fn sample_read(modset: &Modset, codes: &[u8]) -> SampledRead {
    let mut sampled = SampledRead {
        len: codes.len() as u32,
        ..SampledRead::default()
    };
    let mut seen = AHashSet::new();
    let mut last_pos = 0usize;
    for m in modset.hasher().sample(codes) {
        let id = modset.find(m.kmer);
        if id == 0 {
            sampled.n_miss += 1;
            continue;
        }
        sampled.hits.push(if m.is_forward { id | TOPBIT } else { id });
        sampled.dx.push((m.position - last_pos) as u32);
        last_pos = m.position;
        if !seen.insert(id) {
            sampled.repeated.push(id);
        }
    }
    sampled.repeated.sort_unstable();
    sampled.repeated.dedup();
    sampled
}

/// Read set: index, reads, hit arena and inverse index
#[derive(Clone, Debug)]
pub struct Readset {
    modset: Modset,
    reads: Vec<Read>,
    hits: Vec<u32>,
    dx: Vec<u32>,
    inverse: InverseIndex,
}

impl Readset {
    /// Create an empty read set over `modset`
    pub fn new(modset: Modset) -> ModResult<Self> {
        if modset.max() >= TOPBIT {
            return Err(ModError::InvalidConfig(format!(
                "too many entries in index: {}",
                modset.max()
            )));
        }
        Ok(Self {
            modset,
            reads: vec![Read::default()],
            hits: Vec::new(),
            dx: Vec::new(),
            inverse: InverseIndex::default(),
        })
    }

    /// Append a read from raw hits; returns its ID
    ///
    /// Depths of the hit fingerprints are incremented. The inverse index is
    /// not updated until [`rebuild_inverse`](Self::rebuild_inverse).
    pub fn push_hits(&mut self, len: u32, hits: &[u32], dx: &[u32], n_miss: u32) -> u32 {
        let ix = self.reads.len() as u32;
        self.reads.push(Read {
            len,
            n_hit: hits.len() as u32,
            n_miss,
            offset: self.hits.len(),
            ..Read::default()
        });
        self.hits.extend_from_slice(hits);
        self.dx.extend_from_slice(&dx[..hits.len()]);
        for &h in hits {
            self.modset.add_depth(h & TOPMASK, 1);
        }
        ix
    }

    /// Append a sampled read, marking its repeated fingerprints in the index
    pub fn push(&mut self, sampled: &SampledRead) -> u32 {
        for &id in &sampled.repeated {
            self.modset.set_flag(id, INFO_REPEAT);
        }
        self.push_hits(sampled.len, &sampled.hits, &sampled.dx, sampled.n_miss)
    }

    /// Recount per-read copy tallies and rebuild the inverse index
    ///
    /// Must be called after reads are added or copy numbers change.
    pub fn rebuild_inverse(&mut self) {
        for read in self.reads.iter_mut().skip(1) {
            let mut n_copy = [0u32; 4];
            for &h in read.hit_slice(&self.hits) {
                n_copy[self.modset.copy(h & TOPMASK) as usize] += 1;
            }
            read.n_copy = n_copy;
        }
        self.inverse = InverseIndex::build(&self.modset, &self.reads, &self.hits);
        debug!(
            "inverse index: {} entries over {} reads",
            self.inverse.len(),
            self.num_reads()
        );
    }

    /// Number of reads, not counting the placeholder
    pub fn num_reads(&self) -> u32 {
        self.reads.len() as u32 - 1
    }

    /// IDs of all reads
    pub fn read_ids(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.num_reads()
    }

    /// Total number of hits
    pub fn total_hits(&self) -> u64 {
        self.hits.len() as u64
    }

    /// Check that `ix` names a read
    pub fn check_read(&self, ix: u32) -> ModResult<()> {
        if ix == 0 || ix as usize >= self.reads.len() {
            return Err(ModError::UnknownRead {
                read: ix,
                count: self.num_reads(),
            });
        }
        Ok(())
    }

    /// Read `ix`
    #[inline]
    pub fn read(&self, ix: u32) -> &Read {
        &self.reads[ix as usize]
    }

    /// Mutable read `ix`
    #[inline]
    pub fn read_mut(&mut self, ix: u32) -> &mut Read {
        &mut self.reads[ix as usize]
    }

    /// All reads including the placeholder at 0
    pub fn reads(&self) -> &[Read] {
        &self.reads
    }

    /// Hits of read `ix`
    #[inline]
    pub fn hits(&self, ix: u32) -> &[u32] {
        self.reads[ix as usize].hit_slice(&self.hits)
    }

    /// Distances of read `ix`
    #[inline]
    pub fn dx(&self, ix: u32) -> &[u32] {
        self.reads[ix as usize].hit_slice(&self.dx)
    }

    /// Absolute hit positions of read `ix`
    pub fn positions(&self, ix: u32) -> Vec<u32> {
        self.dx(ix)
            .iter()
            .scan(0u32, |pos, &d| {
                *pos += d;
                Some(*pos)
            })
            .collect()
    }

    /// Clear all bad flags
    pub fn clear_bad(&mut self) {
        self.reads.iter_mut().for_each(|r| r.bad = BadFlags::empty());
    }

    /// The fingerprint index
    pub fn modset(&self) -> &Modset {
        &self.modset
    }

    /// Mutable index; call [`rebuild_inverse`](Self::rebuild_inverse) after
    /// changing copy numbers or depths
    pub fn modset_mut(&mut self) -> &mut Modset {
        &mut self.modset
    }

    /// The inverse index
    pub fn inverse(&self) -> &InverseIndex {
        &self.inverse
    }

    /// Give back the index
    pub fn into_modset(self) -> Modset {
        self.modset
    }

    /// Totals over reads and fingerprints
    pub fn stats(&self) -> ReadsetStats {
        let mut s = ReadsetStats {
            n_reads: self.num_reads(),
            total_hits: self.total_hits(),
            ..ReadsetStats::default()
        };

        for read in self.reads.iter().skip(1) {
            s.total_len += read.len as u64;
            s.total_miss += read.n_miss as u64;
            for j in 0..4 {
                s.hit_copy[j] += read.n_copy[j] as u64;
            }
            let slot = (read.n_copy[1] as usize).min(2);
            s.copy1_reads[slot] += 1;
            s.copy1_len[slot] += read.len as u64;
            if read.is_bad() {
                s.n_bad += 1;
                for (j, (flag, _)) in BadFlags::NAMES.iter().enumerate() {
                    if read.bad.contains(*flag) {
                        s.bad_by_reason[j] += 1;
                    }
                }
            }
        }

        let ms = &self.modset;
        for id in 1..=ms.max() {
            let c = ms.copy(id) as usize;
            let d = ms.depth(id);
            s.mod_count[c] += 1;
            if d > 0 {
                s.mod_hit[c] += 1;
            }
            if d > 1 {
                s.mod_hit2[c] += 1;
                s.mod_depth2[c] += d as u64;
            }
        }
        s
    }

    /// Serialize the read records to a writer
    ///
    /// ```text
    /// FileHeader ("READSTv1")
    /// total_hits: u64, n_reads: u32 (including the placeholder)
    /// per read: len u32, n_hit u32, n_miss u32, bad u8, contained u32
    /// hits: [u32; total_hits], dx: [u32; total_hits]
    /// ```
    pub fn write_to(&self, writer: &mut dyn Write) -> SerializationResult<()> {
        FileHeader::new(READSET_MAGIC).write(writer)?;
        write_u64(writer, self.total_hits())?;
        write_u32(writer, self.reads.len() as u32)?;
        for read in &self.reads {
            write_u32(writer, read.len)?;
            write_u32(writer, read.n_hit)?;
            write_u32(writer, read.n_miss)?;
            write_u8(writer, read.bad.bits())?;
            write_u32(writer, read.contained)?;
        }
        write_u32_slice(writer, &self.hits)?;
        write_u32_slice(writer, &self.dx)?;
        Ok(())
    }

    /// Deserialize read records against `modset` and rebuild the inverse index
    pub fn read_from(modset: Modset, reader: &mut dyn std::io::Read) -> SerializationResult<Self> {
        FileHeader::read(reader, READSET_MAGIC)?;
        let total_hits = read_u64(reader, "total hits")? as usize;
        let n = read_u32(reader, "read count")? as usize;
        if n == 0 {
            return Err(SerializationError::Corrupt("missing placeholder read".to_string()));
        }

        // n is unchecked until the records have actually been read
        let mut reads = Vec::new();
        let mut offset = 0usize;
        for _ in 0..n {
            let read = Read {
                len: read_u32(reader, "read records")?,
                n_hit: read_u32(reader, "read records")?,
                n_miss: read_u32(reader, "read records")?,
                bad: BadFlags::from_bits_truncate(read_u8(reader, "read records")?),
                contained: read_u32(reader, "read records")?,
                n_copy: [0; 4],
                offset,
            };
            offset += read.n_hit as usize;
            reads.push(read);
        }
        if offset != total_hits {
            return Err(SerializationError::Corrupt(format!(
                "reads hold {} hits, header says {}",
                offset, total_hits
            )));
        }

        let hits = read_u32_vec(reader, total_hits, "hits")?;
        let dx = read_u32_vec(reader, total_hits, "distances")?;
        if let Some(&bad) = hits.iter().find(|&&h| h & TOPMASK == 0 || h & TOPMASK > modset.max()) {
            return Err(SerializationError::Corrupt(format!(
                "hit {:#x} is not in the index",
                bad
            )));
        }

        let mut rs = Readset::new(modset).map_err(|e| SerializationError::Corrupt(e.to_string()))?;
        rs.reads = reads;
        rs.hits = hits;
        rs.dx = dx;
        rs.rebuild_inverse();
        Ok(rs)
    }

    /// Save `<root>.mod` and `<root>.readset`
    pub fn save<P: AsRef<Path>>(&self, root: P) -> SerializationResult<()> {
        let root = root.as_ref();
        self.modset.save(root)?;
        let path = readset_file_path(root);
        let mut writer = BufWriter::new(File::create(&path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        info!("wrote {} reads to {}", self.num_reads(), path.display());
        Ok(())
    }

    /// Load `<root>.mod` and `<root>.readset`
    pub fn load<P: AsRef<Path>>(root: P) -> SerializationResult<Self> {
        let root = root.as_ref();
        let modset = Modset::load(root)?;
        let path = readset_file_path(root);
        let mut reader = BufReader::new(File::open(&path)?);
        let rs = Self::read_from(modset, &mut reader)?;
        let mut rest = [0u8; 1];
        if reader.read(&mut rest)? != 0 {
            return Err(SerializationError::Corrupt(format!(
                "trailing bytes in {}",
                path.display()
            )));
        }
        Ok(rs)
    }
}

/// Totals over a read set
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadsetStats {
    /// Number of reads
    pub n_reads: u32,
    /// Sum of read lengths
    pub total_len: u64,
    /// Sum of hits
    pub total_hits: u64,
    /// Sum of misses
    pub total_miss: u64,
    /// Hits per copy number
    pub hit_copy: [u64; 4],
    /// Reads with 0, 1 and more than 1 copy-1 hits
    pub copy1_reads: [u32; 3],
    /// Total length of the reads in each `copy1_reads` class
    pub copy1_len: [u64; 3],
    /// Reads with any bad flag
    pub n_bad: u32,
    /// Reads per bad reason, in flag order
    pub bad_by_reason: [u32; 6],
    /// Fingerprints per copy number
    pub mod_count: [u32; 4],
    /// Fingerprints per copy number with depth > 0
    pub mod_hit: [u32; 4],
    /// Fingerprints per copy number with depth > 1
    pub mod_hit2: [u32; 4],
    /// Depth summed over `mod_hit2`
    pub mod_depth2: [u64; 4],
}

fn ratio(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        0.0
    } else {
        a / b
    }
}

impl fmt::Display for ReadsetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.n_reads as f64;
        let hits = self.total_hits as f64;
        let len = self.total_len as f64;
        writeln!(
            f,
            "RS {} sequences, total length {} (av {:.1})",
            self.n_reads,
            self.total_len,
            ratio(len, n)
        )?;
        writeln!(
            f,
            "RS {} mod hits, {:.1} bp/hit, frac hit {:.2}, av hits/read {:.1}",
            self.total_hits,
            ratio(len, hits),
            ratio(hits, (self.total_miss + self.total_hits) as f64),
            ratio(hits, n)
        )?;
        writeln!(
            f,
            "RS hit distribution {:.2} copy0, {:.2} copy1, {:.2} copy2, {:.2} copyM",
            ratio(self.hit_copy[0] as f64, hits),
            ratio(self.hit_copy[1] as f64, hits),
            ratio(self.hit_copy[2] as f64, hits),
            ratio(self.hit_copy[3] as f64, hits)
        )?;
        let multi_copy1 = self.hit_copy[1].saturating_sub(self.copy1_reads[1] as u64);
        writeln!(
            f,
            "RS num reads and av_len with 0 copy1 hits {} {:.1} with 1 copy1 hits {} {:.1} >1 copy1 hits {} {:.1} av copy1 hits {:.1}",
            self.copy1_reads[0],
            ratio(self.copy1_len[0] as f64, self.copy1_reads[0] as f64),
            self.copy1_reads[1],
            ratio(self.copy1_len[1] as f64, self.copy1_reads[1] as f64),
            self.copy1_reads[2],
            ratio(self.copy1_len[2] as f64, self.copy1_reads[2] as f64),
            ratio(multi_copy1 as f64, self.copy1_reads[2] as f64)
        )?;
        let b = &self.bad_by_reason;
        writeln!(
            f,
            "RS bad {} : {} repeat, {} order10, {} order1, {} no_match, {} low_hit, {} low_copy1",
            self.n_bad, b[0], b[1], b[2], b[3], b[4], b[5]
        )?;
        write!(f, "RS mod frac hit hit>1 av:")?;
        for (c, name) in ["copy0", "copy1", "copy2", "copyM"].iter().enumerate() {
            write!(
                f,
                " {} {:.3} {:.3} {:.1}",
                name,
                ratio(self.mod_hit[c] as f64, self.mod_count[c] as f64),
                ratio(self.mod_hit2[c] as f64, self.mod_count[c] as f64),
                ratio(self.mod_depth2[c] as f64, self.mod_hit2[c] as f64)
            )?;
        }
        Ok(())
    }
}
