//! Reference map: where each fingerprint occurs in a set of reference sequences
//!
//! Every sampled fingerprint of the reference occupies one slot holding its
//! index ID, its offset and the sequence it came from. Slots are numbered in
//! sampling order, so consecutive slots of one sequence are consecutive
//! fingerprints along it. A CSR reverse map lists the slots of each ID.
//!
//! Query sequences are sampled the same way and chained into collinear
//! blocks along the reference.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use ahash::AHashMap;
use tracing::{debug, info};

use crate::config::MappingConfig;
use crate::error::{ModError, ModResult};
use crate::modset::{Modset, COPY_1, COPY_2, COPY_M};
use crate::serialization::{
    read_string, read_u32, read_u32_vec, reference_file_path, write_string, write_u32,
    write_u32_slice, FileHeader, SerializationError, SerializationResult, REFMAP_MAGIC,
};

/// Fingerprints by reference copy count, from [`RefMapBuilder::finish`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefCopyCounts {
    /// Seen once
    pub copy1: u32,
    /// Seen twice
    pub copy2: u32,
    /// Seen more often
    pub multi: u32,
    /// Not seen in the reference, copy number left alone
    pub unseen: u32,
}

/// Collects reference sequences into a [`RefMap`]
pub struct RefMapBuilder {
    modset: Modset,
    insert: bool,
    names: Vec<String>,
    name_ids: AHashMap<String, u32>,
    lengths: Vec<u32>,
    index: Vec<u32>,
    offset: Vec<u32>,
    seq: Vec<u32>,
    total_len: u64,
}

impl RefMapBuilder {
    /// Start over `modset`; with `insert`, unseen fingerprints are added
    pub fn new(modset: Modset, insert: bool) -> Self {
        Self {
            modset,
            insert,
            names: Vec::new(),
            name_ids: AHashMap::new(),
            lengths: Vec::new(),
            index: Vec::new(),
            offset: Vec::new(),
            seq: Vec::new(),
            total_len: 0,
        }
    }

    /// Sample one reference sequence; returns the number of slots added
    pub fn add_sequence(&mut self, name: &str, codes: &[u8]) -> ModResult<usize> {
        if self.name_ids.contains_key(name) {
            return Err(ModError::DuplicateSequence(name.to_string()));
        }
        let seq_id = self.names.len() as u32;
        self.name_ids.insert(name.to_string(), seq_id);
        self.names.push(name.to_string());
        self.lengths.push(codes.len() as u32);
        self.total_len += codes.len() as u64;

        let hasher = self.modset.hasher().clone();
        let before = self.index.len();
        for m in hasher.sample(codes) {
            let id = self.modset.find_or_insert(m.kmer, self.insert)?;
            if id == 0 {
                continue;
            }
            self.index.push(id);
            self.offset.push(m.position as u32);
            self.seq.push(seq_id);
        }
        Ok(self.index.len() - before)
    }

    /// Classify copy numbers by reference depth and build the reverse map
    pub fn finish(mut self) -> (RefMap, RefCopyCounts) {
        let max = self.modset.max();
        let depth = count_depths(&self.index, max);
        let mut counts = RefCopyCounts::default();
        for id in 1..=max {
            match depth[id as usize] {
                0 => counts.unseen += 1,
                1 => {
                    self.modset.set_copy(id, COPY_1);
                    counts.copy1 += 1;
                }
                2 => {
                    self.modset.set_copy(id, COPY_2);
                    counts.copy2 += 1;
                }
                _ => {
                    self.modset.set_copy(id, COPY_M);
                    counts.multi += 1;
                }
            }
        }
        if self.insert {
            self.modset.pack();
        }
        info!(
            "  {} hashes from {} reference sequences, total length {}",
            self.index.len(),
            self.names.len(),
            self.total_len
        );
        info!(
            "  {} copy 1, {} copy 2, {} multiple, {} not in reference",
            counts.copy1, counts.copy2, counts.multi, counts.unseen
        );

        let refmap = RefMap::from_parts(self.modset, self.names, self.lengths, self.index, self.offset, self.seq);
        (refmap, counts)
    }
}

fn count_depths(index: &[u32], max: u32) -> Vec<u32> {
    let mut depth = vec![0u32; max as usize + 1];
    for &id in index {
        depth[id as usize] += 1;
    }
    depth
}

/// Fingerprint locations over a set of reference sequences
#[derive(Clone, Debug)]
pub struct RefMap {
    modset: Modset,
    names: Vec<String>,
    lengths: Vec<u32>,
    index: Vec<u32>,
    offset: Vec<u32>,
    seq: Vec<u32>,
    depth: Vec<u32>,
    /// `rev[loc[id]..loc[id + 1]]` are the slots of `id`
    loc: Vec<u32>,
    rev: Vec<u32>,
}

impl RefMap {
    fn from_parts(
        modset: Modset,
        names: Vec<String>,
        lengths: Vec<u32>,
        index: Vec<u32>,
        offset: Vec<u32>,
        seq: Vec<u32>,
    ) -> Self {
        let max = modset.max();
        let depth = count_depths(&index, max);
        let mut loc = vec![0u32; max as usize + 2];
        for id in 1..=max as usize {
            loc[id + 1] = loc[id] + depth[id];
        }
        let mut cursor = loc.clone();
        let mut rev = vec![0u32; index.len()];
        for (slot, &id) in index.iter().enumerate() {
            rev[cursor[id as usize] as usize] = slot as u32;
            cursor[id as usize] += 1;
        }
        Self {
            modset,
            names,
            lengths,
            index,
            offset,
            seq,
            depth,
            loc,
            rev,
        }
    }

    /// The index
    pub fn modset(&self) -> &Modset {
        &self.modset
    }

    /// Reference sequence names, by sequence ID
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Reference sequence lengths, by sequence ID
    pub fn lengths(&self) -> &[u32] {
        &self.lengths
    }

    /// Number of slots
    pub fn num_slots(&self) -> usize {
        self.index.len()
    }

    /// Times `id` occurs in the reference
    pub fn depth(&self, id: u32) -> u32 {
        self.depth.get(id as usize).copied().unwrap_or(0)
    }

    /// Slots holding `id`, in reference order
    pub fn slots(&self, id: u32) -> &[u32] {
        let i = id as usize;
        if i + 1 >= self.loc.len() {
            return &[];
        }
        &self.rev[self.loc[i] as usize..self.loc[i + 1] as usize]
    }

    /// Sequence ID and offset of `slot`
    pub fn location(&self, slot: u32) -> (u32, u32) {
        (self.seq[slot as usize], self.offset[slot as usize])
    }

    /// Sample `codes` and chain its fingerprints into collinear blocks
    ///
    /// Multi-copy fingerprints are ignored. A copy-2 fingerprint that breaks
    /// the current block is retried at its second location.
    pub fn map_query(&self, codes: &[u8], config: &MappingConfig) -> QueryMap {
        let ms = &self.modset;
        let samples: Vec<(u32, u32)> = ms
            .hasher()
            .sample(codes)
            .map(|m| (ms.find(m.kmer), m.position as u32))
            .collect();

        let mut result = QueryMap {
            len: codes.len() as u32,
            n_sampled: samples.len() as u32,
            ..QueryMap::default()
        };
        for &(id, _) in &samples {
            if id == 0 {
                result.n_miss += 1;
            } else {
                result.copy[ms.copy(id) as usize] += 1;
            }
        }

        let mut block: Option<OpenBlock> = None;
        for (i, &(id, _)) in samples.iter().enumerate() {
            if id == 0 || ms.copy(id) == COPY_M {
                continue;
            }
            let slots = self.slots(id);
            let Some(&first) = slots.first() else {
                continue;
            };
            let is1 = ms.is_copy1(id);
            let mut slot = first;
            let mut ends = self.breaks(block.as_ref(), slot, config);
            if ends && block.is_some() && !is1 {
                if let Some(&second) = slots.get(1) {
                    slot = second;
                    ends = self.breaks(block.as_ref(), slot, config);
                }
            }
            if ends {
                if let Some(open) = block.take() {
                    self.close(open, &samples, config, &mut result);
                }
                block = Some(OpenBlock {
                    loc0: slot,
                    loc_n: slot,
                    i0: i,
                    i_n: i,
                    n1: 0,
                    n2: 0,
                });
            }
            if let Some(open) = block.as_mut() {
                if is1 {
                    open.n1 += 1;
                } else {
                    open.n2 += 1;
                }
                open.loc_n = slot;
                open.i_n = i;
            }
        }
        if let Some(open) = block {
            self.close(open, &samples, config, &mut result);
        }
        result
    }

    /// Whether placing a hit at `slot` ends `block`
    fn breaks(&self, block: Option<&OpenBlock>, slot: u32, config: &MappingConfig) -> bool {
        let Some(b) = block else {
            return true;
        };
        if self.seq[slot as usize] != self.seq[b.loc0 as usize] {
            return true;
        }
        let span = b.i_n as i64 - b.i0 as i64;
        let drift = config.max_block_drift as i64;
        if b.loc0 < b.loc_n {
            slot < b.loc_n || (b.loc_n as i64 - b.loc0 as i64 - span).abs() > drift
        } else if b.loc0 > b.loc_n {
            slot > b.loc_n || (b.loc0 as i64 - b.loc_n as i64 - span).abs() > drift
        } else {
            false
        }
    }

    fn close(&self, b: OpenBlock, samples: &[(u32, u32)], config: &MappingConfig, result: &mut QueryMap) {
        if b.n1 <= config.min_block_copy1 {
            return;
        }
        let slot_span = (b.loc_n as i64 - b.loc0 as i64).unsigned_abs().max(1);
        result.blocks.push(MapBlock {
            query_start: samples[b.i0].1,
            query_end: samples[b.i_n].1,
            seq: self.seq[b.loc0 as usize],
            ref_start: self.offset[b.loc0 as usize],
            ref_end: self.offset[b.loc_n as usize],
            is_forward: b.loc0 <= b.loc_n,
            n_copy1: b.n1,
            n_copy2: b.n2,
            density: (b.n1 + b.n2) as f64 / slot_span as f64,
            copy1_fraction: if result.copy[1] > 0 {
                b.n1 as f64 / result.copy[1] as f64
            } else {
                0.0
            },
        });
    }

    /// Serialize the reference part; the index is written separately
    ///
    /// ```text
    /// FileHeader ("REFMAPv1")
    /// n_seqs: u32, then per sequence: name (u32 length + UTF-8), length: u32
    /// n_slots: u32, index: [u32; n_slots], offset: [u32; n_slots], seq: [u32; n_slots]
    /// ```
    ///
    /// Depths and the reverse map are rebuilt on load.
    pub fn write_to(&self, writer: &mut dyn Write) -> SerializationResult<()> {
        FileHeader::new(REFMAP_MAGIC).write(writer)?;
        write_u32(writer, self.names.len() as u32)?;
        for (name, &len) in self.names.iter().zip(&self.lengths) {
            write_string(writer, name)?;
            write_u32(writer, len)?;
        }
        write_u32(writer, self.index.len() as u32)?;
        write_u32_slice(writer, &self.index)?;
        write_u32_slice(writer, &self.offset)?;
        write_u32_slice(writer, &self.seq)?;
        Ok(())
    }

    /// Deserialize the reference part over an already loaded index
    pub fn read_from(modset: Modset, reader: &mut dyn Read) -> SerializationResult<Self> {
        FileHeader::read(reader, REFMAP_MAGIC)?;
        let n_seqs = read_u32(reader, "sequence count")?;
        let mut names = Vec::new();
        let mut lengths = Vec::new();
        for _ in 0..n_seqs {
            names.push(read_string(reader, "sequence name")?);
            lengths.push(read_u32(reader, "sequence length")?);
        }
        let n = read_u32(reader, "slot count")? as usize;
        let index = read_u32_vec(reader, n, "slot index")?;
        let offset = read_u32_vec(reader, n, "slot offsets")?;
        let seq = read_u32_vec(reader, n, "slot sequences")?;

        if index.iter().any(|&id| id == 0 || id > modset.max()) {
            return Err(SerializationError::Corrupt("slot refers outside the index".to_string()));
        }
        if seq.iter().any(|&s| s >= n_seqs) {
            return Err(SerializationError::Corrupt("slot refers to an unknown sequence".to_string()));
        }
        Ok(Self::from_parts(modset, names, lengths, index, offset, seq))
    }

    /// Save `<root>.mod` and `<root>.ref`
    pub fn save<P: AsRef<Path>>(&self, root: P) -> SerializationResult<()> {
        let root = root.as_ref();
        self.modset.save(root)?;
        let path = reference_file_path(root);
        let mut writer = BufWriter::new(File::create(&path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        debug!("wrote {} reference slots to {}", self.index.len(), path.display());
        Ok(())
    }

    /// Load `<root>.mod` and `<root>.ref`
    pub fn load<P: AsRef<Path>>(root: P) -> SerializationResult<Self> {
        let root = root.as_ref();
        let modset = Modset::load(root)?;
        let mut reader = BufReader::new(File::open(reference_file_path(root))?);
        Self::read_from(modset, &mut reader)
    }
}

#[derive(Clone, Copy, Debug)]
struct OpenBlock {
    loc0: u32,
    loc_n: u32,
    i0: usize,
    i_n: usize,
    n1: u32,
    n2: u32,
}

/// A collinear run of query fingerprints along one reference sequence
#[derive(Clone, Debug, PartialEq)]
pub struct MapBlock {
    /// Position of the first query fingerprint
    pub query_start: u32,
    /// Position of the last query fingerprint
    pub query_end: u32,
    /// Reference sequence ID
    pub seq: u32,
    /// Reference offset of the first fingerprint
    pub ref_start: u32,
    /// Reference offset of the last fingerprint
    pub ref_end: u32,
    /// Query and reference run the same way
    pub is_forward: bool,
    /// Single-copy hits
    pub n_copy1: u32,
    /// Two-copy hits
    pub n_copy2: u32,
    /// Hits per reference slot spanned
    pub density: f64,
    /// Share of the query's single-copy hits in this block
    pub copy1_fraction: f64,
}

/// Mapping of one query sequence
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryMap {
    /// Query length
    pub len: u32,
    /// Sampled fingerprints
    pub n_sampled: u32,
    /// Sampled fingerprints absent from the index
    pub n_miss: u32,
    /// Hits by copy number
    pub copy: [u32; 4],
    /// Collinear blocks, in query order
    pub blocks: Vec<MapBlock>,
}

impl QueryMap {
    /// Fraction of sampled fingerprints found in the index
    pub fn hit_fraction(&self) -> f64 {
        if self.n_sampled == 0 {
            return 0.0;
        }
        (self.n_sampled - self.n_miss) as f64 / self.n_sampled as f64
    }

    /// Write the `Q` summary line and one `M` line per block
    pub fn write(&self, name: &str, refmap: &RefMap, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "Q\t{}\t{}\t{} miss, {} copy1, {} copy2, {} multi, {:.2} hit",
            name,
            self.len,
            self.n_miss,
            self.copy[1],
            self.copy[2],
            self.copy[3],
            self.hit_fraction()
        )?;
        for b in &self.blocks {
            writeln!(
                out,
                "M\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{} {}\t{:.2}\t{:.2}",
                name,
                b.query_start,
                b.query_end,
                self.len,
                refmap.names()[b.seq as usize],
                b.ref_start,
                b.ref_end,
                if b.is_forward { '+' } else { '-' },
                b.n_copy1,
                b.n_copy2,
                b.density,
                b.copy1_fraction
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::reverse_complement;
    use crate::hasher::ModHasher;
    use tempfile::TempDir;

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

    fn empty_modset() -> Modset {
        Modset::new(ModHasher::new(19, 31, 17).unwrap(), 20, 0).unwrap()
    }

    fn two_chromosomes() -> (RefMap, Vec<u8>, Vec<u8>) {
        let a = random_codes(4000, 1);
        let b = random_codes(4000, 2);
        let mut builder = RefMapBuilder::new(empty_modset(), true);
        builder.add_sequence("chrA", &a).unwrap();
        builder.add_sequence("chrB", &b).unwrap();
        let (refmap, counts) = builder.finish();
        assert_eq!(counts.copy2 + counts.multi + counts.unseen, 0);
        (refmap, a, b)
    }

    #[test]
    fn test_slots_and_depths() {
        let (refmap, a, _) = two_chromosomes();
        let ms = refmap.modset();
        assert_eq!(refmap.num_slots() as u32, ms.max());
        assert_eq!(refmap.names(), &["chrA".to_string(), "chrB".to_string()]);
        assert_eq!(refmap.lengths(), &[4000, 4000]);
        let first = ms.hasher().sample(&a).next().unwrap();
        let id = ms.find(first.kmer);
        assert_eq!(refmap.depth(id), 1);
        assert!(ms.is_copy1(id));
        let slots = refmap.slots(id);
        assert_eq!(slots.len(), 1);
        assert_eq!(refmap.location(slots[0]), (0, first.position as u32));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut builder = RefMapBuilder::new(empty_modset(), true);
        builder.add_sequence("chrA", &random_codes(500, 1)).unwrap();
        let err = builder.add_sequence("chrA", &random_codes(500, 2)).unwrap_err();
        assert!(matches!(err, ModError::DuplicateSequence(name) if name == "chrA"));
    }

    #[test]
    fn test_forward_block() {
        let (refmap, a, _) = two_chromosomes();
        let q = refmap.map_query(&a[1000..3000], &MappingConfig::default());
        assert_eq!(q.n_miss, 0);
        assert_eq!(q.blocks.len(), 1);
        let b = &q.blocks[0];
        assert_eq!(b.seq, 0);
        assert!(b.is_forward);
        assert_eq!(b.n_copy1, q.copy[1]);
        assert!(b.ref_start >= 1000 && b.ref_end < 3000);
        assert_eq!(b.ref_start - 1000, b.query_start);
        assert!((b.copy1_fraction - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reverse_block() {
        let (refmap, a, _) = two_chromosomes();
        let q = refmap.map_query(&reverse_complement(&a[1000..3000]), &MappingConfig::default());
        assert_eq!(q.blocks.len(), 1);
        let b = &q.blocks[0];
        assert!(!b.is_forward);
        assert!(b.ref_start > b.ref_end);
        assert_eq!(b.n_copy1, q.copy[1]);
    }

    #[test]
    fn test_block_thresholds() {
        let (refmap, a, _) = two_chromosomes();
        // 1000 bases missing from the middle of the query
        let mut query = a[0..1000].to_vec();
        query.extend_from_slice(&a[2000..3000]);

        let q = refmap.map_query(&query, &MappingConfig::default());
        assert_eq!(q.blocks.len(), 1);
        let strict = MappingConfig {
            max_block_drift: 10,
            ..MappingConfig::default()
        };
        assert_eq!(refmap.map_query(&query, &strict).blocks.len(), 2);

        let demanding = MappingConfig {
            min_block_copy1: q.copy[1],
            ..MappingConfig::default()
        };
        assert!(refmap.map_query(&query, &demanding).blocks.is_empty());
    }

    #[test]
    fn test_chimeric_query_splits() {
        let (refmap, a, b) = two_chromosomes();
        let mut query = a[0..1500].to_vec();
        query.extend_from_slice(&b[2000..3500]);
        let q = refmap.map_query(&query, &MappingConfig::default());
        assert_eq!(q.blocks.len(), 2);
        assert_eq!(q.blocks[0].seq, 0);
        assert_eq!(q.blocks[1].seq, 1);
        assert!(q.blocks[0].query_end < q.blocks[1].query_start);

        let mut out = Vec::new();
        q.write("chimera", &refmap, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Q\tchimera\t3000\t"));
        assert_eq!(text.lines().filter(|l| l.starts_with("M\tchimera")).count(), 2);
        assert!(text.contains("\tchrB\t"));
    }

    #[test]
    fn test_duplicated_region_is_copy2() {
        let a = random_codes(3000, 1);
        let mut builder = RefMapBuilder::new(empty_modset(), true);
        builder.add_sequence("chrA", &a).unwrap();
        builder.add_sequence("dup", &a[0..1000]).unwrap();
        let (refmap, counts) = builder.finish();
        assert!(counts.copy2 > 0);

        let q = refmap.map_query(&a[100..900], &MappingConfig::default());
        assert_eq!(q.copy[1], 0);
        assert!(q.copy[2] > 0);
        // copy-2 hits alone never make a reportable block
        assert!(q.blocks.is_empty());
    }

    #[test]
    fn test_unseen_copy_left_alone() {
        let mut ms = empty_modset();
        let other = random_codes(2000, 9);
        ms.add_sequence(&other).unwrap();
        let first = ms.hasher().sample(&other).next().unwrap();
        let other_id = ms.find(first.kmer);
        ms.set_copy(other_id, COPY_M);

        let mut builder = RefMapBuilder::new(ms, true);
        builder.add_sequence("chrA", &random_codes(2000, 1)).unwrap();
        let (refmap, counts) = builder.finish();
        assert!(counts.unseen > 0);
        assert_eq!(refmap.modset().copy(other_id), COPY_M);
        assert_eq!(refmap.depth(other_id), 0);
        assert!(refmap.slots(other_id).is_empty());
    }

    #[test]
    fn test_no_insert_skips_unknown() {
        let a = random_codes(2000, 1);
        let mut builder = RefMapBuilder::new(empty_modset(), false);
        assert_eq!(builder.add_sequence("chrA", &a).unwrap(), 0);
        let (refmap, counts) = builder.finish();
        assert_eq!(refmap.num_slots(), 0);
        assert_eq!(counts, RefCopyCounts::default());
        let q = refmap.map_query(&a, &MappingConfig::default());
        assert_eq!(q.n_miss, q.n_sampled);
    }

    #[test]
    fn test_save_load() {
        let (refmap, a, _) = two_chromosomes();
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("genome");
        refmap.save(&root).unwrap();
        assert!(dir.path().join("genome.mod").exists());
        assert!(dir.path().join("genome.ref").exists());

        let loaded = RefMap::load(&root).unwrap();
        assert_eq!(loaded.names(), refmap.names());
        assert_eq!(loaded.num_slots(), refmap.num_slots());
        let query = &a[500..2500];
        let config = MappingConfig::default();
        assert_eq!(loaded.map_query(query, &config), refmap.map_query(query, &config));
    }

    #[test]
    fn test_load_rejects_bad_slot() {
        let (refmap, _, _) = two_chromosomes();
        let mut buffer = Vec::new();
        refmap.write_to(&mut buffer).unwrap();
        let small = empty_modset();
        let err = RefMap::read_from(small, &mut buffer.as_slice()).unwrap_err();
        assert!(matches!(err, SerializationError::Corrupt(_)));
    }
}
