//! Overlap engine
//!
//! For a query read `x`, candidate partners are the reads that share its
//! single-copy fingerprints, found through the inverse index. Each candidate
//! with enough shared hits is then checked for a consistent relative strand,
//! for collinear hit order and for containment of `x`.
//!
//! Queries only read the read set. Flags the query earns are returned in the
//! [`OverlapReport`] and applied by the caller, so whole-set passes can run
//! the queries in parallel with one [`OverlapScratch`] per thread.

use std::io::{self, Write};

use ahash::AHashMap;
use rayon::prelude::*;

use crate::config::OverlapConfig;
use crate::constants::{TOPBIT, TOPMASK};
use crate::error::ModResult;
use crate::readset::{BadFlags, Readset};

/// One qualifying overlap of the query read
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlap {
    /// Partner read
    pub target: u32,
    /// Shared single-copy hits
    pub n_hit: u32,
    /// Partner on the same strand as the query
    pub is_plus: bool,
    /// Query starts strictly inside the partner and ends within it
    pub is_contained: bool,
    /// Order violations or strand flips were seen
    pub is_bad: bool,
    /// Matched hits out of collinear order
    pub order_violations: u32,
    /// Matched hits voting for the losing strand
    pub strand_flips: u32,
}

/// Result of one overlap query
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OverlapReport {
    /// Query read
    pub read: u32,
    /// Qualifying overlaps, most shared hits first
    pub overlaps: Vec<Overlap>,
    /// Flags to set on the query read
    pub flags: BadFlags,
    /// Repeated single-copy hits skipped in the query
    pub n_repeat: u32,
    /// Overlaps without violations
    pub n_good: u32,
    /// Overlaps with violations
    pub n_bad: u32,
    /// Candidates discarded for a strand tie
    pub n_ambiguous: u32,
}

/// Per-thread working memory for [`find_overlaps`]
///
/// Entries touched by a query are cleared before it returns, so a scratch
/// can serve any number of queries over the same read set.
#[derive(Debug, Default)]
pub struct OverlapScratch {
    /// Fingerprint ID → 1-based index in the query's hit list
    hit_index: Vec<u32>,
    touched: Vec<u32>,
    /// Candidate read → shared hit count
    counts: AHashMap<u32, u32>,
    /// `positions[j + 1]` is the position of query hit `j`
    positions: Vec<u32>,
}

impl OverlapScratch {
    /// Scratch sized for `readset`
    pub fn new(readset: &Readset) -> Self {
        Self {
            hit_index: vec![0; readset.modset().max() as usize + 1],
            ..Self::default()
        }
    }

    fn prepare(&mut self, max: u32) {
        if self.hit_index.len() < max as usize + 1 {
            self.hit_index.resize(max as usize + 1, 0);
        }
    }

    fn reset(&mut self) {
        for &id in &self.touched {
            self.hit_index[id as usize] = 0;
        }
        self.touched.clear();
        self.counts.clear();
    }
}

/// Find the overlaps of read `ix`
pub fn find_overlaps(
    readset: &Readset,
    ix: u32,
    scratch: &mut OverlapScratch,
    config: &OverlapConfig,
) -> ModResult<OverlapReport> {
    readset.check_read(ix)?;
    let ms = readset.modset();
    let k = ms.hasher().k() as i64;
    let x = readset.read(ix);
    let hx = readset.hits(ix);

    scratch.prepare(ms.max());
    scratch.positions.clear();
    scratch.positions.push(0);
    let mut pos = 0u32;
    for &d in readset.dx(ix) {
        pos += d;
        scratch.positions.push(pos);
    }

    let mut report = OverlapReport {
        read: ix,
        ..OverlapReport::default()
    };

    for (j, &h) in hx.iter().enumerate() {
        let id = h & TOPMASK;
        if !ms.is_copy1(id) {
            continue;
        }
        if scratch.hit_index[id as usize] != 0 {
            report.n_repeat += 1;
            report.flags |= BadFlags::REPEAT;
            continue;
        }
        scratch.hit_index[id as usize] = j as u32 + 1;
        scratch.touched.push(id);
        for &iy in readset.inverse().reads_containing(id) {
            *scratch.counts.entry(iy).or_insert(0) += 1;
        }
    }

    let mut candidates: Vec<(u32, u32)> = scratch.counts.iter().map(|(&r, &n)| (r, n)).collect();
    candidates.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    for (iy, n_hit) in candidates {
        if n_hit < config.min_shared_hits {
            break;
        }
        if iy == ix || readset.read(iy).is_bad() {
            continue;
        }
        let y = readset.read(iy);
        let hy = readset.hits(iy);

        let (mut n_plus, mut n_minus) = (0u32, 0u32);
        for &h in hy {
            let ihx = scratch.hit_index[(h & TOPMASK) as usize];
            if ihx == 0 {
                continue;
            }
            if h & TOPBIT == hx[ihx as usize - 1] & TOPBIT {
                n_plus += 1;
            } else {
                n_minus += 1;
            }
        }
        if n_plus == n_minus {
            report.n_ambiguous += 1;
            continue;
        }
        let is_plus = n_plus > n_minus;

        let mut order_violations = 0u32;
        let mut is_contained = false;
        let mut first = true;
        let mut last = if is_plus { 0 } else { x.n_hit + 1 };
        let mut last_diff = 0i64;
        let mut y_pos = 0i64;
        for (&h, &d) in hy.iter().zip(readset.dx(iy)) {
            y_pos += d as i64;
            let ihx = scratch.hit_index[(h & TOPMASK) as usize];
            if ihx == 0 {
                continue;
            }
            let x_pos = scratch.positions[ihx as usize] as i64;
            let diff = if is_plus {
                x_pos - y_pos
            } else {
                x.len as i64 - k - x_pos - y_pos
            };
            if first && diff < 0 {
                is_contained = true;
            }
            first = false;
            if (is_plus && ihx < last) || (!is_plus && ihx > last) {
                order_violations += 1;
            }
            last = ihx;
            last_diff = diff;
        }
        if is_contained && x.len as i64 - last_diff > y.len as i64 {
            is_contained = false;
        }

        let strand_flips = n_plus.min(n_minus);
        let is_bad = order_violations > 0 || strand_flips > 0;
        if is_bad {
            report.n_bad += 1;
        } else {
            report.n_good += 1;
        }
        report.overlaps.push(Overlap {
            target: iy,
            n_hit,
            is_plus,
            is_contained,
            is_bad,
            order_violations,
            strand_flips,
        });
    }

    if report.overlaps.is_empty() {
        report.flags |= BadFlags::NO_MATCH;
        if x.n_hit < config.low_hit_threshold {
            report.flags |= BadFlags::LOW_HIT;
        } else if x.n_copy[1] < config.low_copy1_threshold {
            report.flags |= BadFlags::LOW_COPY1;
        }
    }

    scratch.reset();
    Ok(report)
}

/// Overlap reports for every read, computed in parallel on the current rayon
/// pool; entry `i` belongs to read `i + 1`
pub fn find_all_overlaps(readset: &Readset, config: &OverlapConfig) -> ModResult<Vec<OverlapReport>> {
    readset
        .read_ids()
        .into_par_iter()
        .map_init(
            || OverlapScratch::new(readset),
            |scratch, ix| find_overlaps(readset, ix, scratch, config),
        )
        .collect()
}

impl OverlapReport {
    /// Write the report
    ///
    /// Level 0 writes nothing, level 1 the `RR` line of the query, level 2
    /// also one `RH` line per overlap.
    pub fn write(&self, readset: &Readset, level: u8, out: &mut dyn Write) -> io::Result<()> {
        if level == 0 {
            return Ok(());
        }
        if level > 1 {
            for o in &self.overlaps {
                writeln!(
                    out,
                    "RH\t{}\tlen {}\t{}\t{}\tnHit {}\tnOrder {}\tnFlip {}\t{}",
                    o.target,
                    readset.read(o.target).len,
                    if o.is_bad { "BAD" } else { "GOOD" },
                    if o.is_plus { "plus" } else { "minus" },
                    o.n_hit,
                    o.order_violations,
                    o.strand_flips,
                    if o.is_contained { "CONTAINED" } else { "OVERLAP" }
                )?;
            }
        }
        let x = readset.read(self.read);
        writeln!(
            out,
            "RR {:6}\tlen {}\tnHit {:3}\tnMiss {:3}\tnCpy {} {} {} {}\tnRepeatMod {}\tnGood {:4}\tnBad {:4}\tnAmbig {}",
            self.read,
            x.len,
            x.n_hit,
            x.n_miss,
            x.n_copy[0],
            x.n_copy[1],
            x.n_copy[2],
            x.n_copy[3],
            self.n_repeat,
            self.n_good,
            self.n_bad,
            self.n_ambiguous
        )
    }
}

/// A single-copy fingerprint shared by two reads
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedHit {
    /// Fingerprint ID
    pub id: u32,
    /// Its depth
    pub depth: u16,
    /// Position in the first read
    pub x_pos: u32,
    /// Forward in the first read
    pub x_forward: bool,
    /// Position in the second read
    pub y_pos: u32,
    /// Forward in the second read
    pub y_forward: bool,
}

impl SharedHit {
    /// Same strand in both reads
    pub fn is_plus(&self) -> bool {
        self.x_forward == self.y_forward
    }
}

/// Every shared single-copy fingerprint of reads `ix` and `iy`, in the order
/// of `ix`'s hits
pub fn overlap_pair_details(readset: &Readset, ix: u32, iy: u32) -> ModResult<Vec<SharedHit>> {
    readset.check_read(ix)?;
    readset.check_read(iy)?;
    let ms = readset.modset();
    let y_pos = readset.positions(iy);
    let hy = readset.hits(iy);

    let mut shared = Vec::new();
    for (&hx, x_pos) in readset.hits(ix).iter().zip(readset.positions(ix)) {
        let id = hx & TOPMASK;
        if !ms.is_copy1(id) {
            continue;
        }
        for (&h, &yp) in hy.iter().zip(&y_pos) {
            if h & TOPMASK == id {
                shared.push(SharedHit {
                    id,
                    depth: ms.depth(id),
                    x_pos,
                    x_forward: hx & TOPBIT != 0,
                    y_pos: yp,
                    y_forward: h & TOPBIT != 0,
                });
            }
        }
    }
    Ok(shared)
}

/// Write both reads' summaries and one `RO` line per shared fingerprint
pub fn write_pair_details(readset: &Readset, ix: u32, iy: u32, out: &mut dyn Write) -> ModResult<()> {
    let shared = overlap_pair_details(readset, ix, iy)?;
    for r in [ix, iy] {
        let read = readset.read(r);
        writeln!(
            out,
            "RR overlaps_for {}\tlen {}\tnHit {}\tnMiss {}\tnCopy {} {} {} {}",
            r,
            read.len,
            read.n_hit,
            read.n_miss,
            read.n_copy[0],
            read.n_copy[1],
            read.n_copy[2],
            read.n_copy[3]
        )?;
    }
    let ms = readset.modset();
    let strand = |fwd: bool| if fwd { 'F' } else { 'R' };
    for s in &shared {
        writeln!(
            out,
            "RO\t{:8x} {} {:5} {}\t{} {} {}\t{} {} {}",
            s.id,
            ms.kmer_string(s.id),
            s.depth,
            if s.is_plus() { '+' } else { '-' },
            ix,
            s.x_pos,
            strand(s.x_forward),
            iy,
            s.y_pos,
            strand(s.y_forward)
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CopyThresholds;
    use crate::hasher::ModHasher;
    use crate::modset::{Modset, COPY_1};

    /// Read set over IDs `1..=n`, all copy 1, built from explicit hit lists
    fn readset(n: u64, reads: &[(u32, &[u32], &[u32])]) -> Readset {
        let mut ms = Modset::new(ModHasher::new(19, 31, 17).unwrap(), 20, 0).unwrap();
        for k in 1..=n {
            ms.find_or_insert(k, true).unwrap();
        }
        let mut rs = Readset::new(ms).unwrap();
        for &(len, hits, dx) in reads {
            rs.push_hits(len, hits, dx, 0);
        }
        for id in 1..=n as u32 {
            rs.modset_mut().set_copy(id, COPY_1);
        }
        rs.rebuild_inverse();
        rs
    }

    const F: u32 = TOPBIT;

    #[test]
    fn test_plus_overlap() {
        // read 2 starts 100 bases into read 1
        let rs = readset(
            6,
            &[
                (400, &[1 | F, 2 | F, 3 | F, 4 | F], &[10, 100, 100, 100]),
                (400, &[2 | F, 3 | F, 4 | F, 5 | F, 6], &[10, 100, 100, 100, 100]),
            ],
        );
        let mut scratch = OverlapScratch::new(&rs);
        let report = find_overlaps(&rs, 1, &mut scratch, &OverlapConfig::default()).unwrap();
        assert_eq!(report.overlaps.len(), 1);
        let o = &report.overlaps[0];
        assert_eq!(o.target, 2);
        assert_eq!(o.n_hit, 3);
        assert!(o.is_plus);
        assert!(!o.is_bad);
        assert!(!o.is_contained);
        assert_eq!(report.flags, BadFlags::empty());

        let back = find_overlaps(&rs, 2, &mut scratch, &OverlapConfig::default()).unwrap();
        assert_eq!(back.overlaps[0].target, 1);
        assert_eq!(back.overlaps[0].n_hit, 3);
        assert!(back.overlaps[0].is_plus);
    }

    #[test]
    fn test_minus_overlap_and_order() {
        let rs = readset(
            5,
            &[
                (400, &[1 | F, 2 | F, 3 | F, 4 | F], &[10, 100, 100, 100]),
                // reverse strand, reverse order
                (400, &[4, 3, 2, 5], &[50, 100, 100, 100]),
                // reverse strand, shuffled
                (400, &[2, 4, 3, 1], &[50, 100, 100, 100]),
            ],
        );
        let mut scratch = OverlapScratch::new(&rs);
        let report = find_overlaps(&rs, 1, &mut scratch, &OverlapConfig::default()).unwrap();
        assert_eq!(report.overlaps.len(), 2);
        let good = report.overlaps.iter().find(|o| o.target == 2).unwrap();
        assert!(!good.is_plus);
        assert_eq!(good.order_violations, 0);
        assert!(!good.is_bad);

        let bad = report.overlaps.iter().find(|o| o.target == 3).unwrap();
        assert!(!bad.is_plus);
        assert!(bad.order_violations > 0);
        assert!(bad.is_bad);
        assert_eq!((report.n_good, report.n_bad), (1, 1));
        // most shared hits first
        assert_eq!(report.overlaps[0].target, 3);
    }

    #[test]
    fn test_strand_flip_and_tie() {
        let rs = readset(
            6,
            &[
                (500, &[1 | F, 2 | F, 3 | F, 4 | F], &[0, 100, 100, 100]),
                (500, &[1 | F, 2 | F, 3, 4 | F], &[0, 100, 100, 100]),
                (500, &[1 | F, 2 | F, 3, 4, 5], &[0, 100, 100, 100, 100]),
            ],
        );
        let mut scratch = OverlapScratch::new(&rs);
        let report = find_overlaps(&rs, 1, &mut scratch, &OverlapConfig::default()).unwrap();
        assert_eq!(report.overlaps.len(), 1);
        let o = &report.overlaps[0];
        assert_eq!(o.target, 2);
        assert_eq!(o.strand_flips, 1);
        assert!(o.is_bad);
        assert_eq!(report.n_ambiguous, 1);
    }

    #[test]
    fn test_containment() {
        // read 2 (length 200) lies 100 bases into read 1 (length 500)
        let rs = readset(
            5,
            &[
                (500, &[1 | F, 2 | F, 3 | F, 4 | F, 5 | F], &[20, 100, 100, 100, 100]),
                (200, &[2 | F, 3 | F, 4 | F], &[20, 50, 50]),
            ],
        );
        let mut scratch = OverlapScratch::new(&rs);
        let config = OverlapConfig::default();
        let r2 = find_overlaps(&rs, 2, &mut scratch, &config).unwrap();
        assert!(r2.overlaps[0].is_contained);
        let r1 = find_overlaps(&rs, 1, &mut scratch, &config).unwrap();
        assert!(!r1.overlaps[0].is_contained);
    }

    #[test]
    fn test_minus_containment() {
        // read 2 is the reverse complement of bases 100..400 of read 1
        let mut rs = readset(
            5,
            &[
                (500, &[1 | F, 2 | F, 3 | F, 4 | F, 5 | F], &[20, 100, 100, 100, 100]),
                (300, &[4, 3, 2], &[61, 100, 100]),
            ],
        );
        let mut scratch = OverlapScratch::new(&rs);
        let config = OverlapConfig::default();
        let r2 = find_overlaps(&rs, 2, &mut scratch, &config).unwrap();
        let o = &r2.overlaps[0];
        assert_eq!(o.target, 1);
        assert!(!o.is_plus);
        assert!(o.is_contained);
        assert!(!o.is_bad);

        let r1 = find_overlaps(&rs, 1, &mut scratch, &config).unwrap();
        assert!(!r1.overlaps[0].is_plus);
        assert!(!r1.overlaps[0].is_contained);
        assert_eq!(r1.overlaps[0].n_hit, o.n_hit);

        crate::classify::mark_contained(&mut rs, &config).unwrap();
        assert_eq!(rs.read(2).contained, 1);
        assert_eq!(rs.read(1).contained, 0);
    }

    #[test]
    fn test_repeat_and_no_match_flags() {
        let rs = readset(
            4,
            &[
                (300, &[1 | F, 2 | F, 1 | F], &[0, 100, 100]),
                (300, &[3 | F, 4 | F], &[0, 100]),
            ],
        );
        let mut scratch = OverlapScratch::new(&rs);
        let report = find_overlaps(&rs, 1, &mut scratch, &OverlapConfig::default()).unwrap();
        assert_eq!(report.n_repeat, 1);
        assert!(report.flags.contains(BadFlags::REPEAT | BadFlags::NO_MATCH | BadFlags::LOW_HIT));
        assert!(!report.flags.contains(BadFlags::LOW_COPY1));

        let config = OverlapConfig {
            low_hit_threshold: 2,
            ..OverlapConfig::default()
        };
        let report = find_overlaps(&rs, 2, &mut scratch, &config).unwrap();
        assert!(report.flags.contains(BadFlags::NO_MATCH | BadFlags::LOW_COPY1));
        assert!(!report.flags.contains(BadFlags::LOW_HIT));
    }

    #[test]
    fn test_skips_bad_partners_and_unknown_read() {
        let mut rs = readset(
            3,
            &[
                (300, &[1 | F, 2 | F, 3 | F], &[0, 100, 100]),
                (300, &[1 | F, 2 | F, 3 | F], &[0, 100, 100]),
            ],
        );
        rs.read_mut(2).bad = BadFlags::ORDER1;
        let mut scratch = OverlapScratch::new(&rs);
        let report = find_overlaps(&rs, 1, &mut scratch, &OverlapConfig::default()).unwrap();
        assert!(report.overlaps.is_empty());
        assert!(find_overlaps(&rs, 3, &mut scratch, &OverlapConfig::default()).is_err());
    }

    #[test]
    fn test_parallel_matches_serial() {
        let rs = readset(
            6,
            &[
                (400, &[1 | F, 2 | F, 3 | F, 4 | F], &[10, 100, 100, 100]),
                (400, &[2 | F, 3 | F, 4 | F, 5 | F, 6], &[10, 100, 100, 100, 100]),
                (400, &[6 | F, 5, 4, 3], &[10, 100, 100, 100]),
            ],
        );
        let config = OverlapConfig::default();
        let all = find_all_overlaps(&rs, &config).unwrap();
        let mut scratch = OverlapScratch::new(&rs);
        for ix in rs.read_ids() {
            let single = find_overlaps(&rs, ix, &mut scratch, &config).unwrap();
            assert_eq!(all[ix as usize - 1], single);
        }
    }

    #[test]
    fn test_pair_details_and_report() {
        let mut rs = readset(
            4,
            &[
                (400, &[1 | F, 2 | F, 3 | F], &[10, 100, 100]),
                (400, &[2, 3 | F, 4], &[5, 100, 100]),
            ],
        );
        rs.modset_mut().set_copy_by_depth(&CopyThresholds::new(1, 3, 10).unwrap());
        rs.rebuild_inverse();

        let shared = overlap_pair_details(&rs, 1, 2).unwrap();
        assert_eq!(shared.len(), 2);
        assert_eq!((shared[0].id, shared[0].x_pos, shared[0].y_pos), (2, 110, 5));
        assert!(!shared[0].is_plus());
        assert!(shared[1].is_plus());

        let mut out = Vec::new();
        write_pair_details(&rs, 1, 2, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("RO")).count(), 2);
        // fingerprint 2 was inserted as k-mer value 2
        let kmer = format!("{}g", "a".repeat(18));
        assert!(text.lines().any(|l| l.starts_with("RO") && l.contains(&kmer)));

        let mut scratch = OverlapScratch::new(&rs);
        let report = find_overlaps(&rs, 1, &mut scratch, &OverlapConfig::default()).unwrap();
        let mut out = Vec::new();
        report.write(&rs, 2, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("RR "));
    }
}
