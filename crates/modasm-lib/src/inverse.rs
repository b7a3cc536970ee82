//! Inverse index: fingerprint ID → reads containing it
//!
//! Only single-copy fingerprints below the depth sentinel are indexed. The
//! lists are stored CSR-style: `offsets[id]..offsets[id + 1]` is the slice of
//! `reads` for `id`. A read appears once per occurrence of the fingerprint,
//! in increasing read order.

use crate::modset::Modset;
use crate::readset::Read;
use crate::constants::TOPMASK;

/// CSR map from fingerprint ID to read IDs
#[derive(Clone, Debug, Default)]
pub struct InverseIndex {
    offsets: Vec<u64>,
    reads: Vec<u32>,
}

impl InverseIndex {
    /// Build from the hit lists of `reads`, whose hits live in `hits`
    ///
    /// Read 0 is the unused placeholder and is skipped.
    pub fn build(modset: &Modset, reads: &[Read], hits: &[u32]) -> Self {
        let max = modset.max() as usize;
        let indexed = |id: u32| modset.is_copy1(id) && !modset.is_saturated(id);

        let mut offsets = vec![0u64; max + 2];
        for read in reads.iter().skip(1) {
            for &h in read.hit_slice(hits) {
                let id = h & TOPMASK;
                if indexed(id) {
                    offsets[id as usize + 1] += 1;
                }
            }
        }
        for i in 1..offsets.len() {
            offsets[i] += offsets[i - 1];
        }

        let mut cursor = offsets.clone();
        let mut lists = vec![0u32; offsets[max + 1] as usize];
        for (ix, read) in reads.iter().enumerate().skip(1) {
            for &h in read.hit_slice(hits) {
                let id = (h & TOPMASK) as usize;
                if indexed(id as u32) {
                    lists[cursor[id] as usize] = ix as u32;
                    cursor[id] += 1;
                }
            }
        }

        Self {
            offsets,
            reads: lists,
        }
    }

    /// Reads containing fingerprint `id`; empty if the ID is not indexed
    #[inline]
    pub fn reads_containing(&self, id: u32) -> &[u32] {
        let i = id as usize;
        if i + 1 >= self.offsets.len() {
            return &[];
        }
        &self.reads[self.offsets[i] as usize..self.offsets[i + 1] as usize]
    }

    /// Total number of (fingerprint, read) entries
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Whether no fingerprint is indexed
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CopyThresholds;
    use crate::constants::TOPBIT;
    use crate::hasher::ModHasher;
    use crate::modset::{Modset, COPY_1, COPY_M};
    use crate::readset::Readset;

    #[test]
    fn test_lists_follow_hits() {
        let mut ms = Modset::new(ModHasher::new(19, 31, 17).unwrap(), 20, 0).unwrap();
        for k in 1..=4u64 {
            ms.find_or_insert(k, true).unwrap();
        }
        let mut rs = Readset::new(ms).unwrap();
        rs.push_hits(100, &[1 | TOPBIT, 2, 3], &[5, 10, 10], 0);
        rs.push_hits(100, &[2 | TOPBIT, 4, 1], &[0, 20, 20], 0);
        rs.push_hits(100, &[3, 3], &[7, 30], 0);

        let ms = rs.modset_mut();
        ms.set_copy_by_depth(&CopyThresholds::new(1, 4, 10).unwrap());
        ms.set_copy(4, COPY_M);
        rs.rebuild_inverse();

        let inv = rs.inverse();
        assert_eq!(rs.modset().copy(3), COPY_1);
        assert_eq!(inv.reads_containing(1), &[1, 2]);
        assert_eq!(inv.reads_containing(2), &[1, 2]);
        assert_eq!(inv.reads_containing(3), &[1, 3, 3]);
        assert!(inv.reads_containing(4).is_empty());
        assert!(inv.reads_containing(99).is_empty());
        assert_eq!(inv.len(), 7);
    }

    #[test]
    fn test_saturated_excluded() {
        let mut ms = Modset::new(ModHasher::new(19, 31, 17).unwrap(), 20, 0).unwrap();
        ms.find_or_insert(1, true).unwrap();
        let mut rs = Readset::new(ms).unwrap();
        rs.push_hits(10, &[1], &[0], 0);
        let ms = rs.modset_mut();
        ms.set_copy(1, COPY_1);
        ms.add_depth(1, u16::MAX);
        rs.rebuild_inverse();
        assert!(rs.inverse().is_empty());
    }
}
