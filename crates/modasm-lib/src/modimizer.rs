//! Modimizer extraction
//!
//! A modimizer is a k-mer whose canonical scrambled hash is divisible by `w`.
//! Unlike a window minimizer the decision depends on the k-mer alone, so an
//! indel only disturbs the k-mers that overlap it.
//!
//! The iterator keeps two rolling encodings: the forward k-mer, shifted left
//! by one base per step, and its reverse complement, shifted right with the
//! complement of the new base entering at the top.

use crate::hasher::ModHasher;

/// One sampled k-mer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Modimizer {
    /// Canonical packed k-mer (the strand with the smaller hash)
    pub kmer: u64,
    /// Start of the k-mer in the sequence
    pub position: usize,
    /// True if the forward strand is the canonical one
    pub is_forward: bool,
}

/// Single-pass iterator over the modimizers of an encoded sequence
///
/// # Example
/// ```
/// use modasm_lib::hasher::ModHasher;
/// use modasm_lib::encoding::screen_sequence;
///
/// let hasher = ModHasher::new(5, 3, 7).unwrap();
/// let codes = screen_sequence(b"ACGTTGCAAGGCTTACGATCGATCG");
/// for m in hasher.sample(&codes) {
///     assert!(m.position + 5 <= codes.len());
/// }
/// ```
pub struct ModimizerIterator<'a> {
    hasher: &'a ModHasher,
    codes: &'a [u8],
    consumed: usize,
    forward: u64,
    reverse: u64,
}

impl<'a> ModimizerIterator<'a> {
    /// Create an iterator over `codes` (2-bit base codes)
    pub fn new(hasher: &'a ModHasher, codes: &'a [u8]) -> Self {
        Self {
            hasher,
            codes,
            consumed: 0,
            forward: 0,
            reverse: 0,
        }
    }

    #[inline]
    fn push(&mut self, code: u8) {
        let code = code & 0b11;
        self.forward = ((self.forward << 2) & self.hasher.mask()) | code as u64;
        self.reverse = (self.reverse >> 2) | self.hasher.pattern_rc(code);
        self.consumed += 1;
    }
}

impl Iterator for ModimizerIterator<'_> {
    type Item = Modimizer;

    fn next(&mut self) -> Option<Modimizer> {
        let k = self.hasher.k();
        loop {
            if self.consumed < k {
                if self.codes.len() < k {
                    self.consumed = self.codes.len().max(k);
                    return None;
                }
                for i in 0..k {
                    self.push(self.codes[i]);
                }
            } else if self.consumed >= self.codes.len() {
                return None;
            } else {
                self.push(self.codes[self.consumed]);
            }

            let (hash, is_forward) = self.hasher.canonical(self.forward, self.reverse);
            if self.hasher.is_sampled(hash) {
                return Some(Modimizer {
                    kmer: if is_forward { self.forward } else { self.reverse },
                    position: self.consumed - k,
                    is_forward,
                });
            }
        }
    }
}
