//! DNA nucleotide encoding
//!
//! The hasher works on 2-bit base codes in natural order:
//! - A (65/97)  -> 0
//! - C (67/99)  -> 1
//! - G (71/103) -> 2
//! - T (84/116) -> 3
//!
//! With this order the complement of a code `b` is `3 - b`. Degenerate bases
//! have to be screened before hashing; [`screen_sequence`] maps them to A.

/// Encode a single DNA nucleotide to its 2-bit code
#[inline]
pub const fn encode_base(base: u8) -> Option<u8> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Decode a 2-bit code to an upper-case nucleotide
#[inline]
pub const fn decode_base(code: u8) -> u8 {
    match code & 0b11 {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        _ => b'T',
    }
}

/// Complement of an encoded base
#[inline]
pub const fn complement_code(code: u8) -> u8 {
    3 - (code & 0b11)
}

/// Encode a sequence, mapping every degenerate base (N, IUPAC codes, ...) to A
///
/// This is the screening step required before hashing: the sampler itself
/// assumes codes in `0..4`.
pub fn screen_sequence(sequence: &[u8]) -> Vec<u8> {
    sequence.iter().map(|&b| encode_base(b).unwrap_or(0)).collect()
}

/// Decode a slice of 2-bit codes back to nucleotides
pub fn decode_sequence(codes: &[u8]) -> String {
    codes.iter().map(|&c| decode_base(c) as char).collect()
}

/// Reverse complement of an encoded sequence
pub fn reverse_complement(codes: &[u8]) -> Vec<u8> {
    codes.iter().rev().map(|&c| complement_code(c)).collect()
}

/// Render a packed k-mer (most significant base first) in lower case
pub fn kmer_string(mut kmer: u64, k: usize) -> String {
    const TRANS: [u8; 4] = [b'a', b'c', b'g', b't'];
    let mut buf = vec![b'a'; k];
    for slot in buf.iter_mut().rev() {
        *slot = TRANS[(kmer & 0b11) as usize];
        kmer >>= 2;
    }
    String::from_utf8_lossy(&buf).into_owned()
}
