use bitvec::{order::Msb0, view::BitView};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::{fmt, str::FromStr};

use crate::{BowErr, BowResult};

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Default)]
/// Binary keypoint descriptor (ORB, BRIEF, ...), stored as a plain byte string.
///
/// The length is not part of the type: a [`crate::Vocabulary`] fixes it when it is
/// built, and every operation that combines descriptors rejects mismatched lengths
/// instead of truncating or padding. 32-byte descriptors (ORB) are stored inline.
pub struct Descriptor(SmallVec<[u8; 32]>);

/// Dense row-major matrix, used to hand descriptors to external numeric tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix<T> {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<T>,
}

impl Descriptor {
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(SmallVec::from_slice(bytes))
    }

    /// Number of bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hamming distance to `other`.
    ///
    /// Fails with [`BowErr::DescriptorLength`] if the two descriptors differ in length.
    pub fn distance(&self, other: &Descriptor) -> BowResult<u32> {
        check_len(self.len(), other.len())?;
        Ok(hamming(&self.0, &other.0))
    }

    /// Bitwise majority of a set of descriptors.
    ///
    /// Bit `i` of the result is set iff at least `ceil(N/2)` of the `N` inputs have it set.
    /// A single descriptor is returned unchanged, and an empty set has no centroid (`None`).
    pub fn centroid<'a, I>(descriptors: I) -> BowResult<Option<Descriptor>>
    where
        I: IntoIterator<Item = &'a Descriptor>,
    {
        let mut iter = descriptors.into_iter();
        let first = match iter.next() {
            Some(d) => d,
            None => return Ok(None),
        };
        let len = first.len();
        let mut counts = vec![0usize; len * 8];
        let mut n = 0usize;
        for d in std::iter::once(first).chain(iter) {
            check_len(len, d.len())?;
            for (i, bit) in d.0.as_slice().view_bits::<Msb0>().iter().by_vals().enumerate() {
                if bit {
                    counts[i] += 1;
                }
            }
            n += 1;
        }
        if n == 1 {
            return Ok(Some(first.clone()));
        }

        let threshold = (n + 1) / 2;
        let mut result = Descriptor(SmallVec::from_elem(0, len));
        let result_bits = result.0.as_mut_slice().view_bits_mut::<Msb0>();
        for (i, &c) in counts.iter().enumerate() {
            if c >= threshold {
                result_bits.set(i, true);
            }
        }
        Ok(Some(result))
    }

    /// Decode the text form produced by `Display`, requiring exactly `len` bytes.
    pub fn from_text(s: &str, len: usize) -> BowResult<Self> {
        let desc: Descriptor = s.parse()?;
        check_len(len, desc.len())?;
        Ok(desc)
    }
}

impl<const N: usize> From<[u8; N]> for Descriptor {
    fn from(bytes: [u8; N]) -> Self {
        Self::from_slice(&bytes)
    }
}

impl From<Vec<u8>> for Descriptor {
    fn from(bytes: Vec<u8>) -> Self {
        Self(SmallVec::from_vec(bytes))
    }
}

impl AsRef<[u8]> for Descriptor {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Space separated decimal byte values, e.g. `"0 17 255"`.
impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = self.0.iter();
        if let Some(b) = bytes.next() {
            write!(f, "{}", b)?;
        }
        for b in bytes {
            write!(f, " {}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Descriptor(")?;
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// Parses whitespace separated byte values. A single malformed token fails the whole decode.
impl FromStr for Descriptor {
    type Err = BowErr;

    fn from_str(s: &str) -> BowResult<Self> {
        s.split_whitespace()
            .map(|tok| {
                tok.parse::<u8>()
                    .map_err(|e| BowErr::Decode(format!("invalid byte {:?}: {}", tok, e)))
            })
            .collect::<BowResult<SmallVec<[u8; 32]>>>()
            .map(Descriptor)
    }
}

/// One row per descriptor and one column per bit (most significant bit of each byte first),
/// holding `1.0` for set bits and `0.0` otherwise.
pub fn to_mat32f(descriptors: &[Descriptor]) -> BowResult<DenseMatrix<f32>> {
    let cols = common_len(descriptors)? * 8;
    let mut data = Vec::with_capacity(descriptors.len() * cols);
    for d in descriptors {
        data.extend(
            d.0.as_slice()
                .view_bits::<Msb0>()
                .iter()
                .by_vals()
                .map(|bit| if bit { 1. } else { 0. }),
        );
    }
    Ok(DenseMatrix {
        rows: descriptors.len(),
        cols,
        data,
    })
}

/// One row per descriptor holding its raw bytes.
pub fn to_mat8u(descriptors: &[Descriptor]) -> BowResult<DenseMatrix<u8>> {
    let cols = common_len(descriptors)?;
    let mut data = Vec::with_capacity(descriptors.len() * cols);
    for d in descriptors {
        data.extend_from_slice(&d.0);
    }
    Ok(DenseMatrix {
        rows: descriptors.len(),
        cols,
        data,
    })
}

impl<T> DenseMatrix<T> {
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }
}

#[inline]
pub(crate) fn check_len(expected: usize, found: usize) -> BowResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(BowErr::DescriptorLength { expected, found })
    }
}

/// Length shared by every descriptor in the set, 0 for an empty set.
pub(crate) fn common_len<'a, I>(descriptors: I) -> BowResult<usize>
where
    I: IntoIterator<Item = &'a Descriptor>,
{
    let mut iter = descriptors.into_iter();
    let len = match iter.next() {
        Some(d) => d.len(),
        None => return Ok(0),
    };
    for d in iter {
        check_len(len, d.len())?;
    }
    Ok(len)
}

#[inline]
/// Hamming distance between two byte strings of equal length, a 64-bit word at a time.
pub(crate) fn hamming(x: &[u8], y: &[u8]) -> u32 {
    let mut xs = x.chunks_exact(8);
    let mut ys = y.chunks_exact(8);
    let mut d = 0;
    for (a, b) in (&mut xs).zip(&mut ys) {
        d += (word(a) ^ word(b)).count_ones();
    }
    for (a, b) in xs.remainder().iter().zip(ys.remainder()) {
        d += (a ^ b).count_ones();
    }
    d
}

#[inline]
fn word(chunk: &[u8]) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(chunk);
    u64::from_ne_bytes(w)
}
