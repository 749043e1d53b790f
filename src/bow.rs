use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{btree_map, BTreeMap},
    fmt,
    iter::Peekable,
    str::FromStr,
};

use crate::{BowErr, NodeId, WordId, WordValue};

/// Bag-of-Words representation of an image or descriptor set.
///
/// Key: word/leaf id in the vocabulary, ascending.
///
/// Value: weight of that word in the provided features. Missing words have weight 0.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BowVector(BTreeMap<WordId, WordValue>);

/// Direct index of one image: tree node -> indices of the features that passed through it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct FeatureVector(BTreeMap<NodeId, Vec<usize>>);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Norm {
    L1,
    L2,
}

/// Similarity measure between two bow vectors. Every mode returns a similarity:
/// higher is better, `score(v, v)` is the maximum, and an empty vector scores 0.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScoringType {
    /// `1 - 0.5 * |a - b|_1` (Galvez, Eq. 2).
    #[default]
    L1,
    /// `1 - |a - b|_2 / sqrt(2)`.
    L2,
    /// `1 - 0.5 * sum((a - b)^2 / (a + b))`.
    ChiSquare,
    /// `1 / (1 + KL(a || b))`. Not symmetric.
    KL,
    /// `sum(sqrt(a * b))`.
    Bhattacharyya,
    /// `a . b` on L2 normalized vectors.
    DotProduct,
}

impl BowVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-zero words.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, word: WordId) -> Option<WordValue> {
        self.0.get(&word).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WordId, WordValue)> + '_ {
        self.0.iter().map(|(&w, &v)| (w, v))
    }

    pub fn words(&self) -> impl Iterator<Item = WordId> + '_ {
        self.0.keys().copied()
    }

    /// Add `value` to the weight of `word`.
    pub fn add_weight(&mut self, word: WordId, value: WordValue) {
        *self.0.entry(word).or_insert(0.) += value;
    }

    /// Set the weight of `word` to `value` only if the word is not present yet.
    pub fn add_if_not_exist(&mut self, word: WordId, value: WordValue) {
        self.0.entry(word).or_insert(value);
    }

    /// Scale the vector to unit norm. The empty / zero vector is left as is.
    pub fn normalize(&mut self, norm: Norm) {
        let n = match norm {
            Norm::L1 => self.0.values().map(|v| v.abs()).sum::<WordValue>(),
            Norm::L2 => self.0.values().map(|v| v * v).sum::<WordValue>().sqrt(),
        };
        if n > 0. {
            let inv = 1. / n;
            for v in self.0.values_mut() {
                *v *= inv;
            }
        }
    }

    /// Drop words whose weight is zero, so that absence and zero weight coincide.
    pub(crate) fn retain_nonzero(&mut self) {
        self.0.retain(|_, v| *v != 0.);
    }

    pub fn score(&self, other: &Self, scoring: ScoringType) -> WordValue {
        scoring.score(self, other)
    }

    /// L1 similarity (Galvez, Eq. 2).
    pub fn l1(&self, other: &Self) -> WordValue {
        ScoringType::L1.score(self, other)
    }

    pub fn l2(&self, other: &Self) -> WordValue {
        ScoringType::L2.score(self, other)
    }
}

impl FromIterator<(WordId, WordValue)> for BowVector {
    fn from_iter<I: IntoIterator<Item = (WordId, WordValue)>>(iter: I) -> Self {
        let mut v = BowVector::new();
        for (w, x) in iter {
            v.add_weight(w, x);
        }
        v
    }
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_feature(&mut self, node: NodeId, feature: usize) {
        self.0.entry(node).or_default().push(feature);
    }

    pub fn get(&self, node: NodeId) -> Option<&[usize]> {
        self.0.get(&node).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[usize])> + '_ {
        self.0.iter().map(|(&n, f)| (n, f.as_slice()))
    }

    /// Number of distinct nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ScoringType {
    /// Norm a vector must have before being scored with this mode.
    pub fn norm(&self) -> Norm {
        match self {
            ScoringType::L2 | ScoringType::DotProduct => Norm::L2,
            _ => Norm::L1,
        }
    }

    pub fn score(&self, a: &BowVector, b: &BowVector) -> WordValue {
        if a.is_empty() || b.is_empty() {
            return 0.;
        }
        match self {
            ScoringType::L1 => {
                let d: WordValue = union(a, b).map(|(_, p)| (p.left() - p.right()).abs()).sum();
                (1. - 0.5 * d).max(0.)
            }
            ScoringType::L2 => {
                let d: WordValue = union(a, b)
                    .map(|(_, p)| (p.left() - p.right()).powi(2))
                    .sum();
                (1. - (0.5 * d).sqrt()).max(0.)
            }
            ScoringType::ChiSquare => {
                let d: WordValue = union(a, b)
                    .map(|(_, p)| {
                        let (x, y) = (p.left(), p.right());
                        if x + y > 0. {
                            (x - y).powi(2) / (x + y)
                        } else {
                            0.
                        }
                    })
                    .sum();
                (1. - 0.5 * d).max(0.)
            }
            ScoringType::KL => {
                let log_eps = WordValue::EPSILON.ln();
                let kl: WordValue = union(a, b)
                    .map(|(_, p)| match p {
                        Pair::Both(x, y) if x > 0. && y > 0. => x * (x / y).ln(),
                        Pair::Left(x) if x > 0. => x * (x.ln() - log_eps),
                        _ => 0.,
                    })
                    .sum();
                1. / (1. + kl.max(0.))
            }
            ScoringType::Bhattacharyya => intersection(a, b).map(|(x, y)| (x * y).sqrt()).sum(),
            ScoringType::DotProduct => intersection(a, b).map(|(x, y)| x * y).sum(),
        }
    }

    /// Whether `score(a, b) == score(b, a)` for all vectors.
    pub fn is_symmetric(&self) -> bool {
        !matches!(self, ScoringType::KL)
    }

    fn name(&self) -> &'static str {
        match self {
            ScoringType::L1 => "l1",
            ScoringType::L2 => "l2",
            ScoringType::ChiSquare => "chi_square",
            ScoringType::KL => "kl",
            ScoringType::Bhattacharyya => "bhattacharyya",
            ScoringType::DotProduct => "dot_product",
        }
    }
}

impl fmt::Display for ScoringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScoringType {
    type Err = BowErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "l1" => ScoringType::L1,
            "l2" => ScoringType::L2,
            "chi_square" => ScoringType::ChiSquare,
            "kl" => ScoringType::KL,
            "bhattacharyya" => ScoringType::Bhattacharyya,
            "dot_product" => ScoringType::DotProduct,
            _ => return Err(BowErr::Decode(format!("unknown scoring type {:?}", s))),
        })
    }
}

/////////////////////                Helpers                 ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq)]
/// Weights of one word in a pair of vectors, for words present in at least one of them.
enum Pair {
    Both(WordValue, WordValue),
    Left(WordValue),
    Right(WordValue),
}

impl Pair {
    fn left(&self) -> WordValue {
        match *self {
            Pair::Both(x, _) | Pair::Left(x) => x,
            Pair::Right(_) => 0.,
        }
    }

    fn right(&self) -> WordValue {
        match *self {
            Pair::Both(_, y) | Pair::Right(y) => y,
            Pair::Left(_) => 0.,
        }
    }
}

/// Merge join over the non-zero words of two vectors, in ascending word order.
struct Union<'a> {
    a: Peekable<btree_map::Iter<'a, WordId, WordValue>>,
    b: Peekable<btree_map::Iter<'a, WordId, WordValue>>,
}

fn union<'a>(a: &'a BowVector, b: &'a BowVector) -> Union<'a> {
    Union {
        a: a.0.iter().peekable(),
        b: b.0.iter().peekable(),
    }
}

fn intersection<'a>(
    a: &'a BowVector,
    b: &'a BowVector,
) -> impl Iterator<Item = (WordValue, WordValue)> + 'a {
    union(a, b).filter_map(|(_, p)| match p {
        Pair::Both(x, y) => Some((x, y)),
        _ => None,
    })
}

impl<'a> Iterator for Union<'a> {
    type Item = (WordId, Pair);

    fn next(&mut self) -> Option<Self::Item> {
        let order = match (self.a.peek(), self.b.peek()) {
            (Some((wa, _)), Some((wb, _))) => wa.cmp(wb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => return None,
        };
        match order {
            Ordering::Less => self.a.next().map(|(&w, &x)| (w, Pair::Left(x))),
            Ordering::Greater => self.b.next().map(|(&w, &y)| (w, Pair::Right(y))),
            Ordering::Equal => match (self.a.next(), self.b.next()) {
                (Some((&w, &x)), Some((_, &y))) => Some((w, Pair::Both(x, y))),
                _ => None,
            },
        }
    }
}
