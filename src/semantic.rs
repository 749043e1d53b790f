use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use crate::{BowVector, ClassId, ScoringType, WordId, WordValue};

/// Per-word histogram of the semantic classes of the features that landed on each word.
/// Unlabeled features are never counted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WordClasses(BTreeMap<WordId, BTreeMap<ClassId, u32>>);

/// How the classes seen on one word by the query and by a candidate relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agreement {
    /// Both sides labeled, with at least one class in common.
    Consistent,
    /// Both sides labeled, no class in common.
    Conflicting,
    /// At least one side has no labeled feature on the word.
    Neutral,
}

/// Everything a [`SemanticPolicy`] may look at when adjusting the score of one candidate.
pub struct SemanticContext<'a> {
    pub query: &'a BowVector,
    pub candidate: &'a BowVector,
    /// Scoring the base score was computed with.
    pub scoring: ScoringType,
    pub query_classes: &'a WordClasses,
    pub candidate_classes: &'a WordClasses,
}

/// Combines the base similarity of a candidate with the semantic agreement between the
/// query and the candidate. Implementations must not decrease the score of a candidate
/// whose labeled words all agree with the query.
pub trait SemanticPolicy: Send + Sync + fmt::Debug {
    fn adjust(&self, base: WordValue, ctx: &SemanticContext<'_>) -> WordValue;

    /// A no-op policy lets the database skip building semantic contexts.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Ignore semantic labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSemantics;

/// Scale the score down by the share of query weight on conflicting words:
/// `base * (1 - factor * conflicting)`.
#[derive(Debug, Clone, Copy)]
pub struct MultiplicativePenalty {
    pub factor: WordValue,
}

/// Zero the contribution of conflicting words: the candidate is scored again with its
/// conflicting words removed, and the result never exceeds the base score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictFilter;

/// Reward agreement: `base + weight * consistent`.
#[derive(Debug, Clone, Copy)]
pub struct AdditiveBoost {
    pub weight: WordValue,
}

impl WordClasses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, word: WordId, class: ClassId) {
        *self.0.entry(word).or_default().entry(class).or_insert(0) += 1;
    }

    /// Class histogram of a word, if any labeled feature landed on it.
    pub fn classes(&self, word: WordId) -> Option<&BTreeMap<ClassId, u32>> {
        self.0.get(&word)
    }

    pub fn count(&self, word: WordId, class: ClassId) -> u32 {
        self.0
            .get(&word)
            .and_then(|h| h.get(&class))
            .copied()
            .unwrap_or(0)
    }

    /// Number of words with at least one labeled feature.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn agreement(&self, other: &WordClasses, word: WordId) -> Agreement {
        match (self.0.get(&word), other.0.get(&word)) {
            (Some(a), Some(b)) => {
                if a.keys().any(|c| b.contains_key(c)) {
                    Agreement::Consistent
                } else {
                    Agreement::Conflicting
                }
            }
            _ => Agreement::Neutral,
        }
    }
}

impl FromIterator<(WordId, ClassId)> for WordClasses {
    fn from_iter<I: IntoIterator<Item = (WordId, ClassId)>>(iter: I) -> Self {
        let mut wc = WordClasses::new();
        for (w, c) in iter {
            wc.add(w, c);
        }
        wc
    }
}

impl<'a> SemanticContext<'a> {
    /// Shares of the query weight, in `[0, 1]`, on consistent and on conflicting words.
    pub fn shares(&self) -> (WordValue, WordValue) {
        let (mut total, mut consistent, mut conflicting) = (0., 0., 0.);
        for (word, w) in self.query.iter() {
            total += w;
            match self.query_classes.agreement(self.candidate_classes, word) {
                Agreement::Consistent => consistent += w,
                Agreement::Conflicting => conflicting += w,
                Agreement::Neutral => {}
            }
        }
        if total > 0. {
            (consistent / total, conflicting / total)
        } else {
            (0., 0.)
        }
    }

    /// Candidate vector without the words on which query and candidate classes conflict.
    pub fn candidate_without_conflicts(&self) -> BowVector {
        self.candidate
            .iter()
            .filter(|&(word, _)| {
                self.query_classes.agreement(self.candidate_classes, word) != Agreement::Conflicting
            })
            .collect()
    }
}

impl SemanticPolicy for NoSemantics {
    fn adjust(&self, base: WordValue, _ctx: &SemanticContext<'_>) -> WordValue {
        base
    }

    fn is_noop(&self) -> bool {
        true
    }
}

impl Default for MultiplicativePenalty {
    fn default() -> Self {
        Self { factor: 0.5 }
    }
}

impl SemanticPolicy for MultiplicativePenalty {
    fn adjust(&self, base: WordValue, ctx: &SemanticContext<'_>) -> WordValue {
        let (_, conflicting) = ctx.shares();
        base * (1. - self.factor.clamp(0., 1.) * conflicting)
    }
}

impl SemanticPolicy for ConflictFilter {
    fn adjust(&self, base: WordValue, ctx: &SemanticContext<'_>) -> WordValue {
        let kept = ctx.candidate_without_conflicts();
        if kept.len() == ctx.candidate.len() {
            return base;
        }
        base.min(ctx.scoring.score(ctx.query, &kept))
    }
}

impl Default for AdditiveBoost {
    fn default() -> Self {
        Self { weight: 0.1 }
    }
}

impl SemanticPolicy for AdditiveBoost {
    fn adjust(&self, base: WordValue, ctx: &SemanticContext<'_>) -> WordValue {
        let (consistent, _) = ctx.shares();
        base + self.weight.max(0.) * consistent
    }
}
