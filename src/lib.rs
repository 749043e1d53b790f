use thiserror::Error;

/// Binary keypoint descriptors and the Hamming metric / majority centroid
/// primitives every other module is built on.
pub mod desc;
pub use desc::{DenseMatrix, Descriptor};

/// Implementation of a hierarchical visual bag-of-words vocabulary.
pub mod vocab;
pub use vocab::{Seeding, Vocabulary, VocabularyParams, WeightingType};

/// Sparse bag-of-words vectors, direct index, and scoring functions.
pub mod bow;
pub use bow::{BowVector, FeatureVector, Norm, ScoringType};

/// Reading and writing vocabularies in the DBoW2 / ORB-SLAM text layout.
mod dbow2;

/// Pluggable semantic-consistency adjustments for database scores.
pub mod semantic;
pub use semantic::{
    AdditiveBoost, Agreement, ConflictFilter, MultiplicativePenalty, NoSemantics, SemanticContext,
    SemanticPolicy, WordClasses,
};

/// Image database with an inverted file over vocabulary words.
pub mod database;
pub use database::{Database, DatabaseParams, Entry, Feature, Posting, QueryResult, SharedDatabase};

/// Id of a leaf (word) of the vocabulary tree. Dense, assigned depth-first.
pub type WordId = u32;

/// Id of any node in the vocabulary tree. The root is always 0.
pub type NodeId = u32;

/// Id of an image added to a [`Database`]. Sequential from 0.
pub type ImageId = u32;

/// Semantic class attached to a single feature by an external labeller.
pub type ClassId = u32;

/// Weight of a word in a bag-of-words vector, and similarity scores.
pub type WordValue = f64;

pub type BowResult<T> = std::result::Result<T, BowErr>;

#[derive(Error, Debug)]
pub enum BowErr {
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "bincode")]
    #[error("Vocabulary Serialization Error")]
    Bincode(#[from] bincode::Error),
    #[error("Descriptor length mismatch: expected {expected} bytes, found {found}")]
    DescriptorLength { expected: usize, found: usize },
    #[error("Descriptor decode error: {0}")]
    Decode(String),
    #[error("Vocabulary parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },
    #[error("Invalid vocabulary parameters: {0}")]
    InvalidParams(String),
    #[error("Vocabulary has no words")]
    EmptyVocabulary,
    #[error("Vocabulary construction cancelled")]
    Cancelled,
}
