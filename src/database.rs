use parking_lot::{RwLock, RwLockReadGuard};
use std::{collections::BTreeSet, fmt, sync::Arc};
use tracing::trace;

use crate::vocab::Paths;
use crate::*;

/// One keypoint of an image as handed over by the feature extraction and labeling stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub descriptor: Descriptor,
    /// Index of the keypoint in the caller's own feature list, reported by the direct index.
    pub index: usize,
    /// Semantic class, `None` when unlabeled.
    pub class: Option<ClassId>,
}

#[derive(Debug, Clone)]
pub struct DatabaseParams {
    /// Store a [`FeatureVector`] for every added image.
    pub use_direct_index: bool,
    /// Levels up from the words at which the direct index groups features.
    pub direct_index_levels: usize,
    pub semantic: Arc<dyn SemanticPolicy>,
}

/// One entry of the inverted file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posting {
    pub image_id: ImageId,
    pub weight: WordValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub image_id: ImageId,
    pub score: WordValue,
}

/// Everything the database keeps about one added image.
#[derive(Debug, Clone)]
pub struct Entry {
    image_id: ImageId,
    bow: BowVector,
    features: Option<FeatureVector>,
    classes: WordClasses,
}

/// Append-only image database over a shared, immutable [`Vocabulary`].
///
/// Queries only score images that share at least one word with the query, found through
/// the inverted file. `add` needs `&mut self` and `query` only `&self`; wrap the database in
/// a [`SharedDatabase`] to add and query from several threads.
pub struct Database {
    voc: Arc<Vocabulary>,
    params: DatabaseParams,
    entries: Vec<Entry>,
    inverted: Vec<Vec<Posting>>,
}

/// A [`Database`] behind a reader/writer lock. Adds are serialized and become visible to
/// queries all at once.
#[derive(Clone)]
pub struct SharedDatabase(Arc<RwLock<Database>>);

impl Feature {
    pub fn new(index: usize, descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            index,
            class: None,
        }
    }

    pub fn with_class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }

    /// Unlabeled features indexed by position.
    pub fn from_descriptors<I>(descriptors: I) -> Vec<Feature>
    where
        I: IntoIterator<Item = Descriptor>,
    {
        descriptors
            .into_iter()
            .enumerate()
            .map(|(i, d)| Feature::new(i, d))
            .collect()
    }
}

impl Default for DatabaseParams {
    fn default() -> Self {
        Self {
            use_direct_index: false,
            direct_index_levels: 0,
            semantic: Arc::new(NoSemantics),
        }
    }
}

impl DatabaseParams {
    pub fn with_direct_index(levels: usize) -> Self {
        Self {
            use_direct_index: true,
            direct_index_levels: levels,
            ..Default::default()
        }
    }

    pub fn semantic<P: SemanticPolicy + 'static>(mut self, policy: P) -> Self {
        self.semantic = Arc::new(policy);
        self
    }
}

impl Entry {
    pub fn image_id(&self) -> ImageId {
        self.image_id
    }

    pub fn bow(&self) -> &BowVector {
        &self.bow
    }

    /// Direct index, if the database was created with one.
    pub fn feature_vector(&self) -> Option<&FeatureVector> {
        self.features.as_ref()
    }

    pub fn word_classes(&self) -> &WordClasses {
        &self.classes
    }
}

/// Database API
impl Database {
    pub fn new(voc: Arc<Vocabulary>, params: DatabaseParams) -> Self {
        let inverted = vec![Vec::new(); voc.num_words()];
        Self {
            voc,
            params,
            entries: Vec::new(),
            inverted,
        }
    }

    /// Add an image and return its id. Ids are handed out sequentially from 0.
    pub fn add(&mut self, features: &[Feature]) -> BowResult<ImageId> {
        let levels = if self.params.use_direct_index {
            Some(self.params.direct_index_levels)
        } else {
            None
        };
        let (bow, paths) = self.transform(features, levels)?;
        let classes = word_classes(features, &paths);
        let image_id = self.entries.len() as ImageId;

        for (word, weight) in bow.iter() {
            self.inverted[word as usize].push(Posting { image_id, weight });
        }

        let direct = levels.map(|_| {
            let mut fv = FeatureVector::new();
            for (f, &(_, node)) in features.iter().zip(&paths) {
                fv.add_feature(node, f.index);
            }
            fv
        });

        trace!(image_id, words = bow.len(), features = features.len(), "Added image");
        self.entries.push(Entry {
            image_id,
            bow,
            features: direct,
            classes,
        });
        Ok(image_id)
    }

    /// Images most similar to the query, best first (ties by ascending image id).
    /// `max_results == 0` returns every candidate.
    pub fn query(&self, features: &[Feature], max_results: usize) -> BowResult<Vec<QueryResult>> {
        let (bow, paths) = self.transform(features, None)?;
        if bow.is_empty() {
            return Ok(Vec::new());
        }

        // Candidates: every image sharing a word with the query
        let mut candidates: BTreeSet<ImageId> = BTreeSet::new();
        for word in bow.words() {
            candidates.extend(self.inverted[word as usize].iter().map(|p| p.image_id));
        }

        let scoring = self.voc.scoring();
        let semantic = self.params.semantic.as_ref();
        let query_classes = if semantic.is_noop() {
            WordClasses::new()
        } else {
            word_classes(features, &paths)
        };

        let mut results: Vec<QueryResult> = candidates
            .into_iter()
            .map(|image_id| {
                let entry = &self.entries[image_id as usize];
                let base = scoring.score(&bow, &entry.bow);
                let score = if semantic.is_noop() {
                    base
                } else {
                    semantic.adjust(
                        base,
                        &SemanticContext {
                            query: &bow,
                            candidate: &entry.bow,
                            scoring,
                            query_classes: &query_classes,
                            candidate_classes: &entry.classes,
                        },
                    )
                };
                QueryResult { image_id, score }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.image_id.cmp(&b.image_id))
        });
        trace!(words = bow.len(), candidates = results.len(), "Queried database");
        if max_results > 0 {
            results.truncate(max_results);
        }
        Ok(results)
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.voc
    }

    pub fn params(&self) -> &DatabaseParams {
        &self.params
    }

    pub fn entry(&self, image_id: ImageId) -> Option<&Entry> {
        self.entries.get(image_id as usize)
    }

    pub fn bow(&self, image_id: ImageId) -> Option<&BowVector> {
        self.entry(image_id).map(Entry::bow)
    }

    pub fn feature_vector(&self, image_id: ImageId) -> Option<&FeatureVector> {
        self.entry(image_id).and_then(Entry::feature_vector)
    }

    pub fn word_classes(&self, image_id: ImageId) -> Option<&WordClasses> {
        self.entry(image_id).map(Entry::word_classes)
    }

    /// Inverted file of a word, in insertion (image id) order.
    pub fn postings(&self, word: WordId) -> &[Posting] {
        self.inverted
            .get(word as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn transform(&self, features: &[Feature], levels: Option<usize>) -> BowResult<(BowVector, Paths)> {
        if self.voc.is_empty() {
            return Err(BowErr::EmptyVocabulary);
        }
        self.voc
            .transform_generic(features.iter().map(|f| &f.descriptor), levels)
    }
}

fn word_classes(features: &[Feature], paths: &Paths) -> WordClasses {
    features
        .iter()
        .zip(paths)
        .filter_map(|(f, &(word, _))| f.class.map(|c| (word, c)))
        .collect()
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let postings: usize = self.inverted.iter().map(Vec::len).sum();
        f.debug_struct("Database")
            .field("Entries", &self.entries.len())
            .field("Postings", &postings)
            .field("Using Direct Index", &self.params.use_direct_index)
            .field("Direct Index Levels", &self.params.direct_index_levels)
            .field("Semantic Policy", &self.params.semantic)
            .field("Vocabulary", &self.voc)
            .finish()
    }
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self(Arc::new(RwLock::new(db)))
    }

    pub fn add(&self, features: &[Feature]) -> BowResult<ImageId> {
        self.0.write().add(features)
    }

    pub fn query(&self, features: &[Feature], max_results: usize) -> BowResult<Vec<QueryResult>> {
        self.0.read().query(features, max_results)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Consistent read-only view; adds wait until the guard is dropped.
    pub fn read(&self) -> RwLockReadGuard<'_, Database> {
        self.0.read()
    }
}
