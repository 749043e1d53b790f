use rand::{distributions::WeightedIndex, prelude::*, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    io::{BufRead, Write},
    path::Path,
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info};

use crate::desc::{check_len, common_len, hamming};
use crate::*;

#[derive(Serialize, Deserialize, PartialEq, Clone)]
/// Feature vocabulary built from a training corpus of image keypoint descriptors. Can be:
/// 1. Created from one descriptor set per training image.
/// 2. Saved to and loaded from a line-oriented text file, or a bincode file
///    (requires bincode feature, enabled by default).
/// 3. Used to transform a new set of descriptors into a BoW representation (and
///    optionally get the direct index from features to nodes).
///
/// A vocabulary is immutable once built. Share it between databases with an `Arc`.
pub struct Vocabulary {
    params: VocabularyParams,
    pub(crate) desc_len: usize,
    pub(crate) nodes: Vec<Node>,
    words: Vec<NodeId>,
}

/// Word weighting applied when building and transforming.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WeightingType {
    /// Term frequency: every word weighs 1, counts carry the signal.
    TF,
    /// Term frequency times `ln(N / N_w)` over the training images.
    #[default]
    TfIdf,
    /// `ln(N / N_w)` only.
    IDF,
    /// Word presence: every word weighs 1 and is counted once per image.
    Binary,
}

/// How the k initial centroids of a clustering step are picked.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Seeding {
    #[default]
    KMeansPlusPlus,
    Random,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VocabularyParams {
    /// Branching factor.
    pub k: usize,
    /// Maximum number of levels below the root.
    pub depth: usize,
    pub weighting: WeightingType,
    pub scoring: ScoringType,
    pub seeding: Seeding,
    /// Cap on assignment/update rounds per clustering step.
    pub max_iterations: usize,
    /// Seed of the clustering rng. Equal seeds give identical vocabularies.
    pub seed: u64,
}

impl Default for VocabularyParams {
    fn default() -> Self {
        Self {
            k: 10,
            depth: 5,
            weighting: WeightingType::default(),
            scoring: ScoringType::default(),
            seeding: Seeding::default(),
            max_iterations: 100,
            seed: 0,
        }
    }
}

impl VocabularyParams {
    pub fn new(k: usize, depth: usize) -> Self {
        Self {
            k,
            depth,
            ..Default::default()
        }
    }

    fn validate(&self) -> BowResult<()> {
        if self.k < 2 {
            return Err(BowErr::InvalidParams(format!(
                "branching factor must be at least 2, got {}",
                self.k
            )));
        }
        if self.depth == 0 {
            return Err(BowErr::InvalidParams("depth must be at least 1".into()));
        }
        if self.max_iterations == 0 {
            return Err(BowErr::InvalidParams(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Vocabulary API
impl Vocabulary {
    /// Transform a set of binary descriptors into its bag of words
    /// representation with respect to the Vocabulary. The result is normalized
    /// as required by the vocabulary's scoring type.
    pub fn transform(&self, features: &[Descriptor]) -> BowResult<BowVector> {
        self.transform_generic(features.iter(), None)
            .map(|(bow, _)| bow)
    }

    /// Transform a set of binary descriptors into its bag of words
    /// representation with respect to the Vocabulary.
    ///
    /// Also provides the "direct index" from tree nodes to features: `features[i]` is listed
    /// under the node it passes through at level `depth - levels_up` (level 0 is the root,
    /// `levels_up == 0` gives the words). Branches that end above that level list the word.
    pub fn transform_with_direct_idx(
        &self,
        features: &[Descriptor],
        levels_up: usize,
    ) -> BowResult<(BowVector, FeatureVector)> {
        let (bow, paths) = self.transform_generic(features.iter(), Some(levels_up))?;
        let mut fv = FeatureVector::new();
        for (i, (_, node)) in paths.into_iter().enumerate() {
            fv.add_feature(node, i);
        }
        Ok((bow, fv))
    }

    /// Build a vocabulary from a training corpus, one descriptor set per image.
    ///
    /// An empty corpus yields an empty vocabulary (no words).
    pub fn create(training: &[Vec<Descriptor>], params: VocabularyParams) -> BowResult<Self> {
        Self::create_generic(training, params, None)
    }

    /// Same as [`Vocabulary::create`], but gives up with [`BowErr::Cancelled`] once `cancel`
    /// is set. The flag is checked between clustering iterations.
    pub fn create_cancellable(
        training: &[Vec<Descriptor>],
        params: VocabularyParams,
        cancel: &AtomicBool,
    ) -> BowResult<Self> {
        Self::create_generic(training, params, Some(cancel))
    }

    /// Word the descriptor is quantized to.
    pub fn word_id(&self, feature: &Descriptor) -> BowResult<WordId> {
        if self.is_empty() {
            return Err(BowErr::EmptyVocabulary);
        }
        check_len(self.desc_len, feature.len())?;
        let (leaf, _) = self.descend(feature, 0);
        self.nodes[leaf as usize]
            .word_id
            .ok_or(BowErr::EmptyVocabulary)
    }

    pub fn word_weight(&self, word: WordId) -> Option<WordValue> {
        self.word_node(word).map(|n| n.weight)
    }

    /// Centroid descriptor of a word.
    pub fn word_descriptor(&self, word: WordId) -> Option<&Descriptor> {
        self.word_node(word).map(|n| &n.descriptor)
    }

    /// Ancestor of `word` at `level` (0 is the root). A word above `level` is its own ancestor.
    pub fn parent_at_level(&self, word: WordId, level: usize) -> Option<NodeId> {
        let mut node = self.word_node(word)?;
        while node.depth > level {
            node = &self.nodes[node.parent? as usize];
        }
        Some(node.id)
    }

    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    /// Number of tree nodes, root included.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn params(&self) -> &VocabularyParams {
        &self.params
    }

    pub fn weighting(&self) -> WeightingType {
        self.params.weighting
    }

    pub fn scoring(&self) -> ScoringType {
        self.params.scoring
    }

    /// Length in bytes of the descriptors this vocabulary accepts (0 when empty).
    pub fn descriptor_len(&self) -> usize {
        self.desc_len
    }

    /// Score two bow vectors with the vocabulary's scoring type.
    pub fn score(&self, a: &BowVector, b: &BowVector) -> WordValue {
        self.params.scoring.score(a, b)
    }

    /// Write the vocabulary in its text form.
    ///
    /// First line: `k depth weighting scoring descriptor_len seeding max_iterations seed`.
    /// Then one line per node except the root, parents before children:
    /// `node_id parent_id depth word_id|- weight descriptor_bytes...`.
    pub fn save_text<W: Write>(&self, mut out: W) -> BowResult<()> {
        let p = &self.params;
        writeln!(
            out,
            "{} {} {} {} {} {} {} {}",
            p.k, p.depth, p.weighting, p.scoring, self.desc_len, p.seeding, p.max_iterations, p.seed
        )?;
        for node in self.nodes.iter().skip(1) {
            let word = match node.word_id {
                Some(w) => w.to_string(),
                None => "-".to_string(),
            };
            writeln!(
                out,
                "{} {} {} {} {} {}",
                node.id,
                node.parent.unwrap_or(0),
                node.depth,
                word,
                node.weight,
                node.descriptor
            )?;
        }
        out.flush()?;
        Ok(())
    }

    /// Read a vocabulary written by [`Vocabulary::save_text`].
    pub fn load_text<R: BufRead>(input: R) -> BowResult<Self> {
        let mut lines = input.lines();
        let header = match lines.next() {
            Some(line) => line?,
            None => return Err(parse_err(1, "missing header")),
        };
        let (params, desc_len) = parse_header(&header)?;
        let mut v = Self::empty(params, desc_len);

        for (i, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            v.push_text_node(&line, i + 2)?;
        }
        v.check_structure()
            .map_err(|(node, msg)| parse_err(node as usize + 1, msg))?;

        info!(
            words = v.num_words(),
            nodes = v.num_nodes(),
            "Loaded vocabulary from text"
        );
        Ok(v)
    }

    pub fn save_text_file<P: AsRef<Path>>(&self, file: P) -> BowResult<()> {
        let file = std::fs::File::create(file)?;
        self.save_text(std::io::BufWriter::new(file))
    }

    pub fn load_text_file<P: AsRef<Path>>(file: P) -> BowResult<Self> {
        let file = std::fs::File::open(file)?;
        Self::load_text(std::io::BufReader::new(file))
    }

    /// Load a vocabulary from a bincode file
    #[cfg(feature = "bincode")]
    pub fn load<P: AsRef<std::path::Path>>(file: P) -> BowResult<Self> {
        let mut file = std::fs::File::open(file)?;
        let mut buffer: Vec<u8> = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut buffer)?;
        let v: Self = bincode::deserialize(&buffer)?;
        v.params
            .validate()
            .map_err(|e| BowErr::Decode(e.to_string()))?;
        v.check_structure()
            .map_err(|(node, msg)| BowErr::Decode(format!("node {}: {}", node, msg)))?;
        Ok(v)
    }

    /// Save vocabulary to a bincode file
    #[cfg(feature = "bincode")]
    pub fn save<P: AsRef<std::path::Path>>(&self, file: P) -> BowResult<()> {
        let serialized = bincode::serialize(&self)?;
        let mut file = std::fs::File::create(file)?;
        std::io::Write::write_all(&mut file, &serialized)?;
        Ok(())
    }
}

/////////////////////                Helpers                 ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
/// A node of the vocabulary tree. Leaves are words; the root has no descriptor.
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) depth: usize,
    pub(crate) children: Vec<NodeId>,
    pub(crate) descriptor: Descriptor,
    pub(crate) weight: WordValue,
    pub(crate) word_id: Option<WordId>,
}

/// A cluster produced by one k-means step, before the tree is flattened into the arena.
/// No children means the cluster becomes a word.
struct Cluster {
    centroid: Descriptor,
    children: Vec<Cluster>,
}

/// Per-feature `(word, node at the direct index level)`.
pub(crate) type Paths = Vec<(WordId, NodeId)>;

impl Vocabulary {
    fn create_generic(
        training: &[Vec<Descriptor>],
        params: VocabularyParams,
        cancel: Option<&AtomicBool>,
    ) -> BowResult<Self> {
        params.validate()?;
        let pooled: Vec<&Descriptor> = training.iter().flatten().collect();
        let desc_len = common_len(pooled.iter().copied())?;
        let mut v = Self::empty(params, desc_len);
        if pooled.is_empty() {
            info!("Empty training corpus, vocabulary has no words");
            return Ok(v);
        }

        // Build with hierarchical k-means clustering of features
        let mut rng = StdRng::seed_from_u64(params.seed);
        let clusters = Self::cluster(&params, &pooled, 0, &mut rng, cancel)?;

        // Number nodes and words depth-first
        v.flatten(0, clusters);
        v.set_word_weights(training);

        info!(
            words = v.num_words(),
            nodes = v.num_nodes(),
            images = training.len(),
            features = pooled.len(),
            "Created vocabulary"
        );
        Ok(v)
    }

    /// Cluster the features of a node at `depth` into its children, recursing into every
    /// child that does not become a word. Sibling subtrees are built in parallel, each with
    /// its own rng seeded from `rng` beforehand.
    fn cluster(
        params: &VocabularyParams,
        features: &[&Descriptor],
        depth: usize,
        rng: &mut StdRng,
        cancel: Option<&AtomicBool>,
    ) -> BowResult<Vec<Cluster>> {
        debug!(features = features.len(), depth, "KMeans step");
        let groups = Self::kmeans(params, features, rng, cancel)?;
        let seeds: Vec<u64> = groups.iter().map(|_| rng.gen()).collect();

        groups
            .into_par_iter()
            .zip(seeds)
            .map(|((centroid, members), seed)| -> BowResult<Cluster> {
                let leaf = depth + 1 == params.depth || members.len() <= params.k;
                let children = if leaf {
                    Vec::new()
                } else {
                    let mut rng = StdRng::seed_from_u64(seed);
                    Self::cluster(params, &members, depth + 1, &mut rng, cancel)?
                };
                Ok(Cluster { centroid, children })
            })
            .collect()
    }

    /// One k-means clustering. Returns the non-empty clusters with their members.
    fn kmeans<'a>(
        params: &VocabularyParams,
        features: &[&'a Descriptor],
        rng: &mut StdRng,
        cancel: Option<&AtomicBool>,
    ) -> BowResult<Vec<(Descriptor, Vec<&'a Descriptor>)>> {
        if features.len() <= params.k {
            // Only one feature per cluster
            return Ok(features.iter().map(|&f| (f.clone(), vec![f])).collect());
        }

        let mut clusters = match params.seeding {
            Seeding::KMeansPlusPlus => Self::initialize_clusters_kmeanspp(features, params.k, rng),
            Seeding::Random => Self::initialize_clusters(features, params.k, rng),
        };

        let mut assignment: Vec<usize> = Vec::new();
        for _ in 0..params.max_iterations {
            check_cancel(cancel)?;
            let new_assignment: Vec<usize> = features
                .par_iter()
                .map(|f| nearest(&clusters, f))
                .collect();

            if new_assignment == assignment {
                break; // converged
            }
            assignment = new_assignment;

            // update clusters, an empty cluster keeps its previous centroid
            let groups = group(features, &assignment, clusters.len());
            clusters = groups
                .iter()
                .zip(clusters)
                .map(|(g, old)| -> BowResult<Descriptor> {
                    Ok(Descriptor::centroid(g.iter().copied())?.unwrap_or(old))
                })
                .collect::<BowResult<_>>()?;
        }

        let groups = group(features, &assignment, clusters.len());
        Ok(clusters
            .into_iter()
            .zip(groups)
            .filter(|(_, g)| !g.is_empty())
            .collect())
    }

    /// Random initialization: k distinct features.
    fn initialize_clusters(features: &[&Descriptor], k: usize, rng: &mut StdRng) -> Vec<Descriptor> {
        features
            .choose_multiple(rng, k)
            .map(|&f| f.clone())
            .collect()
    }

    /// k-means++ initialization: each next centroid is drawn with probability proportional
    /// to its squared distance from the closest centroid picked so far. Stops early when
    /// every feature coincides with a centroid.
    fn initialize_clusters_kmeanspp(
        features: &[&Descriptor],
        k: usize,
        rng: &mut StdRng,
    ) -> Vec<Descriptor> {
        let mut clusters: Vec<Descriptor> = Vec::with_capacity(k);
        let first = features[rng.gen_range(0..features.len())];
        let mut min_dist: Vec<f64> = features
            .iter()
            .map(|f| hamming(first.as_bytes(), f.as_bytes()) as f64)
            .collect();
        clusters.push(first.clone());

        while clusters.len() < k {
            let weights = min_dist.iter().map(|d| d * d);
            let next = match WeightedIndex::new(weights) {
                Ok(dist) => features[dist.sample(rng)],
                Err(_) => break,
            };
            for (m, f) in min_dist.iter_mut().zip(features) {
                *m = m.min(hamming(next.as_bytes(), f.as_bytes()) as f64);
            }
            clusters.push(next.clone());
        }
        clusters
    }

    /// Append clusters as children of `parent`, depth-first. Leaves get the next word id.
    fn flatten(&mut self, parent: NodeId, clusters: Vec<Cluster>) {
        let depth = self.nodes[parent as usize].depth + 1;
        for c in clusters {
            let id = self.nodes.len() as NodeId;
            self.nodes[parent as usize].children.push(id);
            let word_id = if c.children.is_empty() {
                self.words.push(id);
                Some((self.words.len() - 1) as WordId)
            } else {
                None
            };
            self.nodes.push(Node {
                id,
                parent: Some(parent),
                depth,
                children: Vec::new(),
                descriptor: c.centroid,
                weight: 0.,
                word_id,
            });
            if !c.children.is_empty() {
                self.flatten(id, c.children);
            }
        }
    }

    fn set_word_weights(&mut self, training: &[Vec<Descriptor>]) {
        match self.params.weighting {
            WeightingType::TF | WeightingType::Binary => {
                for &n in &self.words {
                    self.nodes[n as usize].weight = 1.;
                }
            }
            WeightingType::TfIdf | WeightingType::IDF => {
                // Ni: number of training images containing word i
                let per_image: Vec<Vec<WordId>> = training
                    .par_iter()
                    .map(|image| {
                        let mut ws: Vec<WordId> = image
                            .iter()
                            .filter_map(|f| self.nodes[self.descend(f, 0).0 as usize].word_id)
                            .collect();
                        ws.sort_unstable();
                        ws.dedup();
                        ws
                    })
                    .collect();
                let mut counts = vec![0usize; self.words.len()];
                for w in per_image.iter().flatten() {
                    counts[*w as usize] += 1;
                }

                let n = training.len() as WordValue;
                for (&node, &ni) in self.words.iter().zip(&counts) {
                    self.nodes[node as usize].weight = if ni > 0 {
                        (n / ni as WordValue).ln()
                    } else {
                        0.
                    };
                }
            }
        }
    }

    /// Descend greedily from the root to a leaf. Returns the leaf and the last node on the
    /// path whose depth is at most `level`.
    fn descend(&self, feature: &Descriptor, level: usize) -> (NodeId, NodeId) {
        let mut node = &self.nodes[0];
        let mut at_level = 0;
        while !node.children.is_empty() {
            let mut best: (NodeId, u32) = (node.children[0], u32::MAX);
            for &child in &node.children {
                let d = hamming(
                    feature.as_bytes(),
                    self.nodes[child as usize].descriptor.as_bytes(),
                );
                if d < best.1 {
                    best = (child, d);
                }
            }
            node = &self.nodes[best.0 as usize];
            if node.depth <= level {
                at_level = node.id;
            }
        }
        (node.id, at_level)
    }

    /// Quantize every feature, accumulate the weighted bow vector and normalize it.
    /// `levels_up` selects the direct index level reported in the returned paths.
    pub(crate) fn transform_generic<'a, I>(
        &self,
        features: I,
        levels_up: Option<usize>,
    ) -> BowResult<(BowVector, Paths)>
    where
        I: IntoIterator<Item = &'a Descriptor>,
    {
        let mut features = features.into_iter().peekable();
        let mut bow = BowVector::new();
        let mut paths = Paths::new();
        if features.peek().is_none() {
            return Ok((bow, paths));
        }
        if self.is_empty() {
            return Err(BowErr::EmptyVocabulary);
        }

        let level = levels_up.map_or(0, |up| self.params.depth.saturating_sub(up));
        for feature in features {
            check_len(self.desc_len, feature.len())?;
            let (leaf, at_level) = self.descend(feature, level);
            let node = &self.nodes[leaf as usize];
            let word = node.word_id.ok_or(BowErr::EmptyVocabulary)?;
            match self.params.weighting {
                WeightingType::IDF | WeightingType::Binary => {
                    bow.add_if_not_exist(word, node.weight)
                }
                WeightingType::TF | WeightingType::TfIdf => bow.add_weight(word, node.weight),
            }
            paths.push((word, if levels_up.is_some() { at_level } else { leaf }));
        }

        bow.retain_nonzero();
        bow.normalize(self.params.scoring.norm());
        Ok((bow, paths))
    }

    fn word_node(&self, word: WordId) -> Option<&Node> {
        self.words
            .get(word as usize)
            .map(|&n| &self.nodes[n as usize])
    }

    pub(crate) fn empty(params: VocabularyParams, desc_len: usize) -> Self {
        Self {
            params,
            desc_len,
            nodes: vec![Node {
                id: 0,
                parent: None,
                depth: 0,
                children: Vec::new(),
                descriptor: Descriptor::default(),
                weight: 0.,
                word_id: None,
            }],
            words: Vec::new(),
        }
    }

    fn push_text_node(&mut self, line: &str, lineno: usize) -> BowResult<()> {
        let err = |msg: String| parse_err(lineno, msg);
        let mut fields = line.split_whitespace();
        let mut field = |name: &str| {
            fields
                .next()
                .ok_or_else(|| err(format!("missing {}", name)))
        };

        let id: NodeId = parse_field(field("node id")?, "node id", lineno)?;
        let parent: NodeId = parse_field(field("parent id")?, "parent id", lineno)?;
        let depth: usize = parse_field(field("depth")?, "depth", lineno)?;
        let word = match field("word id")? {
            "-" => None,
            w => Some(parse_field::<WordId>(w, "word id", lineno)?),
        };
        let weight: WordValue = parse_field(field("weight")?, "weight", lineno)?;
        let rest: Vec<&str> = fields.collect();
        let descriptor = Descriptor::from_text(&rest.join(" "), self.desc_len)
            .map_err(|e| err(e.to_string()))?;

        if id as usize != self.nodes.len() {
            return Err(err(format!("expected node id {}, found {}", self.nodes.len(), id)));
        }
        let expected = self.nodes.get(parent as usize).map(|p| p.depth + 1);
        if expected.map_or(false, |d| d != depth) {
            return Err(err(format!("invalid depth {} for node {}", depth, id)));
        }
        self.push_node(parent, word, weight, descriptor)
            .map_err(err)?;
        Ok(())
    }

    /// Append a node under `parent`, which must already exist and not be a word. A word must
    /// carry the next free word id.
    pub(crate) fn push_node(
        &mut self,
        parent: NodeId,
        word: Option<WordId>,
        weight: WordValue,
        descriptor: Descriptor,
    ) -> Result<NodeId, String> {
        let id = self.nodes.len() as NodeId;
        let parent_node = self
            .nodes
            .get(parent as usize)
            .ok_or_else(|| format!("parent {} not defined before node {}", parent, id))?;
        if parent_node.word_id.is_some() {
            return Err(format!("parent {} is a word", parent));
        }
        let depth = parent_node.depth + 1;
        if depth > self.params.depth {
            return Err(format!(
                "node {} at depth {} exceeds {} levels",
                id, depth, self.params.depth
            ));
        }
        if let Some(w) = word {
            if w as usize != self.words.len() {
                return Err(format!("expected word id {}, found {}", self.words.len(), w));
            }
            self.words.push(id);
        }

        self.nodes[parent as usize].children.push(id);
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            depth,
            children: Vec::new(),
            descriptor,
            weight,
            word_id: word,
        });
        Ok(id)
    }

    /// Check that the arena forms a tree `descend` can walk: ids match positions, parents
    /// come first and list their children, words are exactly the leaves and every
    /// descriptor has the vocabulary's length. Fails with the offending node.
    pub(crate) fn check_structure(&self) -> Result<(), (NodeId, String)> {
        let root = self
            .nodes
            .first()
            .ok_or_else(|| (0, "missing root".to_string()))?;
        if root.parent.is_some() || root.depth != 0 || root.word_id.is_some() {
            return Err((0, "malformed root".into()));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            let fail = |msg: String| Err((i as NodeId, msg));
            if node.id as usize != i {
                return fail(format!("node {} stored at position {}", node.id, i));
            }
            if i > 0 {
                let parent = match node.parent {
                    Some(p) if (p as usize) < i => &self.nodes[p as usize],
                    _ => return fail(format!("node {} has an invalid parent", i)),
                };
                if !parent.children.contains(&node.id) || parent.word_id.is_some() {
                    return fail(format!("node {} is not a child of {}", i, parent.id));
                }
                if node.depth != parent.depth + 1 || node.depth > self.params.depth {
                    return fail(format!("invalid depth {} for node {}", node.depth, i));
                }
                if node.descriptor.len() != self.desc_len {
                    return fail(format!(
                        "descriptor of {} bytes, expected {}",
                        node.descriptor.len(),
                        self.desc_len
                    ));
                }
            }
            for &c in &node.children {
                match self.nodes.get(c as usize) {
                    Some(child) if child.parent == Some(node.id) => {}
                    _ => return fail(format!("node {} lists invalid child {}", i, c)),
                }
            }
            match node.word_id {
                Some(w) if !node.children.is_empty() || self.words.get(w as usize) != Some(&node.id) => {
                    return fail(format!("node {} is not a valid word {}", i, w));
                }
                None if i > 0 && node.children.is_empty() => {
                    return fail(format!("node {} has no children and is not a word", i));
                }
                _ => {}
            }
        }

        for (w, &n) in self.words.iter().enumerate() {
            let word = self.nodes.get(n as usize).and_then(|node| node.word_id);
            if word != Some(w as WordId) {
                return Err((n, format!("word {} does not point to its leaf", w)));
            }
        }
        Ok(())
    }
}

fn parse_header(line: &str) -> BowResult<(VocabularyParams, usize)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 8 {
        return Err(parse_err(1, format!("expected 8 header fields, found {}", fields.len())));
    }
    let params = VocabularyParams {
        k: parse_field(fields[0], "k", 1)?,
        depth: parse_field(fields[1], "depth", 1)?,
        weighting: parse_field(fields[2], "weighting", 1)?,
        scoring: parse_field(fields[3], "scoring", 1)?,
        seeding: parse_field(fields[5], "seeding", 1)?,
        max_iterations: parse_field(fields[6], "max_iterations", 1)?,
        seed: parse_field(fields[7], "seed", 1)?,
    };
    params
        .validate()
        .map_err(|e| parse_err(1, e.to_string()))?;
    let desc_len = parse_field(fields[4], "descriptor length", 1)?;
    Ok((params, desc_len))
}

pub(crate) fn parse_field<T: FromStr>(s: &str, name: &str, line: usize) -> BowResult<T>
where
    T::Err: fmt::Display,
{
    s.parse()
        .map_err(|e| parse_err(line, format!("invalid {} {:?}: {}", name, s, e)))
}

pub(crate) fn parse_err(line: usize, msg: impl Into<String>) -> BowErr {
    BowErr::Parse {
        line,
        msg: msg.into(),
    }
}

fn check_cancel(cancel: Option<&AtomicBool>) -> BowResult<()> {
    match cancel {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(BowErr::Cancelled),
        _ => Ok(()),
    }
}

#[inline]
/// Index of the closest centroid, ties going to the lowest index.
fn nearest(clusters: &[Descriptor], feature: &Descriptor) -> usize {
    let mut best: (usize, u32) = (0, u32::MAX);
    for (j, c) in clusters.iter().enumerate() {
        let d = hamming(c.as_bytes(), feature.as_bytes());
        if d < best.1 {
            best = (j, d);
        }
    }
    best.0
}

fn group<'a>(features: &[&'a Descriptor], assignment: &[usize], k: usize) -> Vec<Vec<&'a Descriptor>> {
    let mut groups: Vec<Vec<&Descriptor>> = vec![Vec::new(); k];
    for (&f, &c) in features.iter().zip(assignment) {
        groups[c].push(f);
    }
    groups
}

impl WeightingType {
    fn name(&self) -> &'static str {
        match self {
            WeightingType::TF => "tf",
            WeightingType::TfIdf => "tf_idf",
            WeightingType::IDF => "idf",
            WeightingType::Binary => "binary",
        }
    }
}

impl fmt::Display for WeightingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WeightingType {
    type Err = BowErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "tf" => WeightingType::TF,
            "tf_idf" => WeightingType::TfIdf,
            "idf" => WeightingType::IDF,
            "binary" => WeightingType::Binary,
            _ => return Err(BowErr::Decode(format!("unknown weighting type {:?}", s))),
        })
    }
}

impl fmt::Display for Seeding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Seeding::KMeansPlusPlus => "kmeans++",
            Seeding::Random => "random",
        })
    }
}

impl FromStr for Seeding {
    type Err = BowErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kmeans++" => Ok(Seeding::KMeansPlusPlus),
            "random" => Ok(Seeding::Random),
            _ => Err(BowErr::Decode(format!("unknown seeding {:?}", s))),
        }
    }
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let weights: Vec<WordValue> = self
            .words
            .iter()
            .map(|&n| self.nodes[n as usize].weight)
            .collect();
        let max_depth = self.nodes.iter().map(|n| n.depth).max().unwrap_or(0);
        let mut s = f.debug_struct("Vocabulary");
        s.field("Word/Leaf Nodes", &self.num_words())
            .field("Other Nodes", &(self.num_nodes() - self.num_words()))
            .field("Levels", &self.params.depth)
            .field("Deepest Word", &max_depth)
            .field("Branching Factor", &self.params.k)
            .field("Weighting", &self.params.weighting)
            .field("Scoring", &self.params.scoring)
            .field("Descriptor Bytes", &self.desc_len);
        if !weights.is_empty() {
            s.field(
                "Min Word Weight",
                &weights.iter().copied().fold(WordValue::INFINITY, WordValue::min),
            )
            .field(
                "Max Word Weight",
                &weights.iter().copied().fold(0., WordValue::max),
            )
            .field(
                "Mean Word Weight",
                &(weights.iter().sum::<WordValue>() / weights.len() as WordValue),
            );
        }
        s.finish()
    }
}
