mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use sembow::*;

fn params(scoring: ScoringType) -> VocabularyParams {
    VocabularyParams {
        scoring,
        ..VocabularyParams::new(5, 3)
    }
}

#[test]
fn every_image_retrieves_itself_first() {
    let training = common::images(42, 12, 60);
    for scoring in [
        ScoringType::L1,
        ScoringType::L2,
        ScoringType::ChiSquare,
        ScoringType::KL,
        ScoringType::Bhattacharyya,
        ScoringType::DotProduct,
    ] {
        let voc = Arc::new(Vocabulary::create(&training, params(scoring)).unwrap());
        let mut db = Database::new(voc, DatabaseParams::default());
        for img in &training {
            db.add(&Feature::from_descriptors(img.clone())).unwrap();
        }
        for (i, img) in training.iter().enumerate() {
            let res = db.query(&Feature::from_descriptors(img.clone()), 4).unwrap();
            assert_eq!(res[0].image_id as usize, i, "{}: {:?}", scoring, res);
            assert!((res[0].score - 1.).abs() < 1e-9, "{}: {:?}", scoring, res);
        }
    }
}

#[test]
fn unseen_images_match_their_noisy_copies() {
    let training = common::images(7, 10, 80);
    let voc = Arc::new(Vocabulary::create(&training, VocabularyParams::new(6, 3)).unwrap());
    let mut db = Database::new(voc.clone(), DatabaseParams::default());
    // database holds the first half of every image, queries use the second half
    for img in &training {
        db.add(&Feature::from_descriptors(img[..40].to_vec())).unwrap();
    }
    for (i, img) in training.iter().enumerate() {
        let res = db.query(&Feature::from_descriptors(img[40..].to_vec()), 1).unwrap();
        assert_eq!(res[0].image_id as usize, i);
    }
}

#[test]
fn inverted_file_matches_stored_vectors() {
    let training = common::images(3, 10, 50);
    let voc = Arc::new(Vocabulary::create(&training, VocabularyParams::new(4, 3)).unwrap());
    let mut db = Database::new(voc.clone(), DatabaseParams::default());
    for img in training.iter().chain(common::images(4, 5, 50).iter()) {
        db.add(&Feature::from_descriptors(img.clone())).unwrap();
    }

    for word in 0..voc.num_words() as WordId {
        let posted: BTreeSet<ImageId> = db.postings(word).iter().map(|p| p.image_id).collect();
        assert_eq!(posted.len(), db.postings(word).len(), "duplicate posting");
        let stored: BTreeSet<ImageId> = (0..db.len() as ImageId)
            .filter(|&id| db.bow(id).unwrap().get(word).map_or(false, |w| w > 0.))
            .collect();
        assert_eq!(posted, stored, "word {}", word);
    }
}

#[test]
fn queries_with_no_known_words_return_nothing() {
    let training = common::images(8, 4, 30);
    let voc = Arc::new(Vocabulary::create(&training, VocabularyParams::new(4, 2)).unwrap());
    let db = Database::new(voc, DatabaseParams::default());
    // nothing added yet
    let res = db
        .query(&Feature::from_descriptors(training[0].clone()), 5)
        .unwrap();
    assert!(res.is_empty());
}

fn labeled(descriptors: &[Descriptor], class: ClassId) -> Vec<Feature> {
    descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| Feature::new(i, d.clone()).with_class(class))
        .collect()
}

fn semantic_scores(policy: Arc<dyn SemanticPolicy>) -> (WordValue, WordValue) {
    let training = common::images(11, 6, 40);
    let voc = Arc::new(Vocabulary::create(&training, VocabularyParams::new(4, 3)).unwrap());
    let params = DatabaseParams {
        semantic: policy,
        ..Default::default()
    };
    let mut db = Database::new(voc, params);
    for img in &training[2..] {
        db.add(&Feature::from_descriptors(img.clone())).unwrap();
    }
    let same = &training[0];
    let matching = db.add(&labeled(same, 1)).unwrap();
    let disjoint = db.add(&labeled(same, 2)).unwrap();
    assert_eq!(db.bow(matching), db.bow(disjoint));

    let res = db.query(&labeled(same, 1), 0).unwrap();
    let score = |id| res.iter().find(|r| r.image_id == id).unwrap().score;
    (score(matching), score(disjoint))
}

#[test]
fn semantic_policies_prefer_matching_classes() {
    let policies: Vec<Arc<dyn SemanticPolicy>> = vec![
        Arc::new(MultiplicativePenalty::default()),
        Arc::new(ConflictFilter),
        Arc::new(AdditiveBoost::default()),
    ];
    for policy in policies {
        let name = format!("{:?}", policy);
        let (matching, disjoint) = semantic_scores(policy);
        assert!(matching > disjoint, "{}: {} <= {}", name, matching, disjoint);
    }

    let (matching, disjoint) = semantic_scores(Arc::new(NoSemantics));
    assert_eq!(matching, disjoint);
}

#[test]
fn conflict_filter_drops_fully_conflicting_images() {
    let (matching, disjoint) = semantic_scores(Arc::new(ConflictFilter));
    assert!((matching - 1.).abs() < 1e-9);
    assert_eq!(disjoint, 0.);
}

#[test]
fn unlabeled_queries_are_not_penalized() {
    let training = common::images(12, 4, 40);
    let voc = Arc::new(Vocabulary::create(&training, VocabularyParams::new(4, 3)).unwrap());
    let mut db = Database::new(voc, DatabaseParams::default().semantic(ConflictFilter));
    let id = db.add(&labeled(&training[0], 3)).unwrap();
    let res = db
        .query(&Feature::from_descriptors(training[0].clone()), 1)
        .unwrap();
    assert_eq!(res[0].image_id, id);
    assert!((res[0].score - 1.).abs() < 1e-9);
}

#[test]
fn text_vocabulary_gives_identical_results() {
    let training = common::images(21, 8, 50);
    let voc = Vocabulary::create(&training, VocabularyParams::new(5, 3)).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voc.txt");
    voc.save_text_file(&path).unwrap();
    let loaded = Vocabulary::load_text_file(&path).unwrap();

    for img in &training {
        assert_eq!(voc.transform(img).unwrap(), loaded.transform(img).unwrap());
    }
}
