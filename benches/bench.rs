use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;

use sembow::{Database, DatabaseParams, Descriptor, Feature, Vocabulary, VocabularyParams};

fn images(n: usize, per_image: usize) -> Vec<Vec<Descriptor>> {
    let mut rng = StdRng::seed_from_u64(0);
    (0..n)
        .map(|_| {
            (0..per_image)
                .map(|_| Descriptor::from(rng.gen::<[u8; 32]>()))
                .collect()
        })
        .collect()
}

/// Benchmark for Vocabulary::transform()
fn transf(c: &mut Criterion) {
    let training = images(20, 500);
    let voc = Vocabulary::create(&training, VocabularyParams::new(9, 3)).unwrap();
    c.bench_function("transform 500 features", |b| {
        b.iter(|| voc.transform(black_box(&training[0])).unwrap())
    });
}

fn create(c: &mut Criterion) {
    let training = images(10, 300);
    let mut group = c.benchmark_group("create");
    group.sample_size(10);
    group.bench_function("k=9 depth=3, 3000 features", |b| {
        b.iter(|| Vocabulary::create(black_box(&training), VocabularyParams::new(9, 3)).unwrap())
    });
    group.finish();
}

fn query(c: &mut Criterion) {
    let training = images(50, 300);
    let voc = Arc::new(Vocabulary::create(&training, VocabularyParams::new(9, 3)).unwrap());
    let mut db = Database::new(voc, DatabaseParams::default());
    for img in &training {
        db.add(&Feature::from_descriptors(img.clone())).unwrap();
    }
    let q = Feature::from_descriptors(training[7].clone());
    c.bench_function("query 50 images", |b| {
        b.iter(|| db.query(black_box(&q), 5).unwrap())
    });
}

criterion_group!(benches, transf, create, query);
criterion_main!(benches);
