use rand::{rngs::StdRng, Rng, SeedableRng};
use sembow::Descriptor;

/// `n` images of `per_image` descriptors. Each image draws its descriptors around a few
/// prototypes of its own, with a couple of flipped bits per descriptor.
pub fn images(seed: u64, n: usize, per_image: usize) -> Vec<Vec<Descriptor>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let protos: Vec<[u8; 32]> = (0..4).map(|_| rng.gen()).collect();
            (0..per_image)
                .map(|_| {
                    let mut b = protos[rng.gen_range(0..protos.len())];
                    for _ in 0..2 {
                        let bit = rng.gen_range(0..256);
                        b[bit / 8] ^= 1 << (bit % 8);
                    }
                    Descriptor::from(b)
                })
                .collect()
        })
        .collect()
}
