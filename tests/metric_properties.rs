use proptest::prelude::*;
use sembow::Descriptor;

fn descriptor(len: usize) -> impl Strategy<Value = Descriptor> {
    proptest::collection::vec(any::<u8>(), len).prop_map(Descriptor::from)
}

fn triple() -> impl Strategy<Value = (Descriptor, Descriptor, Descriptor)> {
    (1usize..48).prop_flat_map(|len| (descriptor(len), descriptor(len), descriptor(len)))
}

fn bit(d: &Descriptor, i: usize) -> bool {
    d.as_bytes()[i / 8] & (0x80 >> (i % 8)) != 0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn hamming_is_a_metric((a, b, c) in triple()) {
        prop_assert_eq!(a.distance(&a).unwrap(), 0);
        prop_assert_eq!(a.distance(&b).unwrap(), b.distance(&a).unwrap());
        prop_assert!(a.distance(&c).unwrap() <= a.distance(&b).unwrap() + b.distance(&c).unwrap());
        if a != b {
            prop_assert!(a.distance(&b).unwrap() > 0);
        }
    }

    #[test]
    fn centroid_of_copies_is_identity(d in descriptor(32), n in 1usize..8) {
        let copies = vec![d.clone(); n];
        prop_assert_eq!(Descriptor::centroid(&copies).unwrap(), Some(d));
    }

    #[test]
    fn centroid_is_majority_vote(set in proptest::collection::vec(descriptor(8), 1..9)) {
        let c = Descriptor::centroid(&set).unwrap().unwrap();
        let threshold = (set.len() + 1) / 2;
        for i in 0..64 {
            let count = set.iter().filter(|d| bit(d, i)).count();
            prop_assert_eq!(bit(&c, i), count >= threshold, "bit {}", i);
        }
    }

    #[test]
    fn text_round_trip(d in (0usize..64).prop_flat_map(descriptor)) {
        let back = Descriptor::from_text(&d.to_string(), d.len()).unwrap();
        prop_assert_eq!(back, d);
    }
}
