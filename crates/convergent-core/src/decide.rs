//! Probability-parameterized decisions with an injected random source.

use rand::seq::{index, SliceRandom};
use rand::Rng;

/// Returns true with the given probability. Out-of-range or NaN
/// probabilities are clamped into [0, 1].
pub fn roll<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    let p = if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    };
    if p <= 0.0 {
        return false;
    }
    if p >= 1.0 {
        return true;
    }
    rng.gen::<f64>() < p
}

/// Pick a random non-empty proper subset of `0..len`, sorted ascending.
///
/// Returns `None` when no proper subset exists (`len < 2`).
pub fn pick_proper_subset<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Option<Vec<usize>> {
    if len < 2 {
        return None;
    }
    let size = rng.gen_range(1..len);
    let mut picked = index::sample(rng, len, size).into_vec();
    picked.sort_unstable();
    Some(picked)
}

/// Pick one element uniformly.
pub fn pick_one<'a, T, R: Rng + ?Sized>(rng: &mut R, items: &'a [T]) -> Option<&'a T> {
    items.choose(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_roll_edges() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!((0..1000).all(|_| !roll(&mut rng, 0.0)));
        assert!((0..1000).all(|_| roll(&mut rng, 1.0)));
        assert!((0..1000).all(|_| !roll(&mut rng, -0.5)));
        assert!((0..1000).all(|_| roll(&mut rng, 7.0)));
        assert!((0..1000).all(|_| !roll(&mut rng, f64::NAN)));
    }

    #[test]
    fn test_roll_is_reproducible() {
        let mut a = ChaCha8Rng::seed_from_u64(99);
        let mut b = ChaCha8Rng::seed_from_u64(99);
        let left: Vec<bool> = (0..64).map(|_| roll(&mut a, 0.3)).collect();
        let right: Vec<bool> = (0..64).map(|_| roll(&mut b, 0.3)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_no_proper_subset_of_single_node() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(pick_proper_subset(&mut rng, 0), None);
        assert_eq!(pick_proper_subset(&mut rng, 1), None);
    }

    #[test]
    fn test_pick_one_empty() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let empty: [u8; 0] = [];
        assert!(pick_one(&mut rng, &empty).is_none());
        assert_eq!(pick_one(&mut rng, &[7]), Some(&7));
    }

    proptest! {
        #[test]
        fn proper_subset_is_non_empty_and_proper(seed in any::<u64>(), len in 2usize..16) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let subset = pick_proper_subset(&mut rng, len).unwrap();
            prop_assert!(!subset.is_empty());
            prop_assert!(subset.len() < len);
            prop_assert!(subset.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(subset.iter().all(|&i| i < len));
        }
    }
}
