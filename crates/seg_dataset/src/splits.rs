//! Deterministic train/validation splitting of sample ids.

use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffle `ids` with `seed` and hold out `ceil(test_size * n)` of them.
///
/// Returns `(train, test)`. `test_size` is clamped to `[0, 1]`.
pub fn train_test_split(ids: &[String], test_size: f32, seed: u64) -> (Vec<String>, Vec<String>) {
    if ids.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let frac = test_size.clamp(0.0, 1.0) as f64;
    let n_test = ((ids.len() as f64) * frac).ceil() as usize;
    let n_test = n_test.min(ids.len());

    let mut shuffled = ids.to_vec();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let train = shuffled.split_off(n_test);
    (train, shuffled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("img_{i:03}")).collect()
    }

    #[test]
    fn split_is_disjoint_and_covering() {
        let all = ids(10);
        let (train, test) = train_test_split(&all, 0.2, 2981);
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 8);
        let mut seen: HashSet<&String> = train.iter().collect();
        for id in &test {
            assert!(seen.insert(id), "{id} in both splits");
        }
        assert_eq!(seen.len(), all.len());
    }

    #[test]
    fn test_count_rounds_up() {
        let (train, test) = train_test_split(&ids(7), 0.2, 1);
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 5);
    }

    #[test]
    fn same_seed_same_split() {
        let all = ids(25);
        assert_eq!(train_test_split(&all, 0.2, 7), train_test_split(&all, 0.2, 7));
        assert_ne!(train_test_split(&all, 0.2, 7).1, train_test_split(&all, 0.2, 8).1);
    }

    #[test]
    fn empty_input_gives_empty_splits() {
        let (train, test) = train_test_split(&[], 0.2, 0);
        assert!(train.is_empty() && test.is_empty());
    }
}
