//! Unbiased shuffling and fixed-size sampling.

use rand::Rng;
use rand::seq::SliceRandom;

/// Shuffle `pool` (Fisher–Yates) and keep at most `count` items.
///
/// An undersized pool is returned whole (shuffled); it is not an error.
pub fn sample<T, R: Rng + ?Sized>(mut pool: Vec<T>, count: usize, rng: &mut R) -> Vec<T> {
    pool.as_mut_slice().shuffle(rng);
    pool.truncate(count);
    pool
}
