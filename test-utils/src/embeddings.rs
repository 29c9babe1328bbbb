//! Fixed-seed random embeddings, for tests that need vectors distinct
//! from `contextd_core::MockEmbeddingProvider`'s content-hash derivation
//! (e.g. exercising a `VectorStore` backend's raw `search` directly,
//! without going through an `EmbeddingProvider`).

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A deterministic pseudo-random vector of `dimension` components in
/// `[-1.0, 1.0)`. The same `seed` always produces the same vector.
#[must_use]
pub fn seeded_vector(seed: u64, dimension: usize) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_is_deterministic() {
        assert_eq!(seeded_vector(7, 8), seeded_vector(7, 8));
    }

    #[test]
    fn different_seeds_diverge() {
        assert_ne!(seeded_vector(1, 8), seeded_vector(2, 8));
    }
}
