//! Deterministic mock embedding provider, intended for tests and for
//! development environments without a real embedding model configured.
//!
//! Grounded in the teacher's `MockLocalModel`: a seeded hash-based PRNG
//! gives identical input → identical output without pulling in an actual
//! model runtime.

use super::{normalize_vector, EmbeddingProvider};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic, non-semantic embedding provider for tests and
/// offline/dev use. Never use in production — the vectors carry no
/// semantic meaning, only stability across repeated calls.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    /// Create a mock provider with the given fixed dimension (384 is the
    /// collection default per spec §3.1).
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let value = ((seed >> 16) as f32) / 32768.0 - 1.0;
            embedding.push(value);
        }
        normalize_vector(embedding)
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        if text.is_empty() {
            return Err(crate::Error::EmbeddingUnavailable(
                "cannot embed empty text".into(),
            ));
        }
        Ok(self.generate(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_yields_same_embedding() {
        let provider = MockEmbeddingProvider::new(16);
        let a = provider.embed("hello world").await.unwrap();
        let b = provider.embed("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn different_text_yields_different_embedding() {
        let provider = MockEmbeddingProvider::new(16);
        let a = provider.embed("hello").await.unwrap();
        let b = provider.embed("world").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn embedding_has_declared_dimension() {
        let provider = MockEmbeddingProvider::new(32);
        let v = provider.embed("x").await.unwrap();
        assert_eq!(v.len(), 32);
        assert_eq!(provider.dimension(), 32);
    }

    #[tokio::test]
    async fn rejects_empty_text() {
        let provider = MockEmbeddingProvider::new(8);
        assert!(provider.embed("").await.is_err());
    }

    #[tokio::test]
    async fn embed_batch_preserves_order() {
        let provider = MockEmbeddingProvider::new(8);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let batch = provider.embed_batch(&texts).await.unwrap();
        for (text, vec) in texts.iter().zip(batch.iter()) {
            assert_eq!(vec, &provider.embed(text).await.unwrap());
        }
    }
}
