//! Embedding provider contract (C1, spec §4.1).

mod mock;

pub use mock::MockEmbeddingProvider;

use async_trait::async_trait;

/// Trait for embedding providers that convert text to vectors.
///
/// Contract (spec §4.1): deterministic for identical inputs within a
/// process lifetime; vector length constant per provider instance;
/// thread-safe. On failure the provider returns
/// [`crate::Error::EmbeddingUnavailable`] — callers must not fall back to
/// silently missing embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Map a single text to a fixed-length embedding vector.
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>>;

    /// Map a batch of texts to embedding vectors, in the same order as the
    /// input. The default implementation calls [`EmbeddingProvider::embed`]
    /// once per text; providers with a genuine batch API should override
    /// this for efficiency.
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// The fixed embedding dimension this provider produces.
    fn dimension(&self) -> usize;
}

/// Normalise a vector to unit length. Zero vectors are returned unchanged
/// (normalising them would divide by zero).
#[must_use]
pub fn normalize_vector(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
