//! The vector store capability set (spec §4.2, §9).
//!
//! Every wrapper — isolation, resilient, fallback — implements this same
//! trait and composes over an inner implementor, the way the teacher's
//! `StorageBackend` trait is implemented once per backend and wrapped by
//! synchronizers above it.

use crate::document::{CollectionMeta, Document};
use crate::filter::{Filter, SearchOptions};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A single scored search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Document id.
    pub id: String,
    /// Cosine score, normalised to `[0, 1]` (0.5 == orthogonal).
    pub score: f32,
    /// The document's payload (content/embedding are not returned by
    /// default to keep search responses small; callers needing the full
    /// document use [`VectorStore::get_document`]).
    pub payload: crate::document::Payload,
}

/// Patch applied by [`VectorStore::update_document`]. `None` leaves the
/// field untouched.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    /// Replacement content (re-embedding is the caller's responsibility).
    pub content: Option<String>,
    /// Replacement embedding.
    pub embedding: Option<Vec<f32>>,
    /// Payload keys to insert or overwrite.
    pub payload_set: crate::document::Payload,
    /// Payload keys to remove.
    pub payload_unset: Vec<String>,
}

/// Streaming cursor over a collection's documents, backed by a bounded
/// channel so that a full scan never materialises every document in
/// memory at once (spec §4.5.6's orphan-recovery scan reuses this type).
pub struct DocumentIterator {
    receiver: mpsc::Receiver<Result<Document>>,
}

impl DocumentIterator {
    /// Wrap a receiver half of a bounded channel as a `DocumentIterator`.
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<Result<Document>>) -> Self {
        Self { receiver }
    }

    /// Pull the next document, or `None` when the stream is exhausted.
    pub async fn next(&mut self) -> Option<Result<Document>> {
        self.receiver.recv().await
    }
}

/// Default channel capacity for [`DocumentIterator`] producers (spec
/// §4.5.6: "buffer ~100").
pub const DOCUMENT_ITERATOR_BUFFER: usize = 100;

/// The vector store capability set (spec §4.2's `AddDocuments`/`Search`/...).
///
/// Implementors: the embedded backend, the remote backend, and every
/// wrapper (isolation, resilient, fallback) which delegates to an inner
/// `VectorStore` after doing its own pre/post-processing.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert documents by id. Atomic per document; within one call,
    /// document order is preserved (spec §5).
    async fn add_documents(&self, collection: &str, docs: Vec<Document>) -> Result<()>;

    /// Top-k cosine search ranked by embedding similarity to `query_embedding`.
    async fn search(
        &self,
        collection: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Top-k cosine search with an explicit filter structure (spec §6.1's
    /// `SearchWithFilters`).
    async fn search_with_filters(
        &self,
        collection: &str,
        query_embedding: &[f32],
        opts: &SearchOptions,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>>;

    /// Fetch a single document by id.
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Apply a partial update to a document.
    async fn update_document(&self, collection: &str, id: &str, patch: DocumentPatch)
        -> Result<()>;

    /// Delete documents by id. Missing ids are not an error.
    async fn delete_documents(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// List every known collection.
    async fn list_collections(&self) -> Result<Vec<CollectionMeta>>;

    /// Open a streaming cursor over a collection's documents.
    async fn new_document_iterator(&self, collection: &str) -> Result<DocumentIterator>;

    /// Ensure a collection exists with the given dimension/metric,
    /// creating it if absent. Idempotent.
    async fn ensure_collection(&self, meta: CollectionMeta) -> Result<()>;
}

/// Cosine similarity between two vectors, normalised to `[0, 1]` (spec
/// §4.2: "score ∈ [0,1]; 0.5 = orthogonal-equivalent for normalised
/// vectors").
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.5;
    }
    let cos = dot / (norm_a * norm_b);
    (cos.clamp(-1.0, 1.0) + 1.0) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_half() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_similarity(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_score_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_orthogonal_equivalent() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_score_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
