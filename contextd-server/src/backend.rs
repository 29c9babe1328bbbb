//! Tagged backend selection (spec §4.9's glossary: "implementations choose
//! tagged variants for backends (`{Embedded, Remote}`)").
//!
//! None of `TenantIsolationStore<S>`, `ResilientVectorStore<S>`, or
//! `FallbackVectorStore<Remote, Local>` support `dyn VectorStore` — each
//! requires its wrapped type to be `Sized + 'static`. Rather than thread a
//! type parameter through every downstream service for three backend
//! shapes, `Backend` is a concrete enum implementing `VectorStore` itself
//! via match-delegation, so `Dispatcher` only ever holds one concrete type.

use async_trait::async_trait;
use contextd_core::{
    CollectionMeta, Document, DocumentIterator, DocumentPatch, Filter, Result, SearchHit,
    SearchOptions, VectorStore,
};
use contextd_fallback::{FallbackVectorStore, Pinger};
use contextd_resilient::ResilientVectorStore;
use contextd_store_embedded::EmbeddedVectorStore;
use contextd_store_remote::RemoteVectorStore;
use std::sync::Arc;

/// The three storage compositions a deployment can select via
/// `vectorstore.provider` + `vectorstore.fallback.enabled` (spec §6.4).
pub enum Backend {
    /// Embedded-only, wrapped in the quarantine/background-scan layer.
    Embedded(Arc<ResilientVectorStore<EmbeddedVectorStore>>),
    /// Remote-only, no local fallback.
    Remote(Arc<RemoteVectorStore>),
    /// Remote with an embedded local fallback, WAL, and circuit breaker.
    Fallback(Arc<FallbackVectorStore<RemoteVectorStore, ResilientVectorStore<EmbeddedVectorStore>>>),
}

impl Backend {
    /// The embedded resilient store's health report, if this backend
    /// composes one (spec §6.1's `health()`/`health_metadata()`).
    #[must_use]
    pub fn resilient_report(&self) -> Option<contextd_resilient::HealthReport> {
        match self {
            Backend::Embedded(store) => Some(store.last_report()),
            Backend::Remote(_) => None,
            Backend::Fallback(store) => Some(store.local().last_report()),
        }
    }

    /// The circuit breaker's current state, if this backend has one
    /// (only the fallback composition does).
    #[must_use]
    pub fn circuit_state(&self) -> Option<contextd_fallback::CircuitState> {
        match self {
            Backend::Embedded(_) | Backend::Remote(_) => None,
            Backend::Fallback(store) => Some(store.circuit_state()),
        }
    }

    /// Whether the remote leg is currently reachable, if this backend has
    /// one to probe.
    #[must_use]
    pub fn remote_healthy(&self) -> Option<bool> {
        match self {
            Backend::Embedded(_) => None,
            Backend::Remote(_) => Some(true),
            Backend::Fallback(store) => Some(store.is_remote_healthy()),
        }
    }
}

#[async_trait]
impl VectorStore for Backend {
    async fn add_documents(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        match self {
            Backend::Embedded(s) => s.add_documents(collection, docs).await,
            Backend::Remote(s) => s.add_documents(collection, docs).await,
            Backend::Fallback(s) => s.add_documents(collection, docs).await,
        }
    }

    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        match self {
            Backend::Embedded(s) => s.search(collection, query_embedding, k).await,
            Backend::Remote(s) => s.search(collection, query_embedding, k).await,
            Backend::Fallback(s) => s.search(collection, query_embedding, k).await,
        }
    }

    async fn search_with_filters(
        &self,
        collection: &str,
        query_embedding: &[f32],
        opts: &SearchOptions,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        match self {
            Backend::Embedded(s) => s.search_with_filters(collection, query_embedding, opts, filter).await,
            Backend::Remote(s) => s.search_with_filters(collection, query_embedding, opts, filter).await,
            Backend::Fallback(s) => s.search_with_filters(collection, query_embedding, opts, filter).await,
        }
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        match self {
            Backend::Embedded(s) => s.get_document(collection, id).await,
            Backend::Remote(s) => s.get_document(collection, id).await,
            Backend::Fallback(s) => s.get_document(collection, id).await,
        }
    }

    async fn update_document(&self, collection: &str, id: &str, patch: DocumentPatch) -> Result<()> {
        match self {
            Backend::Embedded(s) => s.update_document(collection, id, patch).await,
            Backend::Remote(s) => s.update_document(collection, id, patch).await,
            Backend::Fallback(s) => s.update_document(collection, id, patch).await,
        }
    }

    async fn delete_documents(&self, collection: &str, ids: &[String]) -> Result<()> {
        match self {
            Backend::Embedded(s) => s.delete_documents(collection, ids).await,
            Backend::Remote(s) => s.delete_documents(collection, ids).await,
            Backend::Fallback(s) => s.delete_documents(collection, ids).await,
        }
    }

    async fn list_collections(&self) -> Result<Vec<CollectionMeta>> {
        match self {
            Backend::Embedded(s) => s.list_collections().await,
            Backend::Remote(s) => s.list_collections().await,
            Backend::Fallback(s) => s.list_collections().await,
        }
    }

    async fn new_document_iterator(&self, collection: &str) -> Result<DocumentIterator> {
        match self {
            Backend::Embedded(s) => s.new_document_iterator(collection).await,
            Backend::Remote(s) => s.new_document_iterator(collection).await,
            Backend::Fallback(s) => s.new_document_iterator(collection).await,
        }
    }

    async fn ensure_collection(&self, meta: CollectionMeta) -> Result<()> {
        match self {
            Backend::Embedded(s) => s.ensure_collection(meta).await,
            Backend::Remote(s) => s.ensure_collection(meta).await,
            Backend::Fallback(s) => s.ensure_collection(meta).await,
        }
    }
}

/// Probes remote reachability for [`contextd_fallback::HealthMonitor`] by
/// calling `list_collections` — the cheapest read every remote
/// implementation must support, used the same way the teacher's
/// connection-pool health checks issue a trivial read rather than a
/// dedicated ping endpoint.
pub struct RemotePinger {
    remote: Arc<RemoteVectorStore>,
}

impl RemotePinger {
    #[must_use]
    pub fn new(remote: Arc<RemoteVectorStore>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Pinger for RemotePinger {
    async fn ping(&self) -> bool {
        self.remote.list_collections().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_core::{CollectionMeta, Document, Payload};

    async fn embedded_backend() -> (tempfile::TempDir, Backend) {
        let (tmp, store) = test_utils::temp_embedded_store().await;
        let resilient = ResilientVectorStore::open(tmp.path(), Arc::new(store)).await.unwrap();
        (tmp, Backend::Embedded(Arc::new(resilient)))
    }

    #[tokio::test]
    async fn embedded_variant_delegates_vectorstore_calls() {
        let (_tmp, backend) = embedded_backend().await;
        backend.ensure_collection(CollectionMeta::new("memories", 3)).await.unwrap();
        let doc = Document::new("doc-1", "hello", vec![1.0, 0.0, 0.0], Payload::new(), Some(3)).unwrap();
        backend.add_documents("memories", vec![doc]).await.unwrap();

        let hits = backend.search("memories", &[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc-1");

        let fetched = backend.get_document("memories", "doc-1").await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn embedded_variant_reports_health_but_no_circuit_or_remote() {
        let (_tmp, backend) = embedded_backend().await;
        assert!(backend.resilient_report().is_some());
        assert!(backend.circuit_state().is_none());
        assert!(backend.remote_healthy().is_none());
    }
}
