//! The resilient wrapper (C4): quarantine-on-open plus a periodic
//! background re-scan, wrapping any `VectorStore` that uses the embedded
//! backend's directory layout.

use crate::report::HealthReport;
use crate::scan::scan_and_quarantine;
use async_trait::async_trait;
use contextd_core::{
    CollectionMeta, Document, DocumentIterator, DocumentPatch, Filter, Result, SearchHit,
    SearchOptions, VectorStore,
};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default background scan interval (spec §4.4 step 5: "default 5 min").
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Wraps a `VectorStore` built on the embedded backend's directory
/// layout, quarantining corrupt collections on open and on every
/// periodic re-scan.
pub struct ResilientVectorStore<S> {
    data_root: PathBuf,
    inner: Arc<S>,
    last_report: Arc<RwLock<HealthReport>>,
    background_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl<S> ResilientVectorStore<S> {
    /// Open the wrapper: run the initial quarantine scan, then wrap
    /// `inner` (which should already have been opened against the same
    /// `data_root`, after any collections it found corrupt-free remain
    /// reachable).
    ///
    /// # Errors
    ///
    /// Propagates any filesystem error encountered during the scan.
    pub async fn open(data_root: impl Into<PathBuf>, inner: Arc<S>) -> Result<Self> {
        let data_root = data_root.into();
        let report = scan_and_quarantine(&data_root).await?;
        info!(
            healthy = report.healthy.len(),
            corrupt = report.corrupt.len(),
            empty = report.empty.len(),
            "initial quarantine scan complete"
        );
        Ok(Self {
            data_root,
            inner,
            last_report: Arc::new(RwLock::new(report)),
            background_task: Arc::new(RwLock::new(None)),
        })
    }

    /// The most recently completed scan's report (does not trigger a new
    /// scan).
    #[must_use]
    pub fn last_report(&self) -> HealthReport {
        self.last_report.read().clone()
    }

    /// `"ok"` or `"degraded"`, derived from the last completed scan
    /// (spec §6.1's `health()`).
    #[must_use]
    pub fn status(&self) -> &'static str {
        self.last_report.read().status()
    }

    /// Force an immediate re-scan, updating and returning the report.
    ///
    /// # Errors
    ///
    /// Propagates any filesystem error encountered during the scan.
    pub async fn check(&self) -> Result<HealthReport> {
        let report = scan_and_quarantine(&self.data_root).await?;
        *self.last_report.write() = report.clone();
        Ok(report)
    }

    /// Start the periodic background re-scan (spec §4.4 step 5). A
    /// second call while a task is already running is a no-op.
    pub fn start_background_scan(self: &Arc<Self>, interval: Duration) {
        if self.background_task.read().is_some() {
            debug!("background scan already running");
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it, we already scanned on open
            loop {
                ticker.tick().await;
                match this.check().await {
                    Ok(report) => debug!(
                        healthy = report.healthy.len(),
                        corrupt = report.corrupt.len(),
                        "periodic quarantine scan complete"
                    ),
                    Err(e) => error!(error = %e, "periodic quarantine scan failed"),
                }
            }
        });
        *self.background_task.write() = Some(handle);
    }

    /// Stop the periodic background re-scan, if running.
    pub fn stop_background_scan(&self) {
        if let Some(handle) = self.background_task.write().take() {
            handle.abort();
        }
    }
}

impl<S> Drop for ResilientVectorStore<S> {
    fn drop(&mut self) {
        self.stop_background_scan();
    }
}

#[async_trait]
impl<S: VectorStore + 'static> VectorStore for ResilientVectorStore<S> {
    async fn add_documents(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        self.inner.add_documents(collection, docs).await
    }

    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.inner.search(collection, query_embedding, k).await
    }

    async fn search_with_filters(
        &self,
        collection: &str,
        query_embedding: &[f32],
        opts: &SearchOptions,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        self.inner.search_with_filters(collection, query_embedding, opts, filter).await
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(collection, id).await
    }

    async fn update_document(&self, collection: &str, id: &str, patch: DocumentPatch) -> Result<()> {
        self.inner.update_document(collection, id, patch).await
    }

    async fn delete_documents(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.inner.delete_documents(collection, ids).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionMeta>> {
        self.inner.list_collections().await
    }

    async fn new_document_iterator(&self, collection: &str) -> Result<DocumentIterator> {
        self.inner.new_document_iterator(collection).await
    }

    async fn ensure_collection(&self, meta: CollectionMeta) -> Result<()> {
        self.inner.ensure_collection(meta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_store_embedded::EmbeddedVectorStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_quarantines_preexisting_corruption() {
        let dir = TempDir::new().unwrap();
        let vs_root = contextd_store_embedded::layout::vectorstore_root(dir.path());
        let corrupt = vs_root.join("badc0ffee0ddf00d");
        tokio::fs::create_dir_all(&corrupt).await.unwrap();
        tokio::fs::write(corrupt.join("x.gob"), b"orphan").await.unwrap();

        let inner = Arc::new(EmbeddedVectorStore::open(dir.path()).await.unwrap());
        let resilient = ResilientVectorStore::open(dir.path(), inner).await.unwrap();

        assert_eq!(resilient.status(), "degraded");
        assert!(!corrupt.exists());
    }

    #[tokio::test]
    async fn passthrough_delegates_to_inner() {
        let dir = TempDir::new().unwrap();
        let inner = Arc::new(EmbeddedVectorStore::open(dir.path()).await.unwrap());
        let resilient = ResilientVectorStore::open(dir.path(), inner).await.unwrap();

        resilient.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();
        assert_eq!(resilient.status(), "ok");
        let collections = resilient.list_collections().await.unwrap();
        assert_eq!(collections.len(), 1);
    }
}
