//! The embedded (in-process, filesystem-backed) vector store (C2).

use crate::atomic::write_atomic;
use crate::codec::{decode_document, decode_meta, encode_document, encode_meta};
use crate::layout::{collection_dir, doc_path, doc_path_gz, meta_path, vectorstore_root, META_FILE_NAME};
use async_trait::async_trait;
use contextd_core::{
    cosine_similarity, document::validate_embedding, CollectionMeta, Document, DocumentIterator,
    DocumentPatch, Error, Filter, Result, SearchHit, SearchOptions, VectorStore,
    DOCUMENT_ITERATOR_BUFFER,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Filesystem-backed `VectorStore`. One directory per collection, one file
/// per document, brute-force cosine scan for search — adequate at the
/// scale this substrate targets (episodic memories for a handful of
/// concurrent sessions, not a production ANN workload).
pub struct EmbeddedVectorStore {
    data_root: PathBuf,
    collections: RwLock<HashMap<String, CollectionMeta>>,
}

impl EmbeddedVectorStore {
    /// Open (or create) the embedded store rooted at `data_root`, loading
    /// metadata for any collections already present on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if `data_root` cannot be created or an existing
    /// metadata file cannot be parsed.
    pub async fn open(data_root: impl Into<PathBuf>) -> Result<Self> {
        let data_root = data_root.into();
        tokio::fs::create_dir_all(vectorstore_root(&data_root)).await?;

        let mut collections = HashMap::new();
        let mut entries = tokio::fs::read_dir(vectorstore_root(&data_root)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some(".quarantine") {
                continue;
            }
            let meta_file = path.join(META_FILE_NAME);
            match tokio::fs::read(&meta_file).await {
                Ok(bytes) => match decode_meta(&bytes) {
                    Ok(meta) => {
                        collections.insert(meta.name.clone(), meta);
                    }
                    Err(e) => warn!(path = %meta_file.display(), error = %e, "failed to parse collection metadata"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(dir = %path.display(), "collection directory missing metadata file");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self {
            data_root,
            collections: RwLock::new(collections),
        })
    }

    /// The data root this store was opened with.
    #[must_use]
    pub fn data_root(&self) -> &std::path::Path {
        &self.data_root
    }

    fn dimension_of(&self, collection: &str) -> Option<usize> {
        self.collections.read().get(collection).map(|m| m.dimension)
    }

    async fn write_document_file(&self, collection: &str, doc: &Document) -> Result<()> {
        let (bytes, compressed) = encode_document(doc)?;
        let target = if compressed {
            doc_path_gz(&self.data_root, collection, &doc.id)
        } else {
            doc_path(&self.data_root, collection, &doc.id)
        };
        let stale = if compressed {
            doc_path(&self.data_root, collection, &doc.id)
        } else {
            doc_path_gz(&self.data_root, collection, &doc.id)
        };
        let data_root = self.data_root.clone();
        let collection = collection.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let _ = data_root;
            let _ = collection;
            write_atomic(&target, &bytes)?;
            let _ = std::fs::remove_file(&stale);
            Ok(())
        })
        .await
        .map_err(|e| Error::WriteFailed(e.to_string()))??;
        Ok(())
    }

    async fn read_document_file(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let plain = doc_path(&self.data_root, collection, id);
        let gz = doc_path_gz(&self.data_root, collection, id);

        if let Ok(bytes) = tokio::fs::read(&plain).await {
            return Ok(Some(decode_document(&bytes, false)?));
        }
        match tokio::fs::read(&gz).await {
            Ok(bytes) => Ok(Some(decode_document(&bytes, true)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn scan_collection(&self, collection: &str) -> Result<Vec<Document>> {
        let dir = collection_dir(&self.data_root, collection);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CollectionNotFound(collection.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name == META_FILE_NAME {
                continue;
            }
            let compressed = name.ends_with(".gz");
            let bytes = tokio::fs::read(&path).await?;
            match decode_document(&bytes, compressed) {
                Ok(doc) => out.push(doc),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable document"),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl VectorStore for EmbeddedVectorStore {
    async fn add_documents(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        let dim = self
            .dimension_of(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        for doc in &docs {
            validate_embedding(&doc.embedding, Some(dim))?;
        }
        for doc in &docs {
            self.write_document_file(collection, doc).await?;
        }
        Ok(())
    }

    async fn search(&self, collection: &str, query_embedding: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let opts = SearchOptions {
            limit: k,
            ..SearchOptions::default()
        };
        self.search_with_filters(collection, query_embedding, &opts, None).await
    }

    async fn search_with_filters(
        &self,
        collection: &str,
        query_embedding: &[f32],
        opts: &SearchOptions,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>> {
        let docs = self.scan_collection(collection).await?;
        let mut hits: Vec<SearchHit> = docs
            .into_iter()
            .filter(|doc| filter.is_none_or(|f| f.matches(&doc.payload)))
            .map(|doc| SearchHit {
                score: cosine_similarity(query_embedding, &doc.embedding),
                id: doc.id,
                payload: doc.payload,
            })
            .filter(|hit| hit.score >= opts.min_score)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(opts.limit);
        Ok(hits)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        if self.dimension_of(collection).is_none() {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }
        self.read_document_file(collection, id).await
    }

    async fn update_document(&self, collection: &str, id: &str, patch: DocumentPatch) -> Result<()> {
        let dim = self
            .dimension_of(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        let Some(mut doc) = self.read_document_file(collection, id).await? else {
            // Idempotent under retry, mirroring delete's "missing ids are
            // not an error" rule.
            return Ok(());
        };
        if let Some(content) = patch.content {
            doc.content = content;
        }
        if let Some(embedding) = patch.embedding {
            validate_embedding(&embedding, Some(dim))?;
            doc.embedding = embedding;
        }
        for key in patch.payload_unset {
            doc.payload.remove(&key);
        }
        for (key, value) in patch.payload_set {
            doc.payload.insert(key, value);
        }
        self.write_document_file(collection, &doc).await
    }

    async fn delete_documents(&self, collection: &str, ids: &[String]) -> Result<()> {
        if self.dimension_of(collection).is_none() {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }
        for id in ids {
            let plain = doc_path(&self.data_root, collection, id);
            let gz = doc_path_gz(&self.data_root, collection, id);
            let _ = tokio::fs::remove_file(&plain).await;
            let _ = tokio::fs::remove_file(&gz).await;
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionMeta>> {
        Ok(self.collections.read().values().cloned().collect())
    }

    async fn new_document_iterator(&self, collection: &str) -> Result<DocumentIterator> {
        if self.dimension_of(collection).is_none() {
            return Err(Error::CollectionNotFound(collection.to_string()));
        }
        let dir = collection_dir(&self.data_root, collection);
        let (tx, rx) = mpsc::channel(DOCUMENT_ITERATOR_BUFFER);

        tokio::spawn(async move {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                        if name == META_FILE_NAME {
                            continue;
                        }
                        let compressed = name.ends_with(".gz");
                        let result = match tokio::fs::read(&path).await {
                            Ok(bytes) => decode_document(&bytes, compressed),
                            Err(e) => Err(e.into()),
                        };
                        if tx.send(result).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
        });

        Ok(DocumentIterator::new(rx))
    }

    async fn ensure_collection(&self, meta: CollectionMeta) -> Result<()> {
        if self.collections.read().contains_key(&meta.name) {
            return Ok(());
        }
        let dir = collection_dir(&self.data_root, &meta.name);
        tokio::fs::create_dir_all(&dir).await?;
        let path = meta_path(&self.data_root, &meta.name);
        let bytes = encode_meta(&meta)?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| Error::WriteFailed(e.to_string()))??;
        self.collections.write().insert(meta.name.clone(), meta);
        Ok(())
    }
}
