//! The tenant isolation wrapper (C3).

use crate::filter as tf;
use crate::mode::IsolationMode;
use async_trait::async_trait;
use contextd_core::{
    CollectionMeta, Document, DocumentIterator, DocumentPatch, Error, Filter, Result, SearchHit,
    SearchOptions, TenantContext, VectorStore, DOCUMENT_ITERATOR_BUFFER,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Wraps any [`VectorStore`], scoping every operation to one
/// [`TenantContext`] (spec §4.3).
///
/// Constructed per call-local context — cheap, since it only holds an
/// `Arc` to the inner store plus the tenant context itself.
pub struct TenantIsolationStore<S> {
    inner: Arc<S>,
    tenant: TenantContext,
    mode: IsolationMode,
}

impl<S> TenantIsolationStore<S> {
    /// Wrap `inner`, scoping every subsequent call to `tenant` under
    /// `mode`.
    #[must_use]
    pub fn new(inner: Arc<S>, tenant: TenantContext, mode: IsolationMode) -> Self {
        Self { inner, tenant, mode }
    }

    fn scoped_collection(&self, collection: &str) -> String {
        match self.mode {
            IsolationMode::Filesystem => format!("{collection}__{}", self.tenant.tenant_id()),
            IsolationMode::Payload | IsolationMode::None => collection.to_string(),
        }
    }

    fn stamps_payload(&self) -> bool {
        matches!(self.mode, IsolationMode::Payload)
    }
}

#[async_trait]
impl<S: VectorStore + 'static> VectorStore for TenantIsolationStore<S> {
    async fn add_documents(&self, collection: &str, mut docs: Vec<Document>) -> Result<()> {
        if self.stamps_payload() {
            for doc in &mut docs {
                tf::stamp_payload(&mut doc.payload, &self.tenant);
            }
        }
        self.inner.add_documents(&self.scoped_collection(collection), docs).await
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
        let composed = if self.stamps_payload() {
            Some(tf::compose(filter, &self.tenant)?)
        } else {
            if let Some(f) = filter {
                tf::reject_filter_injection(f, &self.tenant)?;
            }
            filter.cloned()
        };
        self.inner
            .search_with_filters(&self.scoped_collection(collection), query_embedding, opts, composed.as_ref())
            .await
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let doc = self.inner.get_document(&self.scoped_collection(collection), id).await?;
        Ok(match doc {
            Some(doc) if !self.stamps_payload() || tf::owned_by(&doc.payload, &self.tenant) => Some(doc),
            _ => None,
        })
    }

    async fn update_document(&self, collection: &str, id: &str, mut patch: DocumentPatch) -> Result<()> {
        if self.stamps_payload() {
            // Fail-closed: don't let a caller update a document it
            // cannot see, and don't let the reserved keys move.
            let scoped = self.scoped_collection(collection);
            let existing = self.inner.get_document(&scoped, id).await?;
            match existing {
                Some(doc) if tf::owned_by(&doc.payload, &self.tenant) => {}
                _ => return Ok(()),
            }
            tf::scrub_patch_reserved_keys(&mut patch.payload_set, &mut patch.payload_unset, &self.tenant);
            return self.inner.update_document(&scoped, id, patch).await;
        }
        self.inner.update_document(&self.scoped_collection(collection), id, patch).await
    }

    async fn delete_documents(&self, collection: &str, ids: &[String]) -> Result<()> {
        let scoped = self.scoped_collection(collection);
        if !self.stamps_payload() {
            return self.inner.delete_documents(&scoped, ids).await;
        }
        let mut owned_ids = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.inner.get_document(&scoped, id).await? {
                if tf::owned_by(&doc.payload, &self.tenant) {
                    owned_ids.push(id.clone());
                }
            }
        }
        self.inner.delete_documents(&scoped, &owned_ids).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionMeta>> {
        let all = self.inner.list_collections().await?;
        match self.mode {
            IsolationMode::Filesystem => {
                let suffix = format!("__{}", self.tenant.tenant_id());
                Ok(all
                    .into_iter()
                    .filter_map(|mut meta| {
                        let name = meta.name.strip_suffix(&suffix)?.to_string();
                        meta.name = name;
                        Some(meta)
                    })
                    .collect())
            }
            IsolationMode::Payload | IsolationMode::None => Ok(all),
        }
    }

    async fn new_document_iterator(&self, collection: &str) -> Result<DocumentIterator> {
        let mut inner_iter = self
            .inner
            .new_document_iterator(&self.scoped_collection(collection))
            .await?;

        if !self.stamps_payload() {
            return Ok(inner_iter);
        }

        let tenant = self.tenant.clone();
        let (tx, rx) = mpsc::channel(DOCUMENT_ITERATOR_BUFFER);
        tokio::spawn(async move {
            while let Some(result) = inner_iter.next().await {
                match result {
                    Ok(doc) if tf::owned_by(&doc.payload, &tenant) => {
                        if tx.send(Ok(doc)).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });
        Ok(DocumentIterator::new(rx))
    }

    async fn ensure_collection(&self, mut meta: CollectionMeta) -> Result<()> {
        meta.name = self.scoped_collection(&meta.name);
        self.inner.ensure_collection(meta).await
    }
}

/// Build a tenant-isolation wrapper, rejecting [`IsolationMode::None`]
/// when `production` is set (spec §4.3: "`None` ... rejected in
/// production").
///
/// # Errors
///
/// Returns [`Error::Configuration`] if `mode` is `None` and `production`
/// is `true`.
pub fn guard_production_mode(mode: IsolationMode, production: bool) -> Result<()> {
    if production && !mode.is_multi_tenant_safe() {
        return Err(Error::Configuration(
            "IsolationMode::None is not permitted in production".to_string(),
        ));
    }
    Ok(())
}
