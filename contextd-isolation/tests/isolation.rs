use contextd_core::{CollectionMeta, Document, Filter, TenantContext, VectorStore};
use contextd_isolation::{IsolationMode, TenantIsolationStore};
use contextd_store_embedded::EmbeddedVectorStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn doc(id: &str, embedding: Vec<f32>) -> Document {
    Document {
        id: id.into(),
        content: "hello".into(),
        embedding,
        payload: BTreeMap::new(),
    }
}

#[tokio::test]
async fn documents_are_invisible_across_tenants() {
    let dir = TempDir::new().unwrap();
    let inner = Arc::new(EmbeddedVectorStore::open(dir.path()).await.unwrap());
    inner.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();

    let acme = TenantContext::new("acme", None, None).unwrap();
    let globex = TenantContext::new("globex", None, None).unwrap();

    let acme_store = TenantIsolationStore::new(inner.clone(), acme.clone(), IsolationMode::Payload);
    let globex_store = TenantIsolationStore::new(inner.clone(), globex.clone(), IsolationMode::Payload);

    acme_store
        .add_documents("memories", vec![doc("d1", vec![1.0, 0.0])])
        .await
        .unwrap();

    assert!(acme_store.get_document("memories", "d1").await.unwrap().is_some());
    assert!(globex_store.get_document("memories", "d1").await.unwrap().is_none());

    let hits = globex_store.search("memories", &[1.0, 0.0], 10).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn caller_cannot_override_stamped_tenant_id() {
    let dir = TempDir::new().unwrap();
    let inner = Arc::new(EmbeddedVectorStore::open(dir.path()).await.unwrap());
    inner.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();

    let acme = TenantContext::new("acme", None, None).unwrap();
    let store = TenantIsolationStore::new(inner.clone(), acme.clone(), IsolationMode::Payload);

    let mut spoofed = doc("d1", vec![1.0, 0.0]);
    spoofed.payload.insert("tenant_id".to_string(), "attacker".into());
    store.add_documents("memories", vec![spoofed]).await.unwrap();

    let stored = inner.get_document("memories", "d1").await.unwrap().unwrap();
    assert_eq!(stored.payload.get("tenant_id").and_then(|v| v.as_str()), Some("acme"));
}

#[tokio::test]
async fn filter_injection_on_reserved_keys_is_rejected() {
    let dir = TempDir::new().unwrap();
    let inner = Arc::new(EmbeddedVectorStore::open(dir.path()).await.unwrap());
    inner.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();

    let acme = TenantContext::new("acme", None, None).unwrap();
    let store = TenantIsolationStore::new(inner, acme, IsolationMode::Payload);

    let opts = contextd_core::SearchOptions::default();
    let filter = Filter::Eq("tenant_id".to_string(), "other".into());
    let result = store
        .search_with_filters("memories", &[1.0, 0.0], &opts, Some(&filter))
        .await;
    assert!(matches!(result, Err(contextd_core::Error::TenantFilterInjection(_))));
}

#[tokio::test]
async fn filesystem_mode_scopes_collection_names() {
    let dir = TempDir::new().unwrap();
    let inner = Arc::new(EmbeddedVectorStore::open(dir.path()).await.unwrap());
    let acme = TenantContext::new("acme", None, None).unwrap();
    let store = TenantIsolationStore::new(inner.clone(), acme, IsolationMode::Filesystem);

    store.ensure_collection(CollectionMeta::new("memories", 2)).await.unwrap();
    store.add_documents("memories", vec![doc("d1", vec![1.0, 0.0])]).await.unwrap();

    // The inner store actually holds a tenant-suffixed collection name.
    assert!(inner.get_document("memories__acme", "d1").await.unwrap().is_some());
    assert!(inner.get_document("memories", "d1").await.is_err());
}
