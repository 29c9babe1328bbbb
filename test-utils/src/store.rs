//! Scratch embedded-store fixtures.

use contextd_core::TenantContext;
use contextd_store_embedded::EmbeddedVectorStore;
use tempfile::TempDir;

/// Open a fresh `EmbeddedVectorStore` under a new scratch directory.
/// The `TempDir` guard is returned alongside it — drop it only once the
/// test is done, or the directory is removed out from under the store.
///
/// # Panics
///
/// Panics if the scratch directory or store cannot be created — a test
/// setup failure, not a condition callers should handle.
pub async fn temp_embedded_store() -> (TempDir, EmbeddedVectorStore) {
    let dir = TempDir::new().expect("create scratch dir");
    let store = EmbeddedVectorStore::open(dir.path())
        .await
        .expect("open embedded store");
    (dir, store)
}

/// A `TenantContext` for a throwaway test tenant.
///
/// # Panics
///
/// Panics if `id` fails `TenantContext`'s sanitisation pattern — callers
/// should pass a plain lowercase identifier.
#[must_use]
pub fn test_tenant(id: &str) -> TenantContext {
    TenantContext::new(id, None, None).expect("valid test tenant id")
}
