//! The quarantine scan itself (spec §4.4 steps 1-3).

use crate::report::{CollectionState, HealthReport};
use contextd_core::{Error, Result};
use contextd_store_embedded::layout::{quarantine_dir, quarantine_root, vectorstore_root, META_FILE_NAME};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::warn;

/// Scan every collection directory under `data_root`, quarantining any
/// found corrupt, and return the resulting report.
///
/// # Errors
///
/// Returns an error if the vectorstore root cannot be read.
pub async fn scan_and_quarantine(data_root: &Path) -> Result<HealthReport> {
    let started = Instant::now();
    let root = vectorstore_root(data_root);
    tokio::fs::create_dir_all(&root).await?;
    tokio::fs::create_dir_all(quarantine_root(data_root)).await?;

    let mut healthy = Vec::new();
    let mut corrupt = Vec::new();
    let mut empty = Vec::new();
    let mut details = BTreeMap::new();

    let mut entries = tokio::fs::read_dir(&root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let dir_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        if dir_name == ".quarantine" {
            continue;
        }

        match classify(&path).await? {
            (CollectionState::Healthy, name) => healthy.push(name),
            (CollectionState::Empty, _) => empty.push(dir_name),
            (CollectionState::Corrupt, _) => {
                let dest = quarantine_dir(data_root, &dir_name);
                match tokio::fs::rename(&path, &dest).await {
                    Ok(()) => {
                        warn!(collection = %dir_name, destination = %dest.display(), "quarantined corrupt collection");
                        details.insert(dir_name.clone(), dest.display().to_string());
                    }
                    Err(e) => {
                        warn!(collection = %dir_name, error = %e, "failed to quarantine corrupt collection, leaving in place");
                        details.insert(dir_name.clone(), format!("quarantine failed: {e}"));
                    }
                }
                corrupt.push(dir_name);
            }
        }
    }

    Ok(HealthReport {
        healthy,
        corrupt,
        empty,
        last_check: chrono::Utc::now(),
        duration: started.elapsed(),
        details,
    })
}

/// Classify a single collection directory, returning its state and (for
/// healthy collections) the collection name read from its metadata.
async fn classify(dir: &Path) -> Result<(CollectionState, String)> {
    let meta_path = dir.join(META_FILE_NAME);
    match tokio::fs::read(&meta_path).await {
        Ok(bytes) => {
            let name = contextd_store_embedded::codec::decode_meta(&bytes)
                .map(|m| m.name)
                .unwrap_or_else(|_| dir.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string());
            Ok((CollectionState::Healthy, name))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if has_any_entry(dir).await? {
                Ok((CollectionState::Corrupt, String::new()))
            } else {
                Ok((CollectionState::Empty, String::new()))
            }
        }
        Err(e) => Err(Error::Io(e)),
    }
}

async fn has_any_entry(dir: &Path) -> std::io::Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn healthy_collection_is_left_in_place() {
        let root = TempDir::new().unwrap();
        let store = contextd_store_embedded::EmbeddedVectorStore::open(root.path()).await.unwrap();
        store
            .ensure_collection(contextd_core::CollectionMeta::new("memories", 2))
            .await
            .unwrap();

        let report = scan_and_quarantine(root.path()).await.unwrap();
        assert_eq!(report.healthy, vec!["memories".to_string()]);
        assert!(report.corrupt.is_empty());
        assert_eq!(report.status(), "ok");
    }

    #[tokio::test]
    async fn corrupt_collection_is_quarantined() {
        let root = TempDir::new().unwrap();
        let corrupt_dir = vectorstore_root(root.path()).join("deadbeefcafebabe");
        tokio::fs::create_dir_all(&corrupt_dir).await.unwrap();
        tokio::fs::write(corrupt_dir.join("somehash.gob"), b"orphan").await.unwrap();

        let report = scan_and_quarantine(root.path()).await.unwrap();
        assert_eq!(report.corrupt, vec!["deadbeefcafebabe".to_string()]);
        assert_eq!(report.status(), "degraded");
        assert!(!corrupt_dir.exists());
        assert!(quarantine_dir(root.path(), "deadbeefcafebabe").exists());
    }

    #[tokio::test]
    async fn empty_directory_is_reported_but_not_moved() {
        let root = TempDir::new().unwrap();
        let empty_dir = vectorstore_root(root.path()).join("0000000000000000");
        tokio::fs::create_dir_all(&empty_dir).await.unwrap();

        let report = scan_and_quarantine(root.path()).await.unwrap();
        assert_eq!(report.empty, vec!["0000000000000000".to_string()]);
        assert!(empty_dir.exists());
    }
}
