//! On-disk write-ahead log (spec §4.5.6, §6.3): one file per entry under
//! `<data_root>/wal/`, an HMAC key shared by every entry, checksum
//! verification and corrupt-file quarantine on recovery, and a bounded
//! streaming orphan-document scan.
//!
//! Grounded on `contextd-store-embedded::atomic::write_atomic` for the
//! `O_EXCL|O_CREAT|0600` + fsync + rename discipline spec §6.3 demands for
//! both `.wal` entries and the `.hmac_key` file.

use chrono::Utc;
use contextd_core::{Document, Error, Result, WalEntry};
use contextd_store_embedded::atomic::write_atomic;
use rand::RngCore;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::warn;

const HMAC_KEY_FILE: &str = ".hmac_key";
const HMAC_KEY_BYTES: usize = 32;

/// Bound on how many orphan ids the recovery scan will resurrect (spec
/// §4.5.6: "a bounded streaming scan (≤10 000)").
pub const MAX_ORPHAN_SCAN: usize = 10_000;

/// Channel buffer for the streaming orphan scan (spec §4.5.6: "buffer
/// ~100").
pub const ORPHAN_SCAN_BUFFER: usize = 100;

/// Report produced by WAL recovery on startup.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Entries that verified and were loaded as pending.
    pub recovered: usize,
    /// Entries whose checksum failed verification and were quarantined.
    pub quarantined: Vec<String>,
    /// Orphan document ids reintroduced as synthetic `add` entries.
    pub orphans_resurrected: usize,
}

/// `<data_root>/wal/`.
#[must_use]
pub fn wal_dir(data_root: &Path) -> PathBuf {
    data_root.join("wal")
}

fn entry_path(data_root: &Path, entry_id: &str) -> PathBuf {
    wal_dir(data_root).join(format!("{entry_id}.wal"))
}

fn hmac_key_path(data_root: &Path) -> PathBuf {
    wal_dir(data_root).join(HMAC_KEY_FILE)
}

/// Load the HMAC key, generating and atomically persisting a fresh 32-byte
/// key on first use (spec §6.3: "32 random bytes, 0600, written
/// atomically").
///
/// # Errors
///
/// Propagates any filesystem error.
pub async fn load_or_create_hmac_key(data_root: &Path) -> Result<Vec<u8>> {
    let dir = wal_dir(data_root);
    tokio::fs::create_dir_all(&dir).await?;
    let path = hmac_key_path(data_root);
    match tokio::fs::read(&path).await {
        Ok(bytes) if bytes.len() == HMAC_KEY_BYTES => Ok(bytes),
        _ => {
            let mut key = vec![0u8; HMAC_KEY_BYTES];
            rand::rng().fill_bytes(&mut key);
            let key_clone = key.clone();
            tokio::task::spawn_blocking(move || write_atomic(&path, &key_clone))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))??;
            Ok(key)
        }
    }
}

/// Append a new WAL entry to disk, atomically.
///
/// # Errors
///
/// Propagates serialization or filesystem errors.
pub async fn append(data_root: &Path, entry: &WalEntry) -> Result<()> {
    let dir = wal_dir(data_root);
    tokio::fs::create_dir_all(&dir).await?;
    let bytes = postcard::to_allocvec(entry).map_err(|e| Error::Configuration(e.to_string()))?;
    let path = entry_path(data_root, &entry.id);
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    Ok(())
}

/// Overwrite an existing WAL entry in place (used to mark `synced = true`
/// or bump `sync_attempts`).
///
/// # Errors
///
/// Propagates serialization or filesystem errors.
pub async fn rewrite(data_root: &Path, entry: &WalEntry) -> Result<()> {
    append(data_root, entry).await
}

/// Remove a WAL entry's file (compaction after a successful sync).
///
/// # Errors
///
/// Propagates any filesystem error other than "already gone".
pub async fn compact(data_root: &Path, entry_id: &str) -> Result<()> {
    let path = entry_path(data_root, entry_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Recover the WAL on startup (spec §4.5.6): verify every entry's
/// checksum, quarantine corrupt files, and return the pending (unsynced)
/// entries in FIFO (timestamp) order.
///
/// # Errors
///
/// Propagates directory-listing errors; individual unreadable files are
/// quarantined rather than propagated.
pub async fn recover(data_root: &Path, hmac_key: &[u8]) -> Result<(Vec<WalEntry>, RecoveryReport)> {
    let dir = wal_dir(data_root);
    tokio::fs::create_dir_all(&dir).await?;

    let mut pending = Vec::new();
    let mut report = RecoveryReport::default();

    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name == HMAC_KEY_FILE || !file_name.ends_with(".wal") {
            continue;
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(file = %file_name, error = %e, "failed to read WAL entry, quarantining");
                quarantine(&path, file_name, &mut report).await;
                continue;
            }
        };

        match postcard::from_bytes::<WalEntry>(&bytes) {
            Ok(parsed) if parsed.verify(hmac_key) => {
                report.recovered += 1;
                if !parsed.synced {
                    pending.push(parsed);
                }
            }
            _ => {
                warn!(file = %file_name, "WAL entry failed checksum verification, quarantining");
                quarantine(&path, file_name, &mut report).await;
            }
        }
    }

    pending.sort_by_key(|e| e.timestamp);
    Ok((pending, report))
}

async fn quarantine(path: &Path, file_name: &str, report: &mut RecoveryReport) {
    let backup = path.with_file_name(format!("{file_name}.corrupted.{}", Utc::now().timestamp()));
    if let Err(e) = tokio::fs::rename(path, &backup).await {
        warn!(file = %file_name, error = %e, "failed to quarantine corrupt WAL file");
    }
    report.quarantined.push(file_name.to_string());
}

/// Build the set of ids that must never be resurrected because some
/// `delete` entry's history names them (spec §4.5.6).
#[must_use]
pub fn deleted_ids(entries: &[WalEntry]) -> HashSet<String> {
    entries
        .iter()
        .filter(|e| e.operation == contextd_core::WalOperation::Delete)
        .flat_map(|e| e.ids.iter().cloned())
        .collect()
}

/// Stream orphan documents from `local_ids` (a full listing of local
/// document ids, bounded to [`MAX_ORPHAN_SCAN`]) that have no existing WAL
/// entry and are not named by any delete history, reintroducing each as a
/// synthetic `add` WAL entry with `remote_state = Unknown`.
///
/// Consumes documents from `source` over a bounded channel (spec §4.5.6:
/// "channel-based iterator with backpressure... never materialises all
/// documents in memory").
///
/// # Errors
///
/// Propagates WAL append errors; the scan itself cannot fail.
pub async fn resurrect_orphans(
    data_root: &Path,
    hmac_key: &[u8],
    known_entry_ids: &HashSet<String>,
    deleted: &HashSet<String>,
    mut source: mpsc::Receiver<Document>,
) -> Result<usize> {
    let mut resurrected = 0usize;
    let mut scanned = 0usize;
    while let Some(doc) = source.recv().await {
        if scanned >= MAX_ORPHAN_SCAN {
            warn!(limit = MAX_ORPHAN_SCAN, "orphan scan bound reached, stopping early");
            break;
        }
        scanned += 1;
        if deleted.contains(&doc.id) || known_entry_ids.contains(&doc.id) {
            continue;
        }
        let entry_id = format!("orphan-{}", doc.id);
        if known_entry_ids.contains(&entry_id) {
            continue;
        }
        let mut entry = WalEntry::new_add(entry_id, "recovered", vec![doc], hmac_key)?;
        entry.synced = true;
        entry.remote_state = contextd_core::RemoteState::Unknown;
        append(data_root, &entry).await?;
        resurrected += 1;
    }
    Ok(resurrected)
}

/// FIFO ordering helper exposed for the sync task (spec §4.5.4: "reads
/// pending WAL entries FIFO").
#[must_use]
pub fn fifo_order(mut entries: Vec<WalEntry>) -> VecDeque<WalEntry> {
    entries.sort_by_key(|e| e.timestamp);
    entries.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_core::Document;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn doc(id: &str) -> Document {
        Document {
            id: id.to_string(),
            content: "hello".to_string(),
            embedding: vec![0.1, 0.2],
            payload: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn hmac_key_is_created_once_and_reused() {
        let dir = TempDir::new().unwrap();
        let k1 = load_or_create_hmac_key(dir.path()).await.unwrap();
        let k2 = load_or_create_hmac_key(dir.path()).await.unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), HMAC_KEY_BYTES);
    }

    #[tokio::test]
    async fn append_and_recover_round_trip() {
        let dir = TempDir::new().unwrap();
        let key = load_or_create_hmac_key(dir.path()).await.unwrap();
        let entry = WalEntry::new_add("w1", "memories", vec![doc("d1")], &key).unwrap();
        append(dir.path(), &entry).await.unwrap();

        let (pending, report) = recover(dir.path(), &key).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(report.recovered, 1);
        assert!(report.quarantined.is_empty());
    }

    #[tokio::test]
    async fn corrupt_entry_is_quarantined_not_returned() {
        let dir = TempDir::new().unwrap();
        let key = load_or_create_hmac_key(dir.path()).await.unwrap();
        let mut entry = WalEntry::new_add("w1", "memories", vec![doc("d1")], &key).unwrap();
        entry.checksum = "00".repeat(32);
        append(dir.path(), &entry).await.unwrap();

        let (pending, report) = recover(dir.path(), &key).await.unwrap();
        assert!(pending.is_empty());
        assert_eq!(report.quarantined.len(), 1);
        assert!(report.quarantined[0].contains("w1"));
    }

    #[tokio::test]
    async fn compact_removes_synced_entry() {
        let dir = TempDir::new().unwrap();
        let key = load_or_create_hmac_key(dir.path()).await.unwrap();
        let entry = WalEntry::new_delete("w1", "memories", vec!["d1".into()], &key).unwrap();
        append(dir.path(), &entry).await.unwrap();
        compact(dir.path(), "w1").await.unwrap();

        let (pending, _) = recover(dir.path(), &key).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn orphan_scan_respects_delete_history_and_bound() {
        let dir = TempDir::new().unwrap();
        let key = load_or_create_hmac_key(dir.path()).await.unwrap();
        let deleted: HashSet<String> = ["gone".to_string()].into_iter().collect();
        let known = HashSet::new();

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx.send(doc("gone")).await;
            let _ = tx.send(doc("keep")).await;
        });

        let resurrected = resurrect_orphans(dir.path(), &key, &known, &deleted, rx)
            .await
            .unwrap();
        assert_eq!(resurrected, 1);

        let (pending, _) = recover(dir.path(), &key).await.unwrap();
        assert_eq!(pending.len(), 0); // resurrected entries are marked synced=true
    }
}
