//! Write-ahead log entry type and checksum helpers (spec §3.7).

use crate::document::Document;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum serialized size of a single WAL entry (spec §3.7: "size ≤10 MB").
pub const MAX_ENTRY_BYTES: usize = 10 * 1024 * 1024;

/// Maximum number of documents/ids in a single WAL entry (spec §3.7:
/// "≤10 000 documents per entry").
pub const MAX_ENTRY_DOCS: usize = 10_000;

/// The whitelisted set of WAL operations (spec §3.7: "checked against a
/// closed whitelist at both write and read").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalOperation {
    /// Upsert of one or more documents.
    Add,
    /// Deletion of one or more document ids.
    Delete,
}

impl WalOperation {
    /// Parse from a string against the closed whitelist, rejecting
    /// anything else (spec §3.7).
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "add" => Ok(WalOperation::Add),
            "delete" => Ok(WalOperation::Delete),
            other => Err(Error::InvalidWalOperation(other.to_string())),
        }
    }
}

/// Whether the remote side is known to hold this entry's documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    /// Not yet determined.
    Unknown,
    /// Confirmed present on remote.
    Exists,
    /// Confirmed absent on remote (e.g. a delete that synced).
    Deleted,
}

/// A pending or completed write-ahead-log entry (spec §3.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Unique entry id.
    pub id: String,
    /// Collection this entry targets.
    pub collection: String,
    /// The operation kind.
    pub operation: WalOperation,
    /// Documents to add (populated when `operation == Add`).
    pub docs: Vec<Document>,
    /// Ids to delete (populated when `operation == Delete`).
    pub ids: Vec<String>,
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Whether this entry has been applied to the remote store.
    pub synced: bool,
    /// HMAC-SHA256 over the canonical encoding, hex-encoded.
    pub checksum: String,
    /// Remote-side knowledge of this entry's effect.
    pub remote_state: RemoteState,
    /// Number of sync attempts made so far.
    pub sync_attempts: u32,
    /// Timestamp of the last sync attempt, if any.
    pub last_attempt: Option<DateTime<Utc>>,
    /// The error from the last failed sync attempt, if any.
    pub sync_error: Option<String>,
}

impl WalEntry {
    /// Build a new `add` entry, computing and attaching its checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if `docs` exceeds [`MAX_ENTRY_DOCS`] or the
    /// canonical encoding exceeds [`MAX_ENTRY_BYTES`].
    pub fn new_add(id: impl Into<String>, collection: impl Into<String>, docs: Vec<Document>, key: &[u8]) -> Result<Self> {
        if docs.len() > MAX_ENTRY_DOCS {
            return Err(Error::Validation(format!(
                "WAL entry exceeds max document count {MAX_ENTRY_DOCS}"
            )));
        }
        let mut entry = Self {
            id: id.into(),
            collection: collection.into(),
            operation: WalOperation::Add,
            docs,
            ids: Vec::new(),
            timestamp: Utc::now(),
            synced: false,
            checksum: String::new(),
            remote_state: RemoteState::Unknown,
            sync_attempts: 0,
            last_attempt: None,
            sync_error: None,
        };
        entry.seal(key)?;
        Ok(entry)
    }

    /// Build a new `delete` entry, computing and attaching its checksum.
    pub fn new_delete(id: impl Into<String>, collection: impl Into<String>, ids: Vec<String>, key: &[u8]) -> Result<Self> {
        if ids.len() > MAX_ENTRY_DOCS {
            return Err(Error::Validation(format!(
                "WAL entry exceeds max document count {MAX_ENTRY_DOCS}"
            )));
        }
        let mut entry = Self {
            id: id.into(),
            collection: collection.into(),
            operation: WalOperation::Delete,
            docs: Vec::new(),
            ids,
            timestamp: Utc::now(),
            synced: false,
            checksum: String::new(),
            remote_state: RemoteState::Unknown,
            sync_attempts: 0,
            last_attempt: None,
            sync_error: None,
        };
        entry.seal(key)?;
        Ok(entry)
    }

    /// Canonical encoding over which the checksum is computed: every field
    /// except `checksum` itself, in a stable field order. Using
    /// `serde_json` with a `BTreeMap`-backed payload keeps this
    /// deterministic across processes.
    fn canonical_form(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Canonical<'a> {
            id: &'a str,
            collection: &'a str,
            operation: WalOperation,
            docs: &'a [Document],
            ids: &'a [String],
            timestamp: DateTime<Utc>,
        }
        let canonical = Canonical {
            id: &self.id,
            collection: &self.collection,
            operation: self.operation,
            docs: &self.docs,
            ids: &self.ids,
            timestamp: self.timestamp,
        };
        let bytes = serde_json::to_vec(&canonical)?;
        if bytes.len() > MAX_ENTRY_BYTES {
            return Err(Error::Validation(format!(
                "WAL entry exceeds max size {MAX_ENTRY_BYTES} bytes"
            )));
        }
        Ok(bytes)
    }

    /// Recompute and store the checksum over the current canonical form.
    fn seal(&mut self, key: &[u8]) -> Result<()> {
        let canonical = self.canonical_form()?;
        self.checksum = hex_encode(&hmac(key, &canonical));
        Ok(())
    }

    /// Verify the stored checksum against the current canonical form using
    /// a constant-time comparison (spec §3.7, §8).
    #[must_use]
    pub fn verify(&self, key: &[u8]) -> bool {
        let Ok(canonical) = self.canonical_form() else {
            return false;
        };
        let expected = hmac(key, &canonical);
        let Ok(actual) = hex_decode(&self.checksum) else {
            return false;
        };
        if actual.len() != expected.len() {
            return false;
        }
        bool::from(actual.ct_eq(&expected))
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::ChecksumMismatch(s.to_string()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| Error::ChecksumMismatch(s.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn key() -> Vec<u8> {
        vec![7u8; 32]
    }

    #[test]
    fn operation_whitelist_rejects_unknown_values() {
        assert!(WalOperation::parse("add").is_ok());
        assert!(WalOperation::parse("delete").is_ok());
        assert!(WalOperation::parse("truncate").is_err());
    }

    #[test]
    fn checksum_verifies_for_untouched_entry() {
        let entry = WalEntry::new_delete("w1", "memories", vec!["doc1".into()], &key()).unwrap();
        assert!(entry.verify(&key()));
    }

    #[test]
    fn checksum_fails_for_tampered_entry() {
        let mut entry = WalEntry::new_delete("w1", "memories", vec!["doc1".into()], &key()).unwrap();
        entry.ids.push("doc2".into());
        assert!(!entry.verify(&key()));
    }

    #[test]
    fn checksum_fails_for_wrong_key() {
        let entry = WalEntry::new_delete("w1", "memories", vec!["doc1".into()], &key()).unwrap();
        assert!(!entry.verify(&[0u8; 32]));
    }

    #[test]
    fn rejects_oversized_entry() {
        let docs: Vec<Document> = (0..MAX_ENTRY_DOCS + 1)
            .map(|i| Document {
                id: format!("d{i}"),
                content: "x".into(),
                embedding: vec![0.1],
                payload: BTreeMap::new(),
            })
            .collect();
        assert!(WalEntry::new_add("w1", "memories", docs, &key()).is_err());
    }
}
