//! On-disk path layout for the embedded backend (spec §6.3).
//!
//! ```text
//! <data_root>/vectorstore/<collection_hash>/00000000.gob
//! <data_root>/vectorstore/<collection_hash>/<doc_hash>.gob[.gz]
//! <data_root>/vectorstore/.quarantine/<collection_hash>/...
//! ```
//!
//! Collection and document names are hashed into fixed-width hex
//! directory/file names so that caller-supplied ids can never escape the
//! data root, independent of the tenant id sanitisation already applied
//! upstream.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Name of the per-collection metadata file (spec §6.3: `00000000.gob`).
pub const META_FILE_NAME: &str = "00000000.gob";

/// Hash an arbitrary name into a fixed 16-hex-char token suitable for use
/// as a path component.
#[must_use]
pub fn hash_name(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Root directory for all collections under `data_root`.
#[must_use]
pub fn vectorstore_root(data_root: &Path) -> PathBuf {
    data_root.join("vectorstore")
}

/// Directory for a single collection.
#[must_use]
pub fn collection_dir(data_root: &Path, collection: &str) -> PathBuf {
    vectorstore_root(data_root).join(hash_name(collection))
}

/// The quarantine root, sibling to the live collection directories.
#[must_use]
pub fn quarantine_root(data_root: &Path) -> PathBuf {
    vectorstore_root(data_root).join(".quarantine")
}

/// Where a quarantined collection directory is moved to.
#[must_use]
pub fn quarantine_dir(data_root: &Path, collection: &str) -> PathBuf {
    quarantine_root(data_root).join(hash_name(collection))
}

/// Path to a collection's metadata file.
#[must_use]
pub fn meta_path(data_root: &Path, collection: &str) -> PathBuf {
    collection_dir(data_root, collection).join(META_FILE_NAME)
}

/// Path to a document file, uncompressed form.
#[must_use]
pub fn doc_path(data_root: &Path, collection: &str, doc_id: &str) -> PathBuf {
    collection_dir(data_root, collection).join(format!("{}.gob", hash_name(doc_id)))
}

/// Path to a document file, gzip-compressed form.
#[must_use]
pub fn doc_path_gz(data_root: &Path, collection: &str, doc_id: &str) -> PathBuf {
    collection_dir(data_root, collection).join(format!("{}.gob.gz", hash_name(doc_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_fixed_width() {
        let a = hash_name("memories");
        let b = hash_name("memories");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn different_names_hash_differently() {
        assert_ne!(hash_name("memories"), hash_name("remediations"));
    }

    #[test]
    fn paths_stay_within_collection_dir_even_for_traversal_attempts() {
        let root = PathBuf::from("/data");
        let p = doc_path(&root, "memories", "../../etc/passwd");
        assert!(p.starts_with(collection_dir(&root, "memories")));
    }
}
