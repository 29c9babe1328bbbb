//! Read-path provenance annotations (spec §4.5.3). The shared
//! `VectorStore::search`/`search_with_filters` methods can only return
//! `Vec<SearchHit>`, so the fallback wrapper exposes this richer shape
//! through its own inherent `search_annotated`/`search_with_filters_annotated`
//! methods; the trait methods call through and discard the annotation.

use chrono::{DateTime, Utc};

/// Where a read's results came from, and how stale they might be.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadSource {
    /// Remote (authoritative) merged with local pending writes, local
    /// winning on id collisions.
    Merged {
        /// How many of the returned hits came from an unsynced local write.
        pending_count: usize,
    },
    /// Remote was unreachable; served from local only.
    Local {
        /// Timestamp of the last successful sync, if any.
        last_sync: Option<DateTime<Utc>>,
        /// Always `true` — local-only reads are stale by construction.
        stale: bool,
    },
}

impl ReadSource {
    /// `"merged"` or `"local"`, matching spec §4.5.3's `source` field.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ReadSource::Merged { .. } => "merged",
            ReadSource::Local { .. } => "local",
        }
    }
}
