//! Health report types (spec §4.4 step 4).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Classification of a single on-disk collection directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    /// Metadata file present.
    Healthy,
    /// No metadata file, but at least one document file — quarantined.
    Corrupt,
    /// No metadata file and no document files.
    Empty,
}

/// Result of a quarantine scan, suitable for HTTP exposure as the
/// service's `health_metadata()` response (spec §6.1).
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Names (for healthy) or directory hashes (for corrupt/empty) of
    /// collections in each state.
    pub healthy: Vec<String>,
    /// Ditto for corrupt collections — these have been moved to
    /// `.quarantine/` by the time the report is returned.
    pub corrupt: Vec<String>,
    /// Ditto for empty collections — left in place.
    pub empty: Vec<String>,
    /// When this scan ran.
    pub last_check: DateTime<Utc>,
    /// How long the scan took.
    pub duration: Duration,
    /// Free-form per-collection detail (e.g. quarantine destination path).
    pub details: BTreeMap<String, String>,
}

impl HealthReport {
    /// `"degraded"` if any collection was found corrupt this scan (or a
    /// prior one — callers should track `quarantined_total` separately
    /// if they want a sticky degraded state), else `"ok"` (spec §6.2:
    /// "HTTP health: ok (200) vs degraded (503) derived solely from the
    /// quarantine/corrupt counts").
    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.corrupt.is_empty() {
            "ok"
        } else {
            "degraded"
        }
    }
}
