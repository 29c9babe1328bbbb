//! Deterministic-shape id derivation for each data type (spec §3.1).

use chrono::Utc;
use uuid::Uuid;

/// `mem_<uuid>`.
#[must_use]
pub fn memory_id() -> String {
    format!("mem_{}", Uuid::new_v4())
}

/// `rem_<uuid>`.
#[must_use]
pub fn remediation_id() -> String {
    format!("rem_{}", Uuid::new_v4())
}

/// `ck_<ts>_<rand>`, millisecond timestamp plus a short random suffix drawn
/// from a fresh UUID so no extra randomness dependency is needed.
#[must_use]
pub fn checkpoint_id() -> String {
    let ts = Utc::now().timestamp_millis();
    let rand = Uuid::new_v4().simple().to_string();
    format!("ck_{ts}_{}", &rand[..8])
}
