//! Fixed-time helpers for code that takes `DateTime<Utc>` as an explicit
//! argument rather than calling `Utc::now()` internally (e.g.
//! `contextd_folding::Branch::is_overdue`), so deadline/overdue tests
//! never depend on wall-clock timing.

use chrono::{DateTime, Duration, Utc};

/// `now + offset`, for constructing a branch that is already overdue
/// (`fixed_time(Duration::seconds(-1))`) or comfortably not
/// (`fixed_time(Duration::hours(1))`).
#[must_use]
pub fn fixed_time(offset: Duration) -> DateTime<Utc> {
    Utc::now() + offset
}
