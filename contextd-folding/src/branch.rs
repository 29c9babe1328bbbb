//! The `Branch` record (spec §3.6) and its budget accounting (spec §4.8.4).

use crate::error::{Error, Result};
use crate::state::BranchState;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Default per-branch timeout before a non-terminal branch is forced to
/// `Failed` (spec §4.8.5).
pub const DEFAULT_BRANCH_TIMEOUT: chrono::Duration = chrono::Duration::minutes(30);

/// One node in a session's branch tree. Structural fields (`state`,
/// `children`) live behind the session-level mutex in [`crate::runtime`];
/// `used` is a free-standing atomic so usage reporting never needs that
/// lock (spec §5: "per-branch token counters are atomic").
#[derive(Debug)]
pub struct Branch {
    pub id: String,
    pub session_id: String,
    pub parent_id: Option<String>,
    pub depth: u8,
    pub description: String,
    pub prompt: String,
    pub budget: u64,
    pub used: AtomicU64,
    pub state: BranchState,
    pub children: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub cancellation: CancellationToken,
}

impl Branch {
    /// Current usage.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Remaining budget, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.used())
    }

    /// Whether reported usage has met or exceeded budget.
    #[must_use]
    pub fn is_budget_exhausted(&self) -> bool {
        self.used() >= self.budget
    }

    /// Whether this branch has run past its deadline and is still
    /// non-terminal (spec §4.8.5).
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal() && now >= self.deadline
    }

    /// Record `tokens` of additional usage, saturating rather than
    /// overflowing (spec §4.8.4: "budget overflow detection uses
    /// saturating arithmetic"). Returns the new total.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BudgetOverflow`] only if usage was already at
    /// `u64::MAX` (an unreachable state in practice, kept as a defensive
    /// signal rather than silently wrapping).
    pub fn record_usage(&self, tokens: u64) -> Result<u64> {
        let previous = self.used.fetch_add(tokens, Ordering::AcqRel);
        if previous == u64::MAX {
            return Err(Error::BudgetOverflow);
        }
        Ok(previous.saturating_add(tokens))
    }
}

/// A snapshot of one branch for `BranchStatus` (spec §4.8.6): `{name,
/// budget, used, remaining, depth, parent_id, state}` plus `children` for
/// the tree shape, where `name` is the branch's description (the spec
/// names no separate title field for a branch).
#[derive(Debug, Clone)]
pub struct BranchSnapshot {
    pub id: String,
    pub name: String,
    pub budget: u64,
    pub used: u64,
    pub remaining: u64,
    pub depth: u8,
    pub parent_id: Option<String>,
    pub state: BranchState,
    pub children: Vec<BranchSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(budget: u64) -> Branch {
        Branch {
            id: "b1".into(),
            session_id: "s1".into(),
            parent_id: None,
            depth: 0,
            description: "d".into(),
            prompt: "p".into(),
            budget,
            used: AtomicU64::new(0),
            state: BranchState::Active,
            children: Vec::new(),
            created_at: Utc::now(),
            deadline: Utc::now() + DEFAULT_BRANCH_TIMEOUT,
            cancellation: CancellationToken::new(),
        }
    }

    #[test]
    fn usage_accumulates_and_remaining_shrinks() {
        let b = branch(1000);
        b.record_usage(600).unwrap();
        assert_eq!(b.used(), 600);
        assert_eq!(b.remaining(), 400);
        assert!(!b.is_budget_exhausted());

        b.record_usage(500).unwrap();
        assert_eq!(b.used(), 1100);
        assert_eq!(b.remaining(), 0);
        assert!(b.is_budget_exhausted());
    }

    #[test]
    fn overdue_only_applies_to_non_terminal_branches() {
        let mut b = branch(100);
        b.deadline = Utc::now() - chrono::Duration::seconds(1);
        assert!(b.is_overdue(Utc::now()));
        b.state = BranchState::Completed;
        assert!(!b.is_overdue(Utc::now()));
    }
}
