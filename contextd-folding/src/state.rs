//! Branch lifecycle state machine (spec §3.6, §4.8.1).

use crate::error::{Error, Result};

/// A branch's lifecycle state. Terminal states (`Completed`, `Failed`,
/// `BudgetExhausted`) are absorbing — no transition out of them is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Created,
    Active,
    Suspended,
    Completed,
    Failed,
    BudgetExhausted,
}

impl BranchState {
    /// Whether this state accepts no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, BranchState::Completed | BranchState::Failed | BranchState::BudgetExhausted)
    }

    /// Validate `self -> next` against the allowed transition set (spec
    /// §4.8.1: `Created→Active`, `Active↔Suspended`,
    /// `Active→{Completed, Failed, BudgetExhausted}`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for any other pair.
    pub fn transition(self, next: BranchState) -> Result<BranchState> {
        let allowed = matches!(
            (self, next),
            (BranchState::Created, BranchState::Active)
                | (BranchState::Active, BranchState::Suspended)
                | (BranchState::Suspended, BranchState::Active)
                | (BranchState::Active, BranchState::Completed)
                | (BranchState::Active, BranchState::Failed)
                | (BranchState::Active, BranchState::BudgetExhausted)
                | (BranchState::Suspended, BranchState::Failed)
                | (BranchState::Suspended, BranchState::BudgetExhausted)
        );
        if allowed {
            Ok(next)
        } else {
            Err(Error::InvalidTransition { from: self, to: next })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_to_active_is_allowed() {
        assert_eq!(BranchState::Created.transition(BranchState::Active).unwrap(), BranchState::Active);
    }

    #[test]
    fn active_and_suspended_interleave() {
        assert!(BranchState::Active.transition(BranchState::Suspended).is_ok());
        assert!(BranchState::Suspended.transition(BranchState::Active).is_ok());
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        assert!(BranchState::Completed.transition(BranchState::Active).is_err());
        assert!(BranchState::Failed.transition(BranchState::Suspended).is_err());
        assert!(BranchState::BudgetExhausted.transition(BranchState::Completed).is_err());
    }

    #[test]
    fn created_cannot_skip_straight_to_completed() {
        assert!(BranchState::Created.transition(BranchState::Completed).is_err());
    }

    #[test]
    fn is_terminal_matches_absorbing_states() {
        assert!(BranchState::Completed.is_terminal());
        assert!(BranchState::Failed.is_terminal());
        assert!(BranchState::BudgetExhausted.is_terminal());
        assert!(!BranchState::Active.is_terminal());
        assert!(!BranchState::Suspended.is_terminal());
        assert!(!BranchState::Created.is_terminal());
    }
}
