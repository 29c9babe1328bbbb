//! `FOLD0xx` error taxonomy for the context-folding runtime (spec §4.8,
//! §6.2). Kept as this crate's own top-level `Error` rather than reusing
//! `contextd_core::Error` directly, the way the teacher folds
//! `RelationshipError`/`CacheError` sub-enums into module-local error
//! types (`memory-core/src/episode/relationship_errors.rs`) — storage
//! failures still flow through via `#[from] contextd_core::Error`.

/// Result type alias used throughout `contextd-folding`.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured `FOLD0xx` error (spec §4.8, §6.2).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("FOLD001: session_id is required")]
    MissingSessionId,

    #[error("FOLD002: description must be 1..=200 characters")]
    InvalidDescription,

    #[error("FOLD003: prompt must be 1..=2000 characters, budget must be in 1..=100000")]
    InvalidPromptOrBudget,

    #[error("FOLD004: nesting depth would exceed the maximum of {max}")]
    MaxNestingExceeded { max: u8 },

    #[error("FOLD005: invalid state transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: crate::state::BranchState,
        to: crate::state::BranchState,
    },

    #[error("FOLD006: cannot return the session root branch")]
    CannotReturnRoot,

    #[error("FOLD007: branch has one or more non-terminal children")]
    NonTerminalChildren,

    #[error("FOLD008: branch not found: {0}")]
    BranchNotFound(String),

    #[error("FOLD009: session not found: {0}")]
    SessionNotFound(String),

    #[error("FOLD010: return message must be 1..=10000 characters")]
    InvalidReturnMessage,

    #[error("FOLD011: budget accounting overflowed")]
    BudgetOverflow,

    #[error("FOLD012: branch creation rate limit exceeded for session {0}")]
    RateLimitExceeded(String),

    #[error("FOLD013: session {session} already has {max} active branches")]
    TooManyActiveBranches { session: String, max: usize },

    #[error("FOLD014: message scrubbing failed; branch left active")]
    ScrubFailed,

    #[error("FOLD022: session {0} is not owned by the caller's tenant")]
    Unauthorized(String),

    /// A lower-layer storage/tenant error (memory injection, tenant
    /// validation), folded in unchanged.
    #[error(transparent)]
    Storage(#[from] contextd_core::Error),
}

impl Error {
    /// Stable structured code, `FOLD0xx` for every folding-specific
    /// variant, the wrapped error's own code for `Storage`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingSessionId => "FOLD001",
            Error::InvalidDescription => "FOLD002",
            Error::InvalidPromptOrBudget => "FOLD003",
            Error::MaxNestingExceeded { .. } => "FOLD004",
            Error::InvalidTransition { .. } => "FOLD005",
            Error::CannotReturnRoot => "FOLD006",
            Error::NonTerminalChildren => "FOLD007",
            Error::BranchNotFound(_) => "FOLD008",
            Error::SessionNotFound(_) => "FOLD009",
            Error::InvalidReturnMessage => "FOLD010",
            Error::BudgetOverflow => "FOLD011",
            Error::RateLimitExceeded(_) => "FOLD012",
            Error::TooManyActiveBranches { .. } => "FOLD013",
            Error::ScrubFailed => "FOLD014",
            Error::Unauthorized(_) => "FOLD022",
            Error::Storage(e) => e.code(),
        }
    }

    /// Mirrors `contextd_core::Error::is_recoverable`: only a wrapped
    /// storage error can plausibly be retried, never a validation or
    /// state-machine failure.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Storage(e) if e.is_recoverable())
    }
}
