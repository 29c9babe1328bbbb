//! Per-session context-folding runtime (C8, spec §3.6, §4.8): branch
//! lifecycle, budget accounting, cancellation propagation, and
//! scrub-on-return, addressed by `branch_id` within a `session_id`.

pub mod branch;
pub mod error;
pub mod memory_source;
pub mod rate_limiter;
pub mod runtime;
pub mod state;

pub use branch::{Branch, BranchSnapshot, DEFAULT_BRANCH_TIMEOUT};
pub use error::{Error, Result};
pub use memory_source::{select_within_budget, InjectedMemory, MemorySource, NoMemoryInjection, DEFAULT_INJECTION_FRACTION};
pub use rate_limiter::TokenBucket;
pub use runtime::{
    BranchCreateRequest, BranchCreated, BranchReturnRequest, BranchReturned, BranchUsage, FoldingConfig,
    FoldingRuntime, BUDGET_RANGE, MAX_DESCRIPTION_BYTES, MAX_PROMPT_BYTES, MAX_RETURN_MESSAGE_BYTES,
};
pub use state::BranchState;
