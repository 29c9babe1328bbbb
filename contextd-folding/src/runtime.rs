//! The `FoldingRuntime`: per-session branch lifecycle, budget accounting,
//! and scrub-on-return (spec §4.8, §3.6).
//!
//! Holds one mutex over a flat `{sessions, branches}` table rather than a
//! mutex-per-session map, so a create/return/status call never needs to
//! take two locks in some order — the same "single lock, short critical
//! section" shape `contextd-fallback::CircuitBreaker` uses.

use crate::branch::{Branch, BranchSnapshot, DEFAULT_BRANCH_TIMEOUT};
use crate::error::{Error, Result};
use crate::memory_source::{select_within_budget, InjectedMemory, MemorySource, NoMemoryInjection, DEFAULT_INJECTION_FRACTION};
use crate::rate_limiter::TokenBucket;
use crate::state::BranchState;
use chrono::Utc;
use contextd_core::{Scrubber, TenantContext};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Maximum branch description length (spec §4.8.2), in bytes.
pub const MAX_DESCRIPTION_BYTES: usize = 200;
/// Maximum branch prompt length (spec §4.8.2), in bytes.
pub const MAX_PROMPT_BYTES: usize = 2000;
/// Maximum branch return-message length (spec §4.8.3), in bytes.
pub const MAX_RETURN_MESSAGE_BYTES: usize = 10_000;
/// Allowed branch budget range (spec §4.8.2).
pub const BUDGET_RANGE: std::ops::RangeInclusive<u64> = 1..=100_000;

/// The implicit session-root branch is not reachable through
/// [`FoldingRuntime::create`] and is exempt from the per-branch budget
/// range; it carries the maximum legal budget purely so `BranchStatus`
/// renders a sensible number, and a long timeout since a session may
/// outlive any one branch's 30-minute default by a wide margin.
const ROOT_BUDGET: u64 = 100_000;
const ROOT_TIMEOUT: chrono::Duration = chrono::Duration::days(365);

/// Tunables for branch creation (spec §4.8.2, §5).
#[derive(Debug, Clone)]
pub struct FoldingConfig {
    pub max_active_branches_per_session: usize,
    pub max_nesting_depth: u8,
    pub create_rate_per_second: u32,
    pub create_burst: u32,
    pub branch_timeout: chrono::Duration,
    pub injection_fraction: f32,
}

impl Default for FoldingConfig {
    fn default() -> Self {
        Self {
            max_active_branches_per_session: 10,
            max_nesting_depth: 3,
            create_rate_per_second: 10,
            create_burst: 10,
            branch_timeout: DEFAULT_BRANCH_TIMEOUT,
            injection_fraction: DEFAULT_INJECTION_FRACTION,
        }
    }
}

/// `BranchCreate` input (spec §4.8.2).
#[derive(Debug, Clone)]
pub struct BranchCreateRequest {
    pub session_id: String,
    pub description: String,
    pub prompt: String,
    pub budget: u64,
    /// Defaults to the session's (implicit) root branch.
    pub parent_id: Option<String>,
}

/// `BranchCreate` output.
#[derive(Debug, Clone)]
pub struct BranchCreated {
    pub branch_id: String,
    pub injected: Vec<InjectedMemory>,
}

/// `BranchReturn` input (spec §4.8.3).
#[derive(Debug, Clone)]
pub struct BranchReturnRequest {
    pub branch_id: String,
    pub message: String,
}

/// `BranchReturn` output.
#[derive(Debug, Clone)]
pub struct BranchReturned {
    pub message: String,
    pub used: u64,
    /// Set when the branch was already `BudgetExhausted`: `message`
    /// carries a `[PARTIAL]` marker rather than the caller's verbatim text.
    pub partial: bool,
}

/// Result of recording usage against a branch.
#[derive(Debug, Clone, Copy)]
pub struct BranchUsage {
    pub used: u64,
    pub remaining: u64,
    pub exhausted: bool,
}

struct SessionMeta {
    tenant_id: String,
    root_id: String,
    create_bucket: TokenBucket,
    root_cancellation: CancellationToken,
}

#[derive(Default)]
struct State {
    sessions: HashMap<String, SessionMeta>,
    branches: HashMap<String, Branch>,
}

/// Owns every session's branch tree for this process.
pub struct FoldingRuntime {
    state: Mutex<State>,
    scrubber: Arc<dyn Scrubber>,
    memory_source: Arc<dyn MemorySource>,
    config: FoldingConfig,
}

impl FoldingRuntime {
    #[must_use]
    pub fn new(scrubber: Arc<dyn Scrubber>, config: FoldingConfig) -> Self {
        Self::with_memory_source(scrubber, Arc::new(NoMemoryInjection), config)
    }

    #[must_use]
    pub fn with_memory_source(
        scrubber: Arc<dyn Scrubber>,
        memory_source: Arc<dyn MemorySource>,
        config: FoldingConfig,
    ) -> Self {
        Self {
            state: Mutex::new(State::default()),
            scrubber,
            memory_source,
            config,
        }
    }

    /// `BranchCreate` (spec §4.8.2). Lazily materializes the session's
    /// root branch on first use.
    pub fn create(&self, tenant: &TenantContext, req: BranchCreateRequest) -> Result<BranchCreated> {
        if req.session_id.is_empty() {
            return Err(Error::MissingSessionId);
        }
        validate_description(&req.description)?;
        validate_prompt_and_budget(&req.prompt, req.budget)?;

        let mut state = self.state.lock();

        if !state.sessions.contains_key(&req.session_id) {
            let (meta, root) = new_session(&req.session_id, tenant.tenant_id(), &self.config);
            state.branches.insert(root.id.clone(), root);
            state.sessions.insert(req.session_id.clone(), meta);
        }

        let meta = state
            .sessions
            .get_mut(&req.session_id)
            .expect("just inserted or already present");
        if meta.tenant_id != tenant.tenant_id() {
            return Err(Error::Unauthorized(req.session_id.clone()));
        }
        if !meta.create_bucket.try_consume() {
            return Err(Error::RateLimitExceeded(req.session_id.clone()));
        }

        let parent_id = req.parent_id.clone().unwrap_or_else(|| meta.root_id.clone());
        let (parent_depth, parent_cancellation) = {
            let parent = state
                .branches
                .get(&parent_id)
                .filter(|b| b.session_id == req.session_id)
                .ok_or_else(|| Error::BranchNotFound(parent_id.clone()))?;
            (parent.depth, parent.cancellation.clone())
        };
        let depth = parent_depth
            .checked_add(1)
            .filter(|d| *d <= self.config.max_nesting_depth)
            .ok_or(Error::MaxNestingExceeded { max: self.config.max_nesting_depth })?;

        let active_count = state
            .branches
            .values()
            .filter(|b| b.session_id == req.session_id && !b.state.is_terminal())
            .count();
        if active_count >= self.config.max_active_branches_per_session {
            return Err(Error::TooManyActiveBranches {
                session: req.session_id.clone(),
                max: self.config.max_active_branches_per_session,
            });
        }

        let cap_tokens = (req.budget as f64 * f64::from(self.config.injection_fraction)) as u64;
        let injected = if cap_tokens > 0 {
            select_within_budget(self.memory_source.relevant_memories(&req.prompt), cap_tokens)
        } else {
            Vec::new()
        };

        let id = format!("branch_{}", uuid::Uuid::new_v4());
        let now = Utc::now();
        let branch = Branch {
            id: id.clone(),
            session_id: req.session_id.clone(),
            parent_id: Some(parent_id.clone()),
            depth,
            description: req.description,
            prompt: req.prompt,
            budget: req.budget,
            used: AtomicU64::new(0),
            state: BranchState::Created.transition(BranchState::Active)?,
            children: Vec::new(),
            created_at: now,
            deadline: now + self.config.branch_timeout,
            cancellation: parent_cancellation.child_token(),
        };
        state.branches.insert(id.clone(), branch);
        if let Some(parent) = state.branches.get_mut(&parent_id) {
            parent.children.push(id.clone());
        }

        info!(branch_id = %id, session_id = %req.session_id, depth, "branch created");
        Ok(BranchCreated { branch_id: id, injected })
    }

    /// `BranchReturn` (spec §4.8.3): validates the branch is returnable,
    /// lazily retires it if its deadline has passed, scrubs the message
    /// fail-closed, and transitions it to `Completed` — or, if a prior
    /// `record_usage` call already forced `BudgetExhausted`, coerces a
    /// `[PARTIAL]` return instead of erroring.
    pub fn returns(&self, tenant: &TenantContext, req: BranchReturnRequest) -> Result<BranchReturned> {
        if req.message.is_empty() || req.message.len() > MAX_RETURN_MESSAGE_BYTES {
            return Err(Error::InvalidReturnMessage);
        }

        let mut state = self.state.lock();

        let session_id = state
            .branches
            .get(&req.branch_id)
            .map(|b| b.session_id.clone())
            .ok_or_else(|| Error::BranchNotFound(req.branch_id.clone()))?;
        let meta = state
            .sessions
            .get(&session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;
        if meta.tenant_id != tenant.tenant_id() {
            return Err(Error::Unauthorized(session_id.clone()));
        }
        if req.branch_id == meta.root_id {
            return Err(Error::CannotReturnRoot);
        }

        let has_nonterminal_children = {
            let branch = state.branches.get(&req.branch_id).expect("looked up above");
            branch
                .children
                .iter()
                .any(|c| state.branches.get(c).is_some_and(|child| !child.state.is_terminal()))
        };
        if has_nonterminal_children {
            return Err(Error::NonTerminalChildren);
        }

        let now = Utc::now();
        {
            let branch = state.branches.get_mut(&req.branch_id).expect("looked up above");
            if branch.is_overdue(now) {
                branch.state = branch.state.transition(BranchState::Failed)?;
                branch.cancellation.cancel();
            }
        }

        let report = self.scrubber.scrub(&req.message);
        if report.is_error() {
            return Err(Error::ScrubFailed);
        }
        if report.secrets_found > 0 {
            warn!(branch_id = %req.branch_id, secrets_found = report.secrets_found, "scrubbed secrets from return message");
        }

        let branch = state.branches.get_mut(&req.branch_id).expect("looked up above");
        if branch.state == BranchState::BudgetExhausted {
            let pct = completion_pct(branch);
            let message = format!("[PARTIAL] ({pct}% of budget used) {}", report.scrubbed);
            return Ok(BranchReturned { message, used: branch.used(), partial: true });
        }

        branch.state = branch.state.transition(BranchState::Completed)?;
        branch.cancellation.cancel();
        Ok(BranchReturned { message: report.scrubbed, used: branch.used(), partial: false })
    }

    /// Record `tokens` of usage against a branch, forcing `BudgetExhausted`
    /// once `used >= budget` (spec §4.8.4).
    pub fn record_usage(&self, branch_id: &str, tokens: u64) -> Result<BranchUsage> {
        let mut state = self.state.lock();
        let branch = state
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| Error::BranchNotFound(branch_id.to_string()))?;
        if branch.state.is_terminal() {
            return Err(Error::InvalidTransition { from: branch.state, to: branch.state });
        }

        let used = branch.record_usage(tokens)?;
        let exhausted = used >= branch.budget;
        if exhausted {
            branch.state = branch.state.transition(BranchState::BudgetExhausted)?;
            branch.cancellation.cancel();
            warn!(branch_id, used, budget = branch.budget, "branch budget exhausted");
        }
        Ok(BranchUsage { used, remaining: branch.remaining(), exhausted })
    }

    /// Cancel a branch's token directly, which (via `child_token`
    /// propagation) also cancels every descendant.
    pub fn cancel_branch(&self, branch_id: &str) -> Result<()> {
        let state = self.state.lock();
        let branch = state
            .branches
            .get(branch_id)
            .ok_or_else(|| Error::BranchNotFound(branch_id.to_string()))?;
        branch.cancellation.cancel();
        Ok(())
    }

    /// `BranchStatus` (spec §4.8.6): the full branch tree for a session,
    /// rooted at its implicit root branch.
    pub fn status(&self, tenant: &TenantContext, session_id: &str) -> Result<BranchSnapshot> {
        let state = self.state.lock();
        let meta = state
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        if meta.tenant_id != tenant.tenant_id() {
            return Err(Error::Unauthorized(session_id.to_string()));
        }
        Ok(build_snapshot(&state.branches, &meta.root_id))
    }
}

fn new_session(session_id: &str, tenant_id: &str, config: &FoldingConfig) -> (SessionMeta, Branch) {
    let root_cancellation = CancellationToken::new();
    let now = Utc::now();
    let root_id = format!("branch_{}", uuid::Uuid::new_v4());
    let root = Branch {
        id: root_id.clone(),
        session_id: session_id.to_string(),
        parent_id: None,
        depth: 0,
        description: "session root".to_string(),
        prompt: String::new(),
        budget: ROOT_BUDGET,
        used: AtomicU64::new(0),
        state: BranchState::Active,
        children: Vec::new(),
        created_at: now,
        deadline: now + ROOT_TIMEOUT,
        cancellation: root_cancellation.clone(),
    };
    let meta = SessionMeta {
        tenant_id: tenant_id.to_string(),
        root_id,
        create_bucket: TokenBucket::new(config.create_rate_per_second, config.create_burst),
        root_cancellation,
    };
    (meta, root)
}

fn build_snapshot(branches: &HashMap<String, Branch>, id: &str) -> BranchSnapshot {
    let branch = &branches[id];
    BranchSnapshot {
        id: branch.id.clone(),
        name: branch.description.clone(),
        budget: branch.budget,
        used: branch.used(),
        remaining: branch.remaining(),
        depth: branch.depth,
        parent_id: branch.parent_id.clone(),
        state: branch.state,
        children: branch.children.iter().map(|c| build_snapshot(branches, c)).collect(),
    }
}

fn completion_pct(branch: &Branch) -> u64 {
    if branch.budget == 0 {
        100
    } else {
        branch.used().saturating_mul(100) / branch.budget
    }
}

fn validate_description(description: &str) -> Result<()> {
    if description.is_empty() || description.len() > MAX_DESCRIPTION_BYTES {
        return Err(Error::InvalidDescription);
    }
    Ok(())
}

fn validate_prompt_and_budget(prompt: &str, budget: u64) -> Result<()> {
    if prompt.is_empty() || prompt.len() > MAX_PROMPT_BYTES || !BUDGET_RANGE.contains(&budget) {
        return Err(Error::InvalidPromptOrBudget);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_core::{FailingScrubber, PatternScrubber};

    fn tenant(id: &str) -> TenantContext {
        TenantContext::new(id, None, None).unwrap()
    }

    fn runtime() -> FoldingRuntime {
        FoldingRuntime::new(Arc::new(PatternScrubber::default()), FoldingConfig::default())
    }

    fn create_req(session: &str) -> BranchCreateRequest {
        BranchCreateRequest {
            session_id: session.to_string(),
            description: "investigate flaky test".to_string(),
            prompt: "why is TestFoo flaky?".to_string(),
            budget: 1000,
            parent_id: None,
        }
    }

    #[test]
    fn first_branch_becomes_a_child_of_the_implicit_root() {
        let rt = runtime();
        let t = tenant("acme");
        let created = rt.create(&t, create_req("s1")).unwrap();

        let snapshot = rt.status(&t, "s1").unwrap();
        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.children[0].id, created.branch_id);
        assert_eq!(snapshot.children[0].depth, 1);
    }

    #[test]
    fn second_session_with_different_tenant_is_isolated() {
        let rt = runtime();
        rt.create(&tenant("acme"), create_req("s1")).unwrap();

        let err = rt.create(&tenant("globex"), create_req("s1")).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn nesting_beyond_the_configured_max_is_rejected() {
        let rt = FoldingRuntime::new(
            Arc::new(PatternScrubber::default()),
            FoldingConfig { max_nesting_depth: 1, ..Default::default() },
        );
        let t = tenant("acme");
        let first = rt.create(&t, create_req("s1")).unwrap();

        let mut nested = create_req("s1");
        nested.parent_id = Some(first.branch_id);
        let err = rt.create(&t, nested).unwrap_err();
        assert!(matches!(err, Error::MaxNestingExceeded { max: 1 }));
    }

    #[test]
    fn active_branch_cap_is_enforced_per_session() {
        let rt = FoldingRuntime::new(
            Arc::new(PatternScrubber::default()),
            FoldingConfig { max_active_branches_per_session: 1, create_burst: 100, ..Default::default() },
        );
        let t = tenant("acme");
        rt.create(&t, create_req("s1")).unwrap();
        let err = rt.create(&t, create_req("s1")).unwrap_err();
        assert!(matches!(err, Error::TooManyActiveBranches { .. }));
    }

    #[test]
    fn create_rate_limit_rejects_bursts_past_the_configured_burst_size() {
        let rt = FoldingRuntime::new(
            Arc::new(PatternScrubber::default()),
            FoldingConfig { create_burst: 1, max_active_branches_per_session: 100, ..Default::default() },
        );
        let t = tenant("acme");
        rt.create(&t, create_req("s1")).unwrap();
        let err = rt.create(&t, create_req("s1")).unwrap_err();
        assert!(matches!(err, Error::RateLimitExceeded(_)));
    }

    #[test]
    fn returning_the_root_branch_is_rejected() {
        let rt = runtime();
        let t = tenant("acme");
        rt.create(&t, create_req("s1")).unwrap();
        let snapshot = rt.status(&t, "s1").unwrap();

        let err = rt
            .returns(&t, BranchReturnRequest { branch_id: snapshot.id, message: "done".to_string() })
            .unwrap_err();
        assert!(matches!(err, Error::CannotReturnRoot));
    }

    #[test]
    fn branch_with_active_children_cannot_be_returned() {
        let rt = runtime();
        let t = tenant("acme");
        let parent = rt.create(&t, create_req("s1")).unwrap();
        let mut child_req = create_req("s1");
        child_req.parent_id = Some(parent.branch_id.clone());
        rt.create(&t, child_req).unwrap();

        let err = rt
            .returns(&t, BranchReturnRequest { branch_id: parent.branch_id, message: "done".to_string() })
            .unwrap_err();
        assert!(matches!(err, Error::NonTerminalChildren));
    }

    #[test]
    fn a_clean_return_scrubs_the_message_and_completes_the_branch() {
        let rt = runtime();
        let t = tenant("acme");
        let created = rt.create(&t, create_req("s1")).unwrap();

        let result = rt
            .returns(
                &t,
                BranchReturnRequest {
                    branch_id: created.branch_id.clone(),
                    message: "fixed by using sk-abcdefghijklmnopqrstuvwxyzabcdefghijklmnop".to_string(),
                },
            )
            .unwrap();
        assert!(!result.partial);
        assert!(!result.message.contains("sk-abcdefghijklmnopqrstuvwxyzabcdefghijklmnop"));

        let snapshot = rt.status(&t, "s1").unwrap();
        assert_eq!(snapshot.children[0].state, BranchState::Completed);
    }

    #[test]
    fn failing_scrubber_leaves_the_branch_active() {
        let rt = FoldingRuntime::new(Arc::new(FailingScrubber), FoldingConfig::default());
        let t = tenant("acme");
        let created = rt.create(&t, create_req("s1")).unwrap();

        let err = rt
            .returns(&t, BranchReturnRequest { branch_id: created.branch_id.clone(), message: "done".to_string() })
            .unwrap_err();
        assert!(matches!(err, Error::ScrubFailed));

        let snapshot = rt.status(&t, "s1").unwrap();
        assert_eq!(snapshot.children[0].state, BranchState::Active);
    }

    #[test]
    fn exhausting_budget_forces_the_branch_terminal_and_coerces_a_partial_return() {
        let rt = runtime();
        let t = tenant("acme");
        let created = rt.create(&t, create_req("s1")).unwrap();

        let usage = rt.record_usage(&created.branch_id, 1000).unwrap();
        assert!(usage.exhausted);

        let result = rt
            .returns(&t, BranchReturnRequest { branch_id: created.branch_id, message: "almost done".to_string() })
            .unwrap();
        assert!(result.partial);
        assert!(result.message.starts_with("[PARTIAL]"));
    }

    #[test]
    fn cancelling_a_branch_also_cancels_its_children() {
        let rt = runtime();
        let t = tenant("acme");
        let parent = rt.create(&t, create_req("s1")).unwrap();
        let mut child_req = create_req("s1");
        child_req.parent_id = Some(parent.branch_id.clone());
        let child = rt.create(&t, child_req).unwrap();

        rt.cancel_branch(&parent.branch_id).unwrap();

        let state = rt.state.lock();
        assert!(state.branches[&child.branch_id].cancellation.is_cancelled());
    }
}
