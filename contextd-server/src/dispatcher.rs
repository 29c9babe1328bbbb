//! Thin transport-neutral dispatcher over the tool/RPC surface (spec
//! §6.1): argument decoding and call-out only, no transport of its own —
//! this stands in for the MCP/HTTP layer the spec places out of scope.
//!
//! Every method constructs a fresh, tenant-scoped service per call
//! (`TenantIsolationStore` is cheap to build — it only holds an `Arc` to
//! the shared backend plus the tenant context), the way the teacher's
//! request handlers build a per-request repository over a shared pool
//! rather than keeping one long-lived service per tenant.

use crate::backend::Backend;
use contextd_core::{MockEmbeddingProvider, Result, SearchOptions, TenantContext};
use contextd_distiller::{ConsolidateOptions, ConsolidateReport, ConsolidationWindows, Distiller, LlmClient};
use contextd_folding::{
    BranchCreateRequest, BranchCreated, BranchReturnRequest, BranchReturned, BranchSnapshot,
    FoldingRuntime,
};
use contextd_isolation::{IsolationMode, TenantIsolationStore};
use contextd_services::{
    CheckpointRecord, CheckpointService, MemoryHit, MemoryService, Outcome, RemediationHit,
    RemediationService,
};
use std::collections::BTreeMap;
use std::sync::Arc;

type Store = TenantIsolationStore<Backend>;

/// Owns the shared backend, embedder, folding runtime, and distiller
/// wiring; exposes one method per spec §6.1 tool operation.
pub struct Dispatcher {
    backend: Arc<Backend>,
    embedder: Arc<MockEmbeddingProvider>,
    isolation_mode: IsolationMode,
    llm: Arc<dyn LlmClient>,
    windows: Arc<ConsolidationWindows>,
    folding: Arc<FoldingRuntime>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        backend: Arc<Backend>,
        embedder: Arc<MockEmbeddingProvider>,
        isolation_mode: IsolationMode,
        llm: Arc<dyn LlmClient>,
        folding: Arc<FoldingRuntime>,
    ) -> Self {
        Self {
            backend,
            embedder,
            isolation_mode,
            llm,
            windows: Arc::new(ConsolidationWindows::new()),
            folding,
        }
    }

    fn tenant_store(&self, tenant: &TenantContext) -> Store {
        TenantIsolationStore::new(Arc::clone(&self.backend), tenant.clone(), self.isolation_mode)
    }

    /// Build a tenant-scoped memory service. `pub(crate)` so `assembly`'s
    /// scheduler wiring can bind one to the config-chosen tenant without
    /// duplicating the store/embedder plumbing here.
    pub(crate) fn memory_service(&self, tenant: &TenantContext) -> MemoryService<Store, MockEmbeddingProvider> {
        MemoryService::new(self.tenant_store(tenant), Arc::clone(&self.embedder))
    }

    pub(crate) fn llm(&self) -> Arc<dyn LlmClient> {
        Arc::clone(&self.llm)
    }

    pub(crate) fn windows(&self) -> Arc<ConsolidationWindows> {
        Arc::clone(&self.windows)
    }

    fn remediation_service(&self, tenant: &TenantContext) -> RemediationService<Store, MockEmbeddingProvider> {
        RemediationService::new(self.tenant_store(tenant), Arc::clone(&self.embedder))
    }

    fn checkpoint_service(&self, tenant: &TenantContext) -> CheckpointService<Store, MockEmbeddingProvider> {
        CheckpointService::new(self.tenant_store(tenant), Arc::clone(&self.embedder))
    }

    /// `memory_record` (spec §6.1).
    pub async fn memory_record(
        &self,
        tenant: &TenantContext,
        title: impl Into<String>,
        content: impl Into<String>,
        outcome: &str,
        tags: Vec<String>,
        confidence: Option<f32>,
    ) -> Result<String> {
        let outcome = Outcome::parse(outcome)?;
        self.memory_service(tenant).record(title, content, outcome, tags, confidence).await
    }

    /// `memory_search` (spec §6.1).
    pub async fn memory_search(
        &self,
        tenant: &TenantContext,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<MemoryHit>> {
        self.memory_service(tenant).search(query, opts).await
    }

    /// `memory_feedback` (spec §6.1).
    pub async fn memory_feedback(&self, tenant: &TenantContext, id: &str, helpful: bool) -> Result<()> {
        self.memory_service(tenant).feedback(id, helpful).await
    }

    /// `memory_outcome` (spec §6.1).
    pub async fn memory_outcome(&self, tenant: &TenantContext, id: &str, succeeded: bool) -> Result<()> {
        self.memory_service(tenant).outcome(id, succeeded).await
    }

    /// `memory_consolidate` (spec §6.1, §4.7.5): on-demand consolidation
    /// for one project, independent of the background scheduler's tick.
    pub async fn memory_consolidate(
        &self,
        tenant: &TenantContext,
        project_id: &str,
        opts: ConsolidateOptions,
    ) -> Result<ConsolidateReport> {
        let memories = self.memory_service(tenant);
        let distiller = Distiller::new(memories, Arc::clone(&self.llm), Arc::clone(&self.windows));
        distiller.consolidate(project_id, &opts).await
    }

    /// `remediation_record` (spec §6.1).
    #[allow(clippy::too_many_arguments)]
    pub async fn remediation_record(
        &self,
        tenant: &TenantContext,
        project_path: impl Into<String>,
        error_msg: impl Into<String>,
        solution: impl Into<String>,
        context: Option<String>,
        patterns: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<String> {
        self.remediation_service(tenant)
            .record(project_path, error_msg, solution, context, patterns, metadata)
            .await
    }

    /// `remediation_search` (spec §6.1).
    pub async fn remediation_search(
        &self,
        tenant: &TenantContext,
        query: &str,
        project_path: Option<&str>,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<RemediationHit>> {
        self.remediation_service(tenant).search(query, project_path, limit, min_score).await
    }

    /// `checkpoint_save` (spec §6.1).
    pub async fn checkpoint_save(
        &self,
        tenant: &TenantContext,
        session_id: impl Into<String>,
        summary: impl Into<String>,
        token_count: u64,
        auto: bool,
    ) -> Result<String> {
        self.checkpoint_service(tenant).save(session_id, summary, token_count, auto).await
    }

    /// `checkpoint_list` (spec §6.1).
    pub async fn checkpoint_list(
        &self,
        tenant: &TenantContext,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<CheckpointRecord>> {
        self.checkpoint_service(tenant).list(session_id, limit).await
    }

    /// `checkpoint_resume` (spec §6.1).
    pub async fn checkpoint_resume(&self, tenant: &TenantContext, id: &str) -> Result<Option<CheckpointRecord>> {
        self.checkpoint_service(tenant).resume(id).await
    }

    /// `branch_create` (spec §6.1, §4.8). Synchronous: the folding runtime
    /// only ever locks an in-memory mutex.
    pub fn branch_create(
        &self,
        tenant: &TenantContext,
        req: BranchCreateRequest,
    ) -> contextd_folding::Result<BranchCreated> {
        self.folding.create(tenant, req)
    }

    /// `branch_return` (spec §6.1, §4.8).
    pub fn branch_return(
        &self,
        tenant: &TenantContext,
        req: BranchReturnRequest,
    ) -> contextd_folding::Result<BranchReturned> {
        self.folding.returns(tenant, req)
    }

    /// `branch_status` (spec §6.1, §4.8).
    pub fn branch_status(&self, tenant: &TenantContext, session_id: &str) -> contextd_folding::Result<BranchSnapshot> {
        self.folding.status(tenant, session_id)
    }

    /// The backend this dispatcher is wired to, for the health endpoints
    /// (`crate::health`) to read without holding a second reference.
    #[must_use]
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_distiller::MockLlmClient;
    use contextd_folding::FoldingConfig;

    async fn test_dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let (tmp, store) = test_utils::temp_embedded_store().await;
        let resilient = contextd_resilient::ResilientVectorStore::open(tmp.path(), Arc::new(store))
            .await
            .unwrap();
        let backend = Arc::new(Backend::Embedded(Arc::new(resilient)));
        let embedder = Arc::new(MockEmbeddingProvider::new(384));
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::fixed("summary"));
        let folding = Arc::new(FoldingRuntime::new(Arc::new(contextd_core::PatternScrubber), FoldingConfig::default()));
        let dispatcher = Dispatcher::new(backend, embedder, IsolationMode::Payload, llm, folding);
        (tmp, dispatcher)
    }

    #[tokio::test]
    async fn memory_record_then_search_round_trips() {
        let (_tmp, dispatcher) = test_dispatcher().await;
        let tenant = test_utils::test_tenant("acme");
        let id = dispatcher
            .memory_record(&tenant, "lesson", "always check the return value", "success", vec![], None)
            .await
            .unwrap();

        let hits = dispatcher
            .memory_search(&tenant, "check the return value", &SearchOptions::default())
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.record.id == id));
    }

    #[tokio::test]
    async fn memory_record_rejects_unknown_outcome() {
        let (_tmp, dispatcher) = test_dispatcher().await;
        let tenant = test_utils::test_tenant("acme");
        let err = dispatcher
            .memory_record(&tenant, "lesson", "content", "maybe", vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, contextd_core::Error::InvalidOutcome(_)));
    }

    #[tokio::test]
    async fn branch_create_then_status_round_trips() {
        let (_tmp, dispatcher) = test_dispatcher().await;
        let tenant = test_utils::test_tenant("acme");
        let created = dispatcher
            .branch_create(
                &tenant,
                BranchCreateRequest {
                    session_id: "session-1".into(),
                    description: "investigate flaky test".into(),
                    prompt: "why does it fail".into(),
                    budget: 1_000,
                    parent_id: None,
                },
            )
            .unwrap();

        let status = dispatcher.branch_status(&tenant, "session-1").unwrap();
        assert!(status.children.iter().any(|b| b.id == created.branch_id));
    }
}
