//! `Consolidate`/`ConsolidateAll` orchestration and the per-project
//! consolidation window (spec §4.7.5).

use crate::clustering::{self, Cluster};
use crate::llm::LlmClient;
use crate::synthesis;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use contextd_core::{EmbeddingProvider, Error, Result, VectorStore};
use contextd_services::MemoryService;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Default consolidation window: skip a project already consolidated
/// within this period, unless `force=true` (spec §4.7.5).
pub const DEFAULT_CONSOLIDATION_WINDOW: ChronoDuration = ChronoDuration::hours(24);

/// Parameters for a single `Consolidate` call.
#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    pub threshold: Option<f32>,
    pub max_clusters: Option<usize>,
    pub dry_run: bool,
    pub force: bool,
}

/// One cluster's outcome within a `Consolidate` run.
#[derive(Debug, Clone)]
pub enum ClusterOutcome {
    Committed { new_memory_id: String, source_ids: Vec<String> },
    Planned { source_ids: Vec<String> },
    Failed { source_ids: Vec<String>, error: String },
}

/// Result of a single `Consolidate` call (spec §6.1's `memory_consolidate`
/// response shape).
#[derive(Debug, Clone, Default)]
pub struct ConsolidateReport {
    pub project: String,
    pub clusters_consolidated: usize,
    pub source_memories_archived: usize,
    pub new_memories_created: usize,
    pub errors: Vec<String>,
    pub clusters: Vec<ClusterOutcome>,
}

/// Aggregate result of a `ConsolidateAll` call.
#[derive(Debug, Clone, Default)]
pub struct ConsolidateAllReport {
    pub reports: Vec<ConsolidateReport>,
    pub failed_projects: Vec<(String, String)>,
}

/// Tracks the last-consolidated timestamp per project (spec §4.7.5's
/// "per-project consolidation window"), guarded the way the teacher's
/// `StorageSynchronizer` guards its single `SyncState` field.
#[derive(Default)]
pub struct ConsolidationWindows {
    last_run: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl ConsolidationWindows {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_within_window(&self, project: &str, window: ChronoDuration) -> bool {
        self.last_run
            .lock()
            .get(project)
            .is_some_and(|last| Utc::now() - *last < window)
    }

    fn record_run(&self, project: &str) {
        self.last_run.lock().insert(project.to_string(), Utc::now());
    }
}

/// Runs clustering, synthesis, and commit for a single project's
/// `MemoryService` (spec §4.7.1–§4.7.4).
pub struct Distiller<S, E> {
    memories: MemoryService<S, E>,
    llm: Arc<dyn LlmClient>,
    windows: Arc<ConsolidationWindows>,
}

impl<S: VectorStore, E: EmbeddingProvider> Distiller<S, E> {
    #[must_use]
    pub fn new(memories: MemoryService<S, E>, llm: Arc<dyn LlmClient>, windows: Arc<ConsolidationWindows>) -> Self {
        Self { memories, llm, windows }
    }

    /// `Consolidate(project, opts)` (spec §4.7.5).
    pub async fn consolidate(&self, project: &str, opts: &ConsolidateOptions) -> Result<ConsolidateReport> {
        if !opts.force && self.windows.is_within_window(project, DEFAULT_CONSOLIDATION_WINDOW) {
            info!(project, "skipping consolidation: within consolidation window");
            return Ok(ConsolidateReport { project: project.to_string(), ..ConsolidateReport::default() });
        }

        let threshold = opts.threshold.unwrap_or(clustering::DEFAULT_THRESHOLD);
        let memories = self.memories.list_active_with_embeddings().await?;
        let mut clusters = clustering::cluster_by_similarity(&memories, threshold);
        if let Some(max) = opts.max_clusters {
            clusters.truncate(max);
        }

        let mut report = ConsolidateReport { project: project.to_string(), ..ConsolidateReport::default() };
        for cluster in clusters {
            let source_ids: Vec<String> = cluster.members.iter().map(|m| m.id.clone()).collect();
            match self.process_cluster(&cluster, opts.dry_run).await {
                Ok(ClusterCommit::Committed(new_id)) => {
                    report.clusters_consolidated += 1;
                    report.new_memories_created += 1;
                    report.source_memories_archived += source_ids.len();
                    report.clusters.push(ClusterOutcome::Committed {
                        new_memory_id: new_id,
                        source_ids,
                    });
                }
                Ok(ClusterCommit::Planned) => {
                    report.clusters_consolidated += 1;
                    report.clusters.push(ClusterOutcome::Planned { source_ids });
                }
                Err(e) => {
                    warn!(project, error = %e, "cluster synthesis/commit failed, skipping");
                    report.errors.push(e.to_string());
                    report.clusters.push(ClusterOutcome::Failed { source_ids, error: e.to_string() });
                }
            }
        }

        if !opts.dry_run {
            self.windows.record_run(project);
        }
        Ok(report)
    }

    /// `ConsolidateAll(projects)` (spec §4.7.5): sequential, partial
    /// failure is not fatal, every-project failure is an aggregate error.
    pub async fn consolidate_all(
        &self,
        projects: &[(String, ConsolidateOptions)],
    ) -> Result<ConsolidateAllReport> {
        let mut out = ConsolidateAllReport::default();
        for (project, opts) in projects {
            match self.consolidate(project, opts).await {
                Ok(report) => out.reports.push(report),
                Err(e) => out.failed_projects.push((project.clone(), e.to_string())),
            }
        }
        if projects.is_empty() {
            return Ok(out);
        }
        if out.failed_projects.len() == projects.len() {
            return Err(Error::WriteFailed(format!(
                "all {} projects failed consolidation",
                projects.len()
            )));
        }
        Ok(out)
    }

    async fn process_cluster(&self, cluster: &Cluster, dry_run: bool) -> Result<ClusterCommit> {
        let prompt = synthesis::build_prompt(cluster);
        let raw = self.llm.complete(&prompt).await?;
        let synthesized = synthesis::parse_response(&raw)?;
        let merged_confidence = synthesis::merged_confidence(&cluster.members)?;

        if dry_run {
            return Ok(ClusterCommit::Planned);
        }

        let content = format!(
            "{}\n\n{}",
            synthesized.content,
            synthesis::attribution_text(cluster.members.len())
        );
        let source_ids: Vec<String> = cluster.members.iter().map(|m| m.id.clone()).collect();
        let new_id = self
            .memories
            .record_consolidated(
                synthesized.title,
                content,
                synthesized.outcome,
                synthesized.tags,
                merged_confidence,
                source_ids.clone(),
            )
            .await?;

        let archive_errors = self.memories.commit_consolidation(&new_id, &source_ids).await;
        for e in &archive_errors {
            warn!(new_memory_id = %new_id, error = %e, "source memory failed to archive; will be re-clustered next run");
        }

        Ok(ClusterCommit::Committed(new_id))
    }
}

enum ClusterCommit {
    Committed(String),
    Planned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use contextd_core::MockEmbeddingProvider;
    use contextd_services::Outcome;
    use contextd_store_embedded::EmbeddedVectorStore;
    use tempfile::TempDir;

    async fn distiller(
        response: &str,
    ) -> (TempDir, Distiller<EmbeddedVectorStore, MockEmbeddingProvider>) {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedVectorStore::open(dir.path()).await.unwrap();
        let memories = MemoryService::new(store, Arc::new(MockEmbeddingProvider::new(16)));
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::fixed(response));
        (dir, Distiller::new(memories, llm, Arc::new(ConsolidationWindows::new())))
    }

    const SYNTHESIS: &str =
        "TITLE: Use t.Run subtests\nCONTENT: Prefer subtests for isolation\nOUTCOME: success\nTAGS: testing";

    #[tokio::test]
    async fn consolidates_a_near_duplicate_cluster() {
        let (_dir, d) = distiller(SYNTHESIS).await;
        // Mock embeddings are deterministic per exact text; use identical
        // text for near-duplicate clustering without depending on a real
        // semantic model.
        let m1 = d.memories.record("A", "prefer t.Run subtests", Outcome::Success, vec![], Some(0.6)).await.unwrap();
        let m2 = d.memories.record("B", "prefer t.Run subtests", Outcome::Success, vec![], Some(0.5)).await.unwrap();
        let m3 = d.memories.record("C", "prefer t.Run subtests", Outcome::Success, vec![], Some(0.7)).await.unwrap();

        let report = d.consolidate("proj-a", &ConsolidateOptions { threshold: Some(0.8), ..Default::default() }).await.unwrap();
        assert_eq!(report.clusters_consolidated, 1);
        assert_eq!(report.new_memories_created, 1);
        assert_eq!(report.source_memories_archived, 3);
        assert!(matches!(report.clusters[0], ClusterOutcome::Committed { .. }));

        // The three sources are no longer active, so a second pass (ignoring
        // the window) over what remains finds nothing left to cluster.
        let remaining = d.memories.list_active_with_embeddings().await.unwrap();
        assert!(remaining.iter().all(|(m, _)| ![&m1, &m2, &m3].contains(&&m.id)));
    }

    #[tokio::test]
    async fn dry_run_does_not_commit_or_move_the_window() {
        let (_dir, d) = distiller(SYNTHESIS).await;
        d.memories.record("A", "identical text", Outcome::Success, vec![], None).await.unwrap();
        d.memories.record("B", "identical text", Outcome::Success, vec![], None).await.unwrap();

        let report = d
            .consolidate("proj-a", &ConsolidateOptions { threshold: Some(0.8), dry_run: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(report.new_memories_created, 0);
        assert!(matches!(report.clusters[0], ClusterOutcome::Planned { .. }));
        assert!(!d.windows.is_within_window("proj-a", DEFAULT_CONSOLIDATION_WINDOW));
    }

    #[tokio::test]
    async fn second_call_within_window_is_skipped_unless_forced() {
        let (_dir, d) = distiller(SYNTHESIS).await;
        d.memories.record("A", "identical text", Outcome::Success, vec![], None).await.unwrap();
        d.memories.record("B", "identical text", Outcome::Success, vec![], None).await.unwrap();

        let opts = ConsolidateOptions { threshold: Some(0.8), ..Default::default() };
        let first = d.consolidate("proj-a", &opts).await.unwrap();
        assert_eq!(first.new_memories_created, 1);

        let second = d.consolidate("proj-a", &opts).await.unwrap();
        assert_eq!(second.new_memories_created, 0);
        assert_eq!(second.clusters_consolidated, 0);

        let forced = d
            .consolidate("proj-a", &ConsolidateOptions { force: true, ..opts })
            .await
            .unwrap();
        // Sources from the first run are now archived, so nothing new clusters.
        assert_eq!(forced.clusters_consolidated, 0);
    }

    #[tokio::test]
    async fn consolidate_all_aggregates_and_is_not_fatal_on_partial_failure() {
        let (_dir, d) = distiller(SYNTHESIS).await;
        d.memories.record("A", "identical text", Outcome::Success, vec![], None).await.unwrap();
        d.memories.record("B", "identical text", Outcome::Success, vec![], None).await.unwrap();

        let projects = vec![
            ("proj-a".to_string(), ConsolidateOptions { threshold: Some(0.8), ..Default::default() }),
            ("proj-b".to_string(), ConsolidateOptions { threshold: Some(0.8), ..Default::default() }),
        ];
        let report = d.consolidate_all(&projects).await.unwrap();
        assert_eq!(report.reports.len(), 2);
        assert!(report.failed_projects.is_empty());
    }
}
