//! Background 6h-tick scheduler driving `ConsolidateAll` (spec §4.7.5).
//!
//! Adapted from `contextd_fallback::HealthMonitor`'s spawn/stop shape
//! (`memory-core/src/sync/synchronizer.rs`'s periodic-sync loop, one layer
//! removed), but with stricter lifecycle rules than that monitor: starting
//! twice is an error rather than a silent no-op, and stopping cancels a
//! root `CancellationToken` and then awaits the task's `JoinHandle` so the
//! in-flight tick drains instead of being aborted mid-flight.

use crate::orchestrator::{ConsolidateOptions, Distiller};
use contextd_core::{EmbeddingProvider, Error, Result, VectorStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default tick interval (spec §4.7.5: "runs on a 6h schedule").
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Supplies the set of projects a tick should consolidate. Kept as a trait
/// so the scheduler doesn't need to know how projects are discovered
/// (registry lookup, config file, tenant directory listing, ...).
pub trait ProjectSource: Send + Sync {
    fn projects(&self) -> Vec<String>;
}

/// A fixed project list, for simple deployments and tests.
pub struct StaticProjects(pub Vec<String>);

impl ProjectSource for StaticProjects {
    fn projects(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_INTERVAL }
    }
}

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the distiller's background consolidation loop.
pub struct Scheduler<S, E> {
    distiller: Arc<Distiller<S, E>>,
    projects: Arc<dyn ProjectSource>,
    config: SchedulerConfig,
    running: Mutex<Option<RunningTask>>,
}

impl<S, E> Scheduler<S, E>
where
    S: VectorStore + Send + Sync + 'static,
    E: EmbeddingProvider + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(distiller: Arc<Distiller<S, E>>, projects: Arc<dyn ProjectSource>, config: SchedulerConfig) -> Self {
        Self { distiller, projects, config, running: Mutex::new(None) }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start the tick loop. Starting twice without an intervening `stop`
    /// is an error, unlike `HealthMonitor::start`'s silent no-op (spec
    /// §4.7.5: a scheduler should never run two overlapping loops).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the scheduler is already running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.running.lock();
        if guard.is_some() {
            return Err(Error::Configuration("distiller scheduler is already running".into()));
        }

        let token = CancellationToken::new();
        let child_token = token.clone();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = child_token.cancelled() => {
                        info!("distiller scheduler shutting down");
                        break;
                    }
                    () = tokio::time::sleep(this.config.interval) => {
                        this.tick().await;
                    }
                }
            }
        });

        *guard = Some(RunningTask { token, handle });
        Ok(())
    }

    /// Stop the tick loop. Idempotent: calling `stop` when not running is a
    /// no-op. Cancels the root token and awaits the task's completion, so a
    /// tick already in flight finishes before this returns (spec's
    /// concurrency model: "shutdown cancels the root and awaits completion
    /// before returning").
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        running.token.cancel();
        if let Err(e) = running.handle.await {
            error!(error = %e, "distiller scheduler task panicked");
        }
    }

    async fn tick(&self) {
        let projects: Vec<(String, ConsolidateOptions)> = self
            .projects
            .projects()
            .into_iter()
            .map(|p| (p, ConsolidateOptions::default()))
            .collect();
        if projects.is_empty() {
            return;
        }
        match self.distiller.consolidate_all(&projects).await {
            Ok(report) => {
                let consolidated: usize = report.reports.iter().map(|r| r.clusters_consolidated).sum();
                info!(
                    projects = projects.len(),
                    clusters_consolidated = consolidated,
                    failed = report.failed_projects.len(),
                    "distiller scheduled tick complete"
                );
            }
            Err(e) => error!(error = %e, "distiller scheduled tick failed for every project"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::orchestrator::ConsolidationWindows;
    use contextd_core::MockEmbeddingProvider;
    use contextd_services::MemoryService;
    use contextd_store_embedded::EmbeddedVectorStore;
    use tempfile::TempDir;

    async fn scheduler(
        interval: Duration,
    ) -> (TempDir, Arc<Scheduler<EmbeddedVectorStore, MockEmbeddingProvider>>) {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedVectorStore::open(dir.path()).await.unwrap();
        let memories = MemoryService::new(store, Arc::new(MockEmbeddingProvider::new(16)));
        let llm: Arc<dyn crate::llm::LlmClient> = Arc::new(MockLlmClient::fixed(
            "TITLE: x\nCONTENT: y\nOUTCOME: success",
        ));
        let distiller = Arc::new(Distiller::new(memories, llm, Arc::new(ConsolidationWindows::new())));
        let projects: Arc<dyn ProjectSource> = Arc::new(StaticProjects(vec!["proj-a".to_string()]));
        let sched = Arc::new(Scheduler::new(distiller, projects, SchedulerConfig { interval }));
        (dir, sched)
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let (_dir, sched) = scheduler(Duration::from_secs(3600)).await;
        sched.start().unwrap();
        assert!(sched.start().is_err());
        sched.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_a_harmless_no_op() {
        let (_dir, sched) = scheduler(Duration::from_secs(3600)).await;
        sched.stop().await;
        assert!(!sched.is_running());
    }

    #[tokio::test]
    async fn stop_clears_running_state_and_allows_restart() {
        let (_dir, sched) = scheduler(Duration::from_secs(3600)).await;
        sched.start().unwrap();
        assert!(sched.is_running());
        sched.stop().await;
        assert!(!sched.is_running());
        sched.start().unwrap();
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fires_on_schedule() {
        let (_dir, sched) = scheduler(Duration::from_millis(10)).await;
        sched.start().unwrap();
        tokio::time::sleep(Duration::from_millis(35)).await;
        sched.stop().await;
    }
}
