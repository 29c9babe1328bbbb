//! Builds a [`Backend`] from a loaded [`Config`] (spec §6.4's
//! `vectorstore` section), choosing among the three tagged compositions.

use crate::backend::{Backend, RemotePinger};
use crate::config::{Config, Provider};
use crate::dispatcher::Dispatcher;
use contextd_core::{Error, MockEmbeddingProvider, PatternScrubber, Result, Scrubber, TenantContext};
use contextd_distiller::{
    Distiller, LlmClient, LlmConfig, MockLlmClient, OpenAiCompatibleClient, Scheduler, SchedulerConfig,
    StaticProjects,
};
use contextd_fallback::{FallbackVectorStore, DEFAULT_PING_INTERVAL};
use contextd_folding::{FoldingConfig, FoldingRuntime};
use contextd_isolation::{IsolationMode, TenantIsolationStore};
use contextd_resilient::{ResilientVectorStore, DEFAULT_SCAN_INTERVAL};
use contextd_store_embedded::EmbeddedVectorStore;
use contextd_store_remote::{RemoteConfig, RemoteVectorStore};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Project id the scheduled consolidation tick uses, absent a per-project
/// registry in spec §6.4's config schema — memories carry no `project_id`
/// of their own (only remediations do), so one default window per tenant
/// is the natural granularity for the automatic path.
const SCHEDULED_PROJECT: &str = "default";

type SchedulerHandle = Arc<Scheduler<TenantIsolationStore<Backend>, MockEmbeddingProvider>>;

/// Embedding dimension for the built-in mock provider (spec §3.1's
/// collection default). No real embedding provider is configurable via
/// spec §6.4 — `contextd-core` ships only the deterministic mock one.
const EMBEDDING_DIMENSION: usize = 384;

/// Environment variable carrying an OpenAI-compatible API key. When unset,
/// consolidation synthesis falls back to a fixed mock completion so
/// `memory_consolidate` still runs end-to-end in dev/test environments.
const ENV_LLM_API_KEY: &str = "CONTEXTD_LLM_API_KEY";

/// Build the fully-wired [`Dispatcher`] for `config`: opens the storage
/// backend, selects an LLM client, and constructs the folding runtime.
///
/// # Errors
///
/// Propagates backend-open and LLM-client-construction errors.
pub async fn build_dispatcher(config: &Config) -> Result<Dispatcher> {
    let backend = open_backend(config).await?;
    let embedder = Arc::new(MockEmbeddingProvider::new(EMBEDDING_DIMENSION));
    let llm = build_llm_client()?;
    let folding = Arc::new(FoldingRuntime::new(Arc::new(PatternScrubber), folding_config(config)));
    Ok(Dispatcher::new(backend, embedder, IsolationMode::Payload, llm, folding))
}

/// Build and start the background consolidation scheduler (spec §4.7.5)
/// for `config.distiller.scheduled_tenant`, if one is set. Returns `None`
/// when the field is absent — the scheduler's `Distiller<S, E>` is bound
/// to one tenant's `MemoryService`, so there is no tenant-generic way to
/// run it the way the per-call `memory_consolidate` operation does.
///
/// # Errors
///
/// Propagates [`TenantContext::new`]'s validation error for a malformed
/// `scheduled_tenant`, or [`Scheduler::start`]'s already-running error.
pub fn start_scheduler(config: &Config, dispatcher: &Dispatcher) -> Result<Option<SchedulerHandle>> {
    let Some(tenant_id) = config.distiller.scheduled_tenant.clone() else {
        return Ok(None);
    };
    let tenant = TenantContext::new(tenant_id, None, None)?;
    let memories = dispatcher.memory_service(&tenant);
    let distiller = Arc::new(Distiller::new(memories, dispatcher.llm(), dispatcher.windows()));
    let projects = Arc::new(StaticProjects(vec![SCHEDULED_PROJECT.to_string()]));
    let scheduler_config = SchedulerConfig {
        interval: Duration::from_secs(config.distiller.scheduler.interval_secs),
    };
    let scheduler = Arc::new(Scheduler::new(distiller, projects, scheduler_config));
    scheduler.start()?;
    Ok(Some(scheduler))
}

fn build_llm_client() -> Result<Arc<dyn LlmClient>> {
    match std::env::var(ENV_LLM_API_KEY) {
        Ok(api_key) if !api_key.is_empty() => {
            let client = OpenAiCompatibleClient::new(LlmConfig { api_key, ..LlmConfig::default() })?;
            Ok(Arc::new(client))
        }
        _ => Ok(Arc::new(MockLlmClient::fixed(
            "consolidated summary unavailable: no LLM client configured",
        ))),
    }
}

fn folding_config(config: &Config) -> FoldingConfig {
    let settings = &config.folding;
    FoldingConfig {
        max_active_branches_per_session: settings.max_concurrent_branches,
        max_nesting_depth: settings.max_depth,
        create_rate_per_second: settings.rate_limits.create,
        create_burst: settings.rate_limits.create,
        ..FoldingConfig::default()
    }
}

/// Open the storage backend described by `config`, starting any
/// background tasks the chosen composition needs (resilient's quarantine
/// re-scan, fallback's health monitor and sync task).
///
/// # Errors
///
/// Returns [`Error::Configuration`] for a malformed `remote.endpoint`, or
/// propagates whatever error the chosen backend's `open` returns.
pub async fn open_backend(config: &Config) -> Result<Arc<Backend>> {
    let vs = &config.vectorstore;
    if vs.fallback.enabled {
        return Ok(Arc::new(Backend::Fallback(open_fallback(config).await?)));
    }
    match vs.provider {
        Provider::Embedded => {
            let local = EmbeddedVectorStore::open(&vs.embedded.path).await?;
            let resilient = Arc::new(ResilientVectorStore::open(&vs.embedded.path, Arc::new(local)).await?);
            resilient.start_background_scan(DEFAULT_SCAN_INTERVAL);
            Ok(Arc::new(Backend::Embedded(resilient)))
        }
        Provider::Remote => {
            let remote = Arc::new(open_remote(config)?);
            Ok(Arc::new(Backend::Remote(remote)))
        }
    }
}

fn open_remote(config: &Config) -> Result<RemoteVectorStore> {
    let remote_cfg = &config.vectorstore.remote;
    let endpoint = remote_cfg
        .endpoint
        .as_deref()
        .ok_or_else(|| Error::Configuration("vectorstore.remote.endpoint is required".into()))?;
    let url = Url::parse(endpoint)
        .map_err(|e| Error::Configuration(format!("vectorstore.remote.endpoint: {e}")))?;
    let remote_config = RemoteConfig::new(
        url,
        Duration::from_secs(remote_cfg.timeout_secs),
        remote_cfg.auth_token.clone(),
    )?;
    RemoteVectorStore::new(remote_config)
}

async fn open_fallback(
    config: &Config,
) -> Result<Arc<FallbackVectorStore<RemoteVectorStore, ResilientVectorStore<EmbeddedVectorStore>>>> {
    let fallback_cfg = &config.vectorstore.fallback;
    let local_path = fallback_cfg
        .local_path
        .clone()
        .unwrap_or_else(|| format!("{}/fallback-local", config.vectorstore.embedded.path));
    let wal_path = fallback_cfg
        .wal_path
        .clone()
        .unwrap_or_else(|| format!("{}/fallback-wal", config.vectorstore.embedded.path));

    let remote = Arc::new(open_remote(config)?);
    let local_inner = EmbeddedVectorStore::open(&local_path).await?;
    let local = Arc::new(ResilientVectorStore::open(&local_path, Arc::new(local_inner)).await?);
    local.start_background_scan(DEFAULT_SCAN_INTERVAL);

    let scrubber: Arc<dyn Scrubber> = Arc::new(PatternScrubber);
    let ping_interval = if fallback_cfg.health_check_interval_secs == 0 {
        DEFAULT_PING_INTERVAL
    } else {
        Duration::from_secs(fallback_cfg.health_check_interval_secs)
    };
    let store = FallbackVectorStore::open(&wal_path, Arc::clone(&remote), local, scrubber, ping_interval).await?;
    store.start(Arc::new(RemotePinger::new(remote)));
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn test_dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let (tmp, store) = test_utils::temp_embedded_store().await;
        let resilient = ResilientVectorStore::open(tmp.path(), Arc::new(store)).await.unwrap();
        let backend = Arc::new(Backend::Embedded(Arc::new(resilient)));
        let embedder = Arc::new(MockEmbeddingProvider::new(EMBEDDING_DIMENSION));
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::fixed("summary"));
        let folding = Arc::new(FoldingRuntime::new(Arc::new(PatternScrubber), FoldingConfig::default()));
        let dispatcher = Dispatcher::new(backend, embedder, IsolationMode::Payload, llm, folding);
        (tmp, dispatcher)
    }

    #[tokio::test]
    async fn no_scheduled_tenant_means_no_scheduler() {
        let (_tmp, dispatcher) = test_dispatcher().await;
        let config = Config::default();
        assert!(config.distiller.scheduled_tenant.is_none());
        let scheduler = start_scheduler(&config, &dispatcher).unwrap();
        assert!(scheduler.is_none());
    }

    #[tokio::test]
    async fn scheduled_tenant_starts_a_running_scheduler() {
        let (_tmp, dispatcher) = test_dispatcher().await;
        let mut config = Config::default();
        config.distiller.scheduled_tenant = Some("acme".to_string());

        let scheduler = start_scheduler(&config, &dispatcher).unwrap().expect("scheduler should start");
        assert!(scheduler.is_running());
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
