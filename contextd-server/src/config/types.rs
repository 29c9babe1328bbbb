//! Configuration structures (spec §6.4). Field names and defaults mirror
//! the spec's YAML-flavoured prose exactly; the file format is TOML,
//! matching the teacher's `memory-cli` loader's actual choice rather than
//! the spec's wire example.

use serde::{Deserialize, Serialize};

/// Top-level configuration, aggregating one section per subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub vectorstore: VectorStoreConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub folding: FoldingSettings,
    #[serde(default)]
    pub distiller: DistillerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub provider: Provider,
    #[serde(default)]
    pub embedded: EmbeddedConfig,
    #[serde(default)]
    pub remote: RemoteConfigSection,
    #[serde(default)]
    pub fallback: FallbackSettings,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Embedded,
            embedded: EmbeddedConfig::default(),
            remote: RemoteConfigSection::default(),
            fallback: FallbackSettings::default(),
        }
    }
}

/// `vectorstore.provider`. Any value outside this set fails to deserialize,
/// which the loader surfaces as `Error::Configuration` (spec §6.4's
/// "unknown provider values are rejected at startup").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Embedded,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedConfig {
    pub path: String,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self { path: "./data/vectorstore".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteConfigSection {
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_remote_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSettings {
    #[serde(default)]
    pub enabled: bool,
    pub local_path: Option<String>,
    pub wal_path: Option<String>,
    #[serde(default = "default_true")]
    pub sync_on_connect: bool,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            local_path: None,
            wal_path: None,
            sync_on_connect: true,
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    pub endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_version")]
    pub service_version: String,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
            service_version: default_service_version(),
            sampling: SamplingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "contextd".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_sampling_rate")]
    pub rate: f32,
    #[serde(default = "default_true")]
    pub always_on_errors: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { rate: default_sampling_rate(), always_on_errors: true }
    }
}

fn default_sampling_rate() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, export_interval_secs: default_export_interval_secs() }
    }
}

fn default_export_interval_secs() -> u64 {
    60
}

/// `folding.*` (spec §6.4). Named `FoldingSettings` rather than
/// `FoldingConfig` to avoid colliding with `contextd_folding::FoldingConfig`,
/// which this section is converted into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldingSettings {
    #[serde(default = "default_max_depth")]
    pub max_depth: u8,
    #[serde(default = "default_max_concurrent_branches")]
    pub max_concurrent_branches: usize,
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
    #[serde(default = "default_budget")]
    pub default_budget: u64,
    #[serde(default = "default_max_budget")]
    pub max_budget: u64,
}

impl Default for FoldingSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_concurrent_branches: default_max_concurrent_branches(),
            rate_limits: RateLimitSettings::default(),
            default_budget: default_budget(),
            max_budget: default_max_budget(),
        }
    }
}

fn default_max_depth() -> u8 {
    3
}

fn default_max_concurrent_branches() -> usize {
    10
}

fn default_budget() -> u64 {
    1_000
}

fn default_max_budget() -> u64 {
    100_000
}

/// Creation/return/status rate limits (requests per second). Only
/// `create` is wired to `contextd_folding::FoldingConfig` today — `return`
/// and `status` are recognised and round-tripped so a config file written
/// against the full spec schema still loads, but the folding runtime
/// itself only rate-limits branch creation (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_create_rate")]
    pub create: u32,
    #[serde(rename = "return", default = "default_return_rate")]
    pub return_: u32,
    #[serde(default = "default_status_rate")]
    pub status: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            create: default_create_rate(),
            return_: default_return_rate(),
            status: default_status_rate(),
        }
    }
}

fn default_create_rate() -> u32 {
    10
}

fn default_return_rate() -> u32 {
    20
}

fn default_status_rate() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistillerSettings {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    pub max_clusters_per_run: Option<usize>,
    #[serde(default = "default_consolidation_window_secs")]
    pub consolidation_window_secs: u64,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Tenant the background scheduler runs consolidation for (spec
    /// §4.7.5's 6h tick has no per-call tenant to draw from, unlike the
    /// on-demand `memory_consolidate` operation). Absent disables the
    /// background tick; on-demand consolidation is unaffected.
    pub scheduled_tenant: Option<String>,
}

impl Default for DistillerSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_clusters_per_run: None,
            consolidation_window_secs: default_consolidation_window_secs(),
            scheduler: SchedulerSettings::default(),
            scheduled_tenant: None,
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.80
}

fn default_consolidation_window_secs() -> u64 {
    24 * 60 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_scheduler_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { interval_secs: default_scheduler_interval_secs() }
    }
}

fn default_scheduler_interval_secs() -> u64 {
    6 * 60 * 60
}
