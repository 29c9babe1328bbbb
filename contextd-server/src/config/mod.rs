//! `contextd-config`: the vectorstore/telemetry/folding/distiller
//! configuration schema (spec §6.4) and its TOML loader (spec §10.4).

mod loader;
mod types;

pub use loader::load;
pub use types::{
    Config, DistillerSettings, EmbeddedConfig, FallbackSettings, FoldingSettings, MetricsConfig,
    Provider, RateLimitSettings, RemoteConfigSection, SamplingConfig, SchedulerSettings,
    TelemetryConfig, VectorStoreConfig,
};
