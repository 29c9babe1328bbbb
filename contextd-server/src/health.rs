//! `health()`/`health_metadata()` (spec §6.1, §4.4, §4.9), derived from
//! the resilient wrapper's quarantine report and (when composed) the
//! fallback wrapper's circuit breaker state. No literal HTTP layer exists
//! here — `status` is the value a transport adapter would map to 200/503
//! (spec §6.1: "HTTP 200 ok / 503 degraded").

use crate::backend::Backend;
use contextd_fallback::CircuitState;
use contextd_resilient::HealthReport;

/// `health()`'s response shape (spec §6.1).
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub status: &'static str,
    pub healthy_count: usize,
    pub corrupt_count: usize,
    pub empty_count: usize,
    pub total: usize,
    pub corrupt_ids: Vec<String>,
}

/// `health_metadata()`'s response shape (spec §6.1): the full per-collection
/// report plus fallback-specific telemetry, when this backend has it.
#[derive(Debug, Clone)]
pub struct HealthMetadata {
    pub report: Option<HealthReport>,
    pub circuit_state: Option<CircuitState>,
    pub remote_healthy: Option<bool>,
}

/// Build the `health()` summary for the active backend. A backend with no
/// quarantine concept (remote-only, no fallback) reports `"ok"`.
#[must_use]
pub fn health(backend: &Backend) -> HealthSummary {
    match backend.resilient_report() {
        Some(report) => HealthSummary {
            status: report.status(),
            healthy_count: report.healthy.len(),
            corrupt_count: report.corrupt.len(),
            empty_count: report.empty.len(),
            total: report.healthy.len() + report.corrupt.len() + report.empty.len(),
            corrupt_ids: report.corrupt.clone(),
        },
        None => HealthSummary {
            status: "ok",
            healthy_count: 0,
            corrupt_count: 0,
            empty_count: 0,
            total: 0,
            corrupt_ids: Vec::new(),
        },
    }
}

/// Build the `health_metadata()` detail for the active backend.
#[must_use]
pub fn health_metadata(backend: &Backend) -> HealthMetadata {
    HealthMetadata {
        report: backend.resilient_report(),
        circuit_state: backend.circuit_state(),
        remote_healthy: backend.remote_healthy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextd_resilient::ResilientVectorStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn embedded_backend_with_no_collections_reports_ok() {
        let (tmp, store) = test_utils::temp_embedded_store().await;
        let resilient = ResilientVectorStore::open(tmp.path(), Arc::new(store)).await.unwrap();
        let backend = Backend::Embedded(Arc::new(resilient));

        let summary = health(&backend);
        assert_eq!(summary.status, "ok");
        assert_eq!(summary.corrupt_count, 0);

        let metadata = health_metadata(&backend);
        assert!(metadata.report.is_some());
        assert!(metadata.circuit_state.is_none());
        assert!(metadata.remote_healthy.is_none());
    }
}
