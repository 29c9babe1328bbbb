//! Fallback/WAL wrapper (C5): composes a remote and a local `VectorStore`,
//! routing writes and reads through a health monitor's current state with
//! a write-ahead log bridging the gap while the remote is unreachable, a
//! CAS-based circuit breaker gating sync retries, and startup WAL
//! recovery with bounded orphan-document resurrection.

mod circuit_breaker;
mod health;
mod provenance;
mod store;
mod wal_store;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{HealthCallback, HealthMonitor, Pinger, DEFAULT_PING_INTERVAL, MAX_PING_BACKOFF};
pub use provenance::ReadSource;
pub use store::{resurrect_orphans_for_collection, FallbackVectorStore};
pub use wal_store::{wal_dir, MAX_ORPHAN_SCAN, ORPHAN_SCAN_BUFFER};
