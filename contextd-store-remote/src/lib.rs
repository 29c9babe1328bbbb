//! Remote (networked) `VectorStore` backend (C2, remote variant).
//!
//! A thin REST client: one HTTP call per trait method, TLS-enforced
//! connection setup, no internal retry loop. Retry policy for a flaky
//! remote lives one layer up, in `contextd-fallback`.

mod client;
mod config;
mod wire;

pub use client::RemoteVectorStore;
pub use config::RemoteConfig;
