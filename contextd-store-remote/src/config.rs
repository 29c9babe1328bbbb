//! Remote backend connection configuration (spec §4.2 "Remote variant").

use contextd_core::{Error, Result};
use std::time::Duration;
use url::Url;

/// Connection settings for the remote `VectorStore` backend.
///
/// Network-level retries are deliberately not configured here — spec
/// §4.2 assigns retry policy to the fallback wrapper, not to the backend
/// client itself.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base endpoint, e.g. `https://contextd-store.internal:8443`.
    pub endpoint: Url,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Bearer token, if the remote requires authentication.
    pub auth_token: Option<String>,
}

impl RemoteConfig {
    /// Build a configuration, rejecting insecure transport unless the
    /// endpoint resolves to loopback (spec §4.2: "Connection configured
    /// with TLS by default; insecure transport rejected unless endpoint
    /// resolves to loopback.").
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the endpoint is not `https`
    /// and does not point at a loopback host.
    pub fn new(endpoint: Url, timeout: Duration, auth_token: Option<String>) -> Result<Self> {
        if endpoint.scheme() != "https" && !is_loopback(&endpoint) {
            return Err(Error::Configuration(format!(
                "insecure endpoint '{endpoint}' rejected: only https:// or loopback http:// is permitted"
            )));
        }
        Ok(Self {
            endpoint,
            timeout,
            auth_token,
        })
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}
