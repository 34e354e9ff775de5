//! Core proxy pool implementation.

use crate::config::ProxyPoolConfig;
use crate::proxy::Endpoint;
use crate::source::{default_providers, HttpProxySource, ProxySource};
use crate::transport::{HttpTransport, OutboundRequest, ReqwestTransport};

use futures::{future, stream, StreamExt};
use http::StatusCode;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

/// Lifecycle of the pool's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// No refresh has completed yet.
    Uninitialized,
    /// A refresh is clearing and repopulating the sets.
    Refreshing,
    /// The most recent refresh has finished.
    Ready,
}

/// Outcome of one `refresh` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub generation: u64,
    pub candidates: usize,
    pub working: usize,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub state: PoolState,
    pub generation: u64,
    pub candidates: usize,
    pub working: usize,
}

struct PoolInner {
    state: PoolState,
    generation: u64,
    candidates: HashSet<Endpoint>,
    /// Vec for O(1) random choice; entries are unique.
    working: Vec<Endpoint>,
}

/// A self-maintaining pool of verified proxy endpoints.
///
/// All set mutations happen under one mutex that is never held across a
/// network call. Every refresh opens a new generation: the sets are cleared
/// first, and a verification only records its pass if its generation is still
/// current and the endpoint is one of that generation's candidates.
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
    source: Arc<dyn ProxySource>,
    transport: Arc<dyn HttpTransport>,
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
    state_tx: watch::Sender<PoolState>,
}

impl ProxyPool {
    /// Create an empty pool. Nothing is fetched until `refresh` runs.
    pub fn new(
        config: ProxyPoolConfig,
        source: Arc<dyn ProxySource>,
        transport: Arc<dyn HttpTransport>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(PoolState::Uninitialized);
        Arc::new(Self {
            inner: Mutex::new(PoolInner {
                state: PoolState::Uninitialized,
                generation: 0,
                candidates: HashSet::new(),
                working: Vec::new(),
            }),
            source,
            transport,
            config,
            state_tx,
        })
    }

    /// Create a pool that fetches the configured providers (or the built-in
    /// ones when none are configured) and verifies over reqwest.
    pub fn with_http(config: ProxyPoolConfig) -> Result<Arc<Self>, reqwest::Error> {
        let providers = if config.providers.is_empty() {
            default_providers()
        } else {
            config.providers.clone()
        };
        let source = Arc::new(HttpProxySource::new(providers)?);
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::new(config, source, transport))
    }

    /// Discard the current generation, fetch fresh candidates and verify them.
    ///
    /// Returns once every candidate has been checked.
    pub async fn refresh(&self) -> RefreshReport {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.candidates.clear();
            inner.working.clear();
            inner.state = PoolState::Refreshing;
            inner.generation
        };
        self.state_tx.send_replace(PoolState::Refreshing);
        info!("Refreshing proxy pool (generation {})", generation);

        let fetched = self.source.fetch().await;
        let candidates: Vec<Endpoint> = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                warn!("Refresh generation {} superseded before verification", generation);
                return RefreshReport {
                    generation,
                    candidates: fetched.len(),
                    working: 0,
                };
            }
            inner.candidates.extend(fetched.iter().cloned());
            inner.candidates.iter().cloned().collect()
        };

        info!(
            "Verifying {} candidates with up to {} concurrent checks",
            candidates.len(),
            self.config.verify_concurrency
        );
        let working = stream::iter(candidates.iter().cloned())
            .map(|endpoint| async move { self.verify_in(&endpoint, generation).await })
            .buffer_unordered(self.config.verify_concurrency)
            .filter(|passed| future::ready(*passed))
            .count()
            .await;

        let report = RefreshReport {
            generation,
            candidates: candidates.len(),
            working,
        };
        let current = {
            let mut inner = self.inner.lock();
            let current = inner.generation == generation;
            if current {
                inner.state = PoolState::Ready;
            }
            current
        };
        if current {
            self.state_tx.send_replace(PoolState::Ready);
        }

        info!(
            "Proxy pool refreshed: {}/{} working proxies (generation {})",
            report.working, report.candidates, generation
        );
        report
    }

    /// Check that `endpoint` relays traffic to the verification target.
    ///
    /// A pass is recorded in the working set when the endpoint is a
    /// candidate of the current generation. Never fails: errors, timeouts and
    /// any status other than 200 yield `false`.
    pub async fn verify(&self, endpoint: &Endpoint) -> bool {
        let generation = self.inner.lock().generation;
        self.verify_in(endpoint, generation).await
    }

    async fn verify_in(&self, endpoint: &Endpoint, generation: u64) -> bool {
        if !self.probe(endpoint).await {
            return false;
        }

        let mut inner = self.inner.lock();
        if inner.generation == generation
            && inner.candidates.contains(endpoint)
            && !inner.working.contains(endpoint)
        {
            inner.working.push(endpoint.clone());
        }
        true
    }

    async fn probe(&self, endpoint: &Endpoint) -> bool {
        let timeout = self.config.verify_timeout;
        let request = OutboundRequest::get(&self.config.verify_url, timeout);

        match time::timeout(timeout, self.transport.execute(Some(endpoint), &request)).await {
            Ok(Ok(response)) if response.status == StatusCode::OK => {
                debug!("Proxy {} verified", endpoint);
                true
            }
            Ok(Ok(response)) => {
                debug!("Proxy {} answered {}", endpoint, response.status);
                false
            }
            Ok(Err(e)) => {
                debug!("Proxy {} failed verification: {}", endpoint, e);
                false
            }
            Err(_) => {
                debug!("Proxy {} timed out after {:?}", endpoint, timeout);
                false
            }
        }
    }

    /// A uniformly random working proxy, or `None` when there is none.
    pub fn pick(&self) -> Option<Endpoint> {
        let inner = self.inner.lock();
        if inner.working.is_empty() {
            return None;
        }
        let mut rng = rand::rng();
        let idx = rng.random_range(0..inner.working.len());
        Some(inner.working[idx].clone())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.inner.lock().state
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            state: inner.state,
            generation: inner.generation,
            candidates: inner.candidates.len(),
            working: inner.working.len(),
        }
    }

    /// Resolve once the pool is `Ready`.
    pub async fn wait_ready(&self) {
        let mut rx = self.state_tx.subscribe();
        // the sender lives as long as self, so this cannot observe a closed channel
        let _ = rx.wait_for(|state| *state == PoolState::Ready).await;
    }

    /// Spawn the refresh loop: wait `config.initial_delay`, then refresh every
    /// `interval` (`config.refresh_interval` when `None`). A cycle that panics
    /// or finds no candidates is logged and retried after
    /// `config.failure_cooldown`.
    ///
    /// Dropping the returned handle detaches the loop; it then runs for the
    /// lifetime of the runtime.
    pub fn start_background_maintenance(self: &Arc<Self>, interval: Option<Duration>) -> MaintenanceHandle {
        let interval = interval.unwrap_or(self.config.refresh_interval);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = Arc::clone(self);
        let task = tokio::spawn(pool.maintain(interval, shutdown_rx));
        MaintenanceHandle { shutdown_tx, task }
    }

    async fn maintain(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting proxy pool maintenance with {}s interval",
            interval.as_secs()
        );
        let mut pause = self.config.initial_delay;

        loop {
            tokio::select! {
                _ = time::sleep(pause) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    info!("Proxy pool maintenance shutting down");
                    return;
                }
            }

            // run the cycle as its own task so a panic is contained to it
            let pool = Arc::clone(&self);
            pause = match tokio::spawn(async move { pool.refresh().await }).await {
                Ok(report) if report.candidates > 0 => interval,
                Ok(_) => {
                    warn!(
                        "Refresh found no candidates, retrying in {}s",
                        self.config.failure_cooldown.as_secs()
                    );
                    self.config.failure_cooldown
                }
                Err(e) => {
                    error!(
                        "Proxy pool refresh failed: {}, retrying in {}s",
                        e,
                        self.config.failure_cooldown.as_secs()
                    );
                    self.config.failure_cooldown
                }
            };
        }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        future::pending::<()>().await;
    }
}

/// Handle to the background maintenance task.
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the loop, letting an in-progress refresh finish first.
    pub async fn shutdown(self) {
        self.shutdown_tx.send_replace(true);
        if let Err(e) = self.task.await {
            error!("Proxy pool maintenance task ended abnormally: {}", e);
        }
    }

    /// Whether the loop has stopped, either through `shutdown` or a crash.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
