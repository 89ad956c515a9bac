// src/health/checker.rs
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cancellation::CancellationHandle;
use crate::config::HealthCheckConfig;
use crate::proxy::{Backend, BackendPool, HealthStatus};

type ProbeFuture = Shared<BoxFuture<'static, HealthStatus>>;

/// Maintains the healthy set by probing every backend at a fixed cadence
/// and on demand. Probes for the same backend coalesce: at most one probe
/// per backend is ever in flight, and concurrent callers observe the same
/// result.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<BackendPool>,
    client: reqwest::Client,
    cancel: CancellationHandle,
    inflight: DashMap<String, ProbeFuture>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, pool: Arc<BackendPool>, cancel: CancellationHandle) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .expect("failed to build health-check HTTP client");

        Arc::new(Self {
            config,
            pool,
            client,
            cancel,
            inflight: DashMap::new(),
            run_handle: Mutex::new(None),
        })
    }

    /// Starts the periodic schedule: an eager first pass, then one probe
    /// round of every backend per `interval` thereafter. The ingress server
    /// does not wait for this to return — it may accept connections
    /// immediately and will answer 500 until the first pass completes.
    pub async fn spawn(self: &Arc<Self>) {
        let checker = self.clone();
        let handle = tokio::spawn(async move {
            checker.run().await;
        });
        *self.run_handle.lock().await = Some(handle);
    }

    async fn run(self: Arc<Self>) {
        tracing::info!(interval = ?self.config.interval(), "health checker starting, running eager first pass");
        self.check_all().await;

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.tick().await; // consume the immediate first tick; we already probed above

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let checker = self.clone();
                    tokio::spawn(async move { checker.check_all().await; });
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("health checker stopping periodic schedule");
                    break;
                }
            }
        }
    }

    async fn check_all(&self) {
        let backends = self.pool.all().to_vec();
        let probes = backends.iter().cloned().map(|b| self.probe(b));
        futures::future::join_all(probes).await;
        self.pool.refresh_healthy_set().await;
    }

    /// Probes one backend, joining any in-flight probe for it instead of
    /// launching a second. Used both by the periodic schedule and by
    /// on-demand triggers from the forwarder.
    pub async fn probe(&self, backend: Arc<Backend>) -> HealthStatus {
        let id = backend.id.clone();
        let (future, is_owner) = match self.inflight.entry(id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let future: BoxFuture<'static, HealthStatus> = Self::run_probe(
                    self.client.clone(),
                    backend.clone(),
                    self.config.path.clone(),
                    self.cancel.clone(),
                )
                .boxed();
                let shared = future.shared();
                entry.insert(shared.clone());
                (shared, true)
            }
        };

        let status = future.await;
        if is_owner {
            self.inflight.remove(&id);
        }
        status
    }

    /// Runs an immediate, synchronous probe of one backend and republishes
    /// the healthy set so the result is visible right away. Called by the
    /// forwarder after observing a connection refusal.
    pub async fn probe_now(&self, backend: Arc<Backend>) -> HealthStatus {
        let status = self.probe(backend).await;
        self.pool.refresh_healthy_set().await;
        status
    }

    async fn run_probe(
        client: reqwest::Client,
        backend: Arc<Backend>,
        path: String,
        cancel: CancellationHandle,
    ) -> HealthStatus {
        let url = match backend.url.join(&path) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(backend = %backend.url, error = %e, "invalid health-check path");
                backend.transition_status(HealthStatus::Unhealthy).await;
                return HealthStatus::Unhealthy;
            }
        };

        let send = client.get(url.clone()).send();
        let outcome = tokio::select! {
            res = send => res,
            _ = cancel.cancelled() => {
                return backend.status().await;
            }
        };

        let status = match outcome {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(response) => {
                tracing::debug!(backend = %backend.url, status = %response.status(), "probe returned non-2xx");
                HealthStatus::Unhealthy
            }
            Err(e) => {
                tracing::debug!(backend = %backend.url, error = %e, "probe failed");
                HealthStatus::Unhealthy
            }
        };

        if backend.transition_status(status).await {
            tracing::info!(backend = %backend.url, status = ?status, "backend health transitioned");
        }

        status
    }

    /// Cancels the periodic timer and waits for every in-flight probe to
    /// terminate. Assumes the shared cancellation handle has already been
    /// fired by the caller (`LoadBalancer::close`) — this method does not
    /// fire it itself, since the same handle also guards data-plane
    /// forwards.
    pub async fn stop(&self) {
        if let Some(handle) = self.run_handle.lock().await.take() {
            let _ = handle.await;
        }
        while !self.inflight.is_empty() {
            tokio::task::yield_now().await;
        }
    }
}
