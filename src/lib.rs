// src/lib.rs
pub mod cancellation;
pub mod config;
pub mod health;
pub mod load_balancer;
pub mod proxy;
pub mod retry;
pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use cancellation::CancellationHandle;
use config::{Config, ConfigError};
use health::HealthChecker;
use proxy::BackendPool;
use retry::{HttpForwarder, RetryPolicy};
use server::{RequestForwarder, RequestHandler, ServerBuilder};

/// Owns every long-lived component of one load-balancer instance: the
/// backend pool, health checker, selection policy, egress client, and
/// ingress server. Construct with `new`, start the health checker, `run()`
/// the ingress server, and `close()` to shut down.
pub struct LoadBalancer {
    config: Config,
    pool: Arc<BackendPool>,
    checker: Arc<HealthChecker>,
    forwarder: Arc<RequestForwarder>,
    cancel: CancellationHandle,
    server_task: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
}

impl LoadBalancer {
    /// Validates `config` and wires every component together. Invalid
    /// configuration is reported as a `ConfigError` naming the offending
    /// field; the caller is expected to abort startup on it.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let cancel = CancellationHandle::new();
        let pool = Arc::new(BackendPool::new(&config.backends, cancel.clone()));
        let checker = HealthChecker::new(config.health_check.clone(), pool.clone(), cancel.clone());
        let policy = load_balancer::create(config.policy);
        let retry = RetryPolicy::new(&config.retry);
        let http_forwarder = HttpForwarder::new(retry, cancel.clone());
        let forwarder = Arc::new(RequestForwarder::new(
            pool.clone(),
            policy,
            checker.clone(),
            http_forwarder,
        ));

        Ok(Self {
            config,
            pool,
            checker,
            forwarder,
            cancel,
            server_task: Mutex::new(None),
        })
    }

    /// Starts the health checker's background schedule: an eager first
    /// pass, then one round of probes per configured interval. Does not
    /// block — the ingress server may start accepting connections
    /// immediately and will answer 500 until the first pass completes.
    pub async fn start_health_checker(&self) {
        self.checker.spawn().await;
    }

    /// Binds the ingress port and serves in a background task. Returns once
    /// the task is spawned; the listener itself may still be binding.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.listen_port).into();
        let handler = RequestHandler::new(self.forwarder.clone());
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            ServerBuilder::new(addr, cancel).with_handler(handler).serve().await
        });
        *self.server_task.lock().await = Some(task);
        Ok(())
    }

    /// Fires the shared cancellation handle (aborting in-flight probes and
    /// upstream requests), stops the health checker, waits for the ingress
    /// server to drain in-flight connections, and emits a per-backend stats
    /// report.
    pub async fn close(&self) {
        tracing::info!("load balancer shutting down");
        self.cancel.cancel();
        self.checker.stop().await;

        if let Some(task) = self.server_task.lock().await.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "ingress server exited with an error"),
                Err(e) => tracing::error!(error = %e, "ingress server task panicked"),
            }
        }

        for backend in self.pool.all() {
            tracing::info!(
                backend = %backend.url,
                total_served = backend.total_requests_served(),
                served_since_status_change = backend.requests_served_since_status_change(),
                status = ?backend.status().await,
                "final backend stats"
            );
        }
    }
}
