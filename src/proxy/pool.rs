//
// src/proxy/pool.rs
//
use super::backend::{Backend, HealthStatus};
use crate::cancellation::CancellationHandle;
use crate::config::BackendConfig;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// The fixed, ordered sequence of configured backends, plus a derived
/// "healthy set" view republished atomically by the health checker.
/// Indexing into `all()` is stable for the process lifetime — round-robin
/// policies depend on that. The backend set itself is fixed at startup;
/// dynamic reconfiguration is not supported.
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    healthy: ArcSwap<Vec<Arc<Backend>>>,
}

impl BackendPool {
    pub fn new(configs: &[BackendConfig], cancel: CancellationHandle) -> Self {
        let backends = configs
            .iter()
            .map(|c| Arc::new(Backend::new(c.url.clone(), c.weight.unwrap_or(1), cancel.clone())))
            .collect();

        Self {
            backends,
            healthy: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn all(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// A consistent, cheaply-cloned snapshot of currently healthy backends,
    /// in pool order.
    pub fn healthy_set(&self) -> Arc<Vec<Arc<Backend>>> {
        self.healthy.load_full()
    }

    pub fn find(&self, id: &str) -> Option<Arc<Backend>> {
        self.backends.iter().find(|b| b.id == id).cloned()
    }

    /// Recomputes the healthy set from current backend statuses and
    /// publishes it as a single atomic replacement. Called by the health
    /// checker after every probe (periodic or on-demand) so readers never
    /// observe a descriptor marked healthy but absent from the set, or vice
    /// versa, for longer than a single probe's completion.
    pub async fn refresh_healthy_set(&self) {
        let mut next = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            if backend.status().await == HealthStatus::Healthy {
                next.push(backend.clone());
            }
        }

        let healthy_count = next.len();
        self.healthy.store(Arc::new(next));

        tracing::debug!(
            healthy = healthy_count,
            total = self.backends.len(),
            "healthy set republished"
        );
    }
}
