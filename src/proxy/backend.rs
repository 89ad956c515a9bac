// src/proxy/backend.rs
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use url::Url;

use crate::cancellation::CancellationHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Per-backend identity, weight, health status, and counters. One instance
/// per configured upstream, created at startup and never destroyed before
/// shutdown. Shared between the pool (owner), the healthy set (view), and
/// the selection policy (view) via `Arc`.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,
    pub weight: u32,
    cancel: CancellationHandle,

    status: RwLock<HealthStatus>,
    last_status_change_at: RwLock<Option<DateTime<Utc>>>,
    total_requests_served: AtomicU64,
    requests_served_since_status_change: AtomicU64,
}

impl Backend {
    pub fn new(url: Url, weight: u32, cancel: CancellationHandle) -> Self {
        let id = format!(
            "{}:{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80)
        );

        Self {
            id,
            url,
            weight,
            cancel,
            status: RwLock::new(HealthStatus::Unknown),
            last_status_change_at: RwLock::new(None),
            total_requests_served: AtomicU64::new(0),
            requests_served_since_status_change: AtomicU64::new(0),
        }
    }

    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancel
    }

    pub async fn status(&self) -> HealthStatus {
        *self.status.read().await
    }

    /// Atomically transitions to `new`. Setting status to the current value
    /// is a no-op (counters untouched). Returns whether a transition
    /// actually happened, so callers can decide whether to log/republish.
    pub async fn transition_status(&self, new: HealthStatus) -> bool {
        let mut guard = self.status.write().await;
        if *guard == new {
            return false;
        }
        *guard = new;
        self.requests_served_since_status_change
            .store(0, Ordering::Relaxed);
        drop(guard);
        *self.last_status_change_at.write().await = Some(Utc::now());
        true
    }

    pub fn record_success(&self) {
        self.total_requests_served.fetch_add(1, Ordering::Relaxed);
        self.requests_served_since_status_change
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests_served(&self) -> u64 {
        self.total_requests_served.load(Ordering::Relaxed)
    }

    pub fn requests_served_since_status_change(&self) -> u64 {
        self.requests_served_since_status_change.load(Ordering::Relaxed)
    }
}
