// src/load_balancer/round_robin.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::algorithm::{NoHealthyBackend, SelectionPolicy};
use crate::proxy::Backend;

/// A monotonically increasing cursor, interpreted modulo the *current*
/// healthy-set length at read time — never stored as an absolute pool
/// index. This keeps selection bias-free across healthy-set resizes
/// without committing to a particular reset rule when the set changes.
///
/// Conceptually initialized to -1; represented as `u64::MAX` so the first
/// `fetch_add` wraps to 0.
pub struct RoundRobinPolicy {
    cursor: AtomicU64,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            cursor: AtomicU64::new(u64::MAX),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for RoundRobinPolicy {
    fn next_server(&self, healthy: &[Arc<Backend>]) -> Result<(Arc<Backend>, usize), NoHealthyBackend> {
        if healthy.is_empty() {
            return Err(NoHealthyBackend);
        }
        let len = healthy.len() as u64;
        let position = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let idx = (position % len) as usize;
        Ok((healthy[idx].clone(), idx))
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
