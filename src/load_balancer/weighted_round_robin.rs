// src/load_balancer/weighted_round_robin.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::algorithm::{NoHealthyBackend, SelectionPolicy};
use crate::proxy::Backend;

/// Walks a virtual ring of length `Σ w_i`: each backend occupies a
/// contiguous run of positions proportional to its weight. A shared
/// monotonic cursor is mapped onto that ring (recomputed from the live
/// healthy-set snapshot on every call), so any window of `Σ w_i`
/// consecutive selections over a stable healthy set picks backend `i`
/// exactly `w_i` times.
///
/// Unlike plain round-robin, a healthy-set change restarts the ring: the
/// cursor is reset to the start rather than carried over and reinterpreted
/// against the new total weight, so a backend leaving or rejoining can't
/// leave the next pick stranded mid-cycle over the remaining backends.
pub struct WeightedRoundRobinPolicy {
    cursor: AtomicU64,
    ring_weight: AtomicU64,
}

impl WeightedRoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            cursor: AtomicU64::new(u64::MAX),
            ring_weight: AtomicU64::new(0),
        }
    }
}

impl Default for WeightedRoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for WeightedRoundRobinPolicy {
    fn next_server(&self, healthy: &[Arc<Backend>]) -> Result<(Arc<Backend>, usize), NoHealthyBackend> {
        if healthy.is_empty() {
            return Err(NoHealthyBackend);
        }

        let total_weight: u64 = healthy.iter().map(|b| b.weight.max(1) as u64).sum();

        // The ring's length just changed, so the old cursor position no
        // longer means anything on it: start over at the new ring's head.
        if self.ring_weight.swap(total_weight, Ordering::Relaxed) != total_weight {
            self.cursor.store(u64::MAX, Ordering::Relaxed);
        }

        let position = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % total_weight;

        let mut cumulative = 0u64;
        for (idx, backend) in healthy.iter().enumerate() {
            cumulative += backend.weight.max(1) as u64;
            if position < cumulative {
                return Ok((backend.clone(), idx));
            }
        }

        // Unreachable: position < total_weight by construction, but guard
        // against float/overflow weirdness rather than panic on the hot path.
        let idx = healthy.len() - 1;
        Ok((healthy[idx].clone(), idx))
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}
