// src/load_balancer/algorithm.rs
use std::sync::Arc;

use crate::proxy::Backend;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
#[error("no healthy backend available")]
pub struct NoHealthyBackend;

/// A pure function from (healthy-set snapshot, policy-private cursor) to
/// the next backend to use. Construction is one-shot: there is no dynamic
/// policy swap. Implementations must be safe under concurrent calls — this
/// is the data-plane hot path.
pub trait SelectionPolicy: Send + Sync {
    fn next_server(&self, healthy: &[Arc<Backend>]) -> Result<(Arc<Backend>, usize), NoHealthyBackend>;

    fn name(&self) -> &'static str;
}
