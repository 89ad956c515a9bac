// src/load_balancer/random.rs
use std::sync::Arc;

use rand::Rng;

use super::algorithm::{NoHealthyBackend, SelectionPolicy};
use crate::proxy::Backend;

/// Draws a uniformly distributed index from the current healthy set on
/// every call. Stateless — successive calls are independent.
pub struct RandomPolicy;

impl SelectionPolicy for RandomPolicy {
    fn next_server(&self, healthy: &[Arc<Backend>]) -> Result<(Arc<Backend>, usize), NoHealthyBackend> {
        if healthy.is_empty() {
            return Err(NoHealthyBackend);
        }
        let idx = rand::thread_rng().gen_range(0..healthy.len());
        Ok((healthy[idx].clone(), idx))
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
