// src/load_balancer/mod.rs
mod algorithm;
mod random;
mod round_robin;
mod weighted_round_robin;

pub use algorithm::{NoHealthyBackend, SelectionPolicy};
pub use random::RandomPolicy;
pub use round_robin::RoundRobinPolicy;
pub use weighted_round_robin::WeightedRoundRobinPolicy;

use std::sync::Arc;

use crate::config::PolicyKind;

/// Builds the configured selection policy once, at startup. There is no
/// dynamic policy swap afterward.
pub fn create(policy: PolicyKind) -> Arc<dyn SelectionPolicy> {
    match policy {
        PolicyKind::Random => Arc::new(RandomPolicy),
        PolicyKind::RoundRobin => Arc::new(RoundRobinPolicy::new()),
        PolicyKind::WeightedRoundRobin => Arc::new(WeightedRoundRobinPolicy::new()),
    }
}
