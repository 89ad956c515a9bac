// src/config/models.rs
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::retry::RetryDelay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Random,
    RoundRobin,
    WeightedRoundRobin,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub url: Url,
    #[serde(default)]
    pub weight: Option<u32>,
}

/// The retry delay function of spec §3: `attempt -> duration`. `Linear` is
/// the default (`delay(attempt) = step * attempt`); `Fixed` is a flat
/// backoff for callers that want one.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryDelayKind {
    Linear { step_ms: u64 },
    Fixed { ms: u64 },
}

impl Default for RetryDelayKind {
    fn default() -> Self {
        RetryDelayKind::Linear { step_ms: 10 }
    }
}

impl RetryDelayKind {
    pub fn into_fn(self) -> RetryDelay {
        match self {
            RetryDelayKind::Linear { step_ms } => {
                Arc::new(move |attempt: u32| Duration::from_millis(step_ms * attempt as u64))
            }
            RetryDelayKind::Fixed { ms } => Arc::new(move |_attempt: u32| Duration::from_millis(ms)),
        }
    }
}

fn default_retry_budget() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_budget")]
    pub budget: u32,
    #[serde(default)]
    pub delay: RetryDelayKind,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: default_retry_budget(),
            delay: RetryDelayKind::default(),
        }
    }
}

fn default_health_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    #[serde(default = "default_health_path")]
    pub path: String,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen_port: u16,
    pub policy: PolicyKind,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    pub health_check: HealthCheckConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("backend pool must not be empty")]
    EmptyPool,
    #[error("backend {0} has weight 0, which is invalid under a weighted policy")]
    ZeroWeight(Url),
    #[error("health_check.interval_ms must be greater than 0")]
    ZeroInterval,
    #[error("health_check.timeout_ms must be greater than 0")]
    ZeroTimeout,
    #[error("listen_port must not be 0")]
    ZeroPort,
}

impl Config {
    /// Validated once, at construction of the `LoadBalancer`. Invalid
    /// configuration aborts startup with a diagnostic naming the offending
    /// field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::EmptyPool);
        }
        if self.listen_port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.health_check.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.health_check.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if matches!(self.policy, PolicyKind::WeightedRoundRobin) {
            for backend in &self.backends {
                if backend.weight.unwrap_or(1) == 0 {
                    return Err(ConfigError::ZeroWeight(backend.url.clone()));
                }
            }
        }
        Ok(())
    }
}
