// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON, chosen by extension).
/// Parsing failures surface the offending field via `anyhow::Context`.
/// Validation happens once, at `LoadBalancer::new`, not here.
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file at {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    );

    let config: Config = if is_yaml {
        serde_yaml::from_str(&contents).context("failed to parse YAML config")?
    } else {
        serde_json::from_str(&contents).context("failed to parse JSON config")?
    };

    Ok(config)
}
