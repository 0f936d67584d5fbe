//! Configuration resolution for uag-pe
//!
//! Resolves the scoring-service endpoint with ENV → TOML → default
//! priority and warns when multiple sources are set.

use std::time::Duration;
use tracing::{info, warn};

use uag_common::config::{env_parse, TomlConfig};

const DEFAULT_SCORING_URL: &str = "http://127.0.0.1:8585";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Resolved scoring-service endpoint configuration.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

/// Resolve the scoring endpoint.
///
/// **Priority:** `UAG_SCORING_URL` / `UAG_SCORING_TIMEOUT_MS` → `[scoring]`
/// TOML section → defaults.
pub fn resolve_scoring_config(toml_config: &TomlConfig) -> ScoringConfig {
    let env_url = std::env::var("UAG_SCORING_URL")
        .ok()
        .filter(|v| !v.trim().is_empty());
    let toml_url = toml_config
        .scoring
        .base_url
        .clone()
        .filter(|v| !v.trim().is_empty());

    if env_url.is_some() && toml_url.is_some() {
        warn!("Scoring service URL set in both environment and TOML config; using environment");
    }

    let base_url = env_url.or(toml_url).unwrap_or_else(|| {
        info!(
            "Scoring service URL not configured, using default {}",
            DEFAULT_SCORING_URL
        );
        DEFAULT_SCORING_URL.to_string()
    });

    let timeout_ms = env_parse::<u64>("UAG_SCORING_TIMEOUT_MS")
        .or(toml_config.scoring.request_timeout_ms)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

    ScoringConfig {
        base_url,
        request_timeout: Duration::from_millis(timeout_ms),
    }
}
