//! Configuration loading for UAG services
//!
//! Resolution priority, highest first:
//! 1. Command-line argument
//! 2. Environment variable (`UAG_*`)
//! 3. TOML config file (`~/.config/uag/uag-pe.toml`, or `/etc/uag/uag-pe.toml`)
//! 4. Compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Raw TOML configuration file contents.
///
/// Every field is optional; resolution applies environment overrides and
/// documented defaults on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database_path: Option<String>,
    pub scoring: ScoringToml,
    pub prediction: PredictionToml,
}

/// `[scoring]` section: external ML scoring service endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringToml {
    pub base_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

/// `[prediction]` section: pipeline tuning knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionToml {
    pub max_retries: Option<u32>,
    pub base_retry_delay_ms: Option<u64>,
    pub retry_sweep_delay_ms: Option<u64>,
    pub l1_max_chunk_size: Option<usize>,
    pub l2_max_chunk_size: Option<usize>,
    pub l3_max_chunk_size: Option<usize>,
    pub inputs_per_worker: Option<usize>,
    pub min_concurrency: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub network_latency_ms: Option<u64>,
    pub memory_limit_mb: Option<u64>,
    pub server_concurrency: Option<usize>,
}

/// Fully resolved pipeline tuning with defaults applied.
///
/// Defaults (overridable per field via `UAG_<FIELD>` or the `[prediction]`
/// TOML section):
///
/// | field                | default | env var                    |
/// |----------------------|---------|----------------------------|
/// | max_retries          | 3       | UAG_MAX_RETRIES            |
/// | base_retry_delay_ms  | 200     | UAG_BASE_RETRY_DELAY_MS    |
/// | retry_sweep_delay_ms | 500     | UAG_RETRY_SWEEP_DELAY_MS   |
/// | l1_max_chunk_size    | 50      | UAG_L1_MAX_CHUNK_SIZE      |
/// | l2_max_chunk_size    | 40      | UAG_L2_MAX_CHUNK_SIZE      |
/// | l3_max_chunk_size    | 25      | UAG_L3_MAX_CHUNK_SIZE      |
/// | inputs_per_worker    | 10      | UAG_INPUTS_PER_WORKER      |
/// | min_concurrency      | 2       | UAG_MIN_CONCURRENCY        |
/// | max_concurrency      | 8       | UAG_MAX_CONCURRENCY        |
/// | network_latency_ms   | 120     | UAG_NETWORK_LATENCY_MS     |
/// | memory_limit_mb      | 512     | UAG_MEMORY_LIMIT_MB        |
/// | server_concurrency   | 4       | UAG_SERVER_CONCURRENCY     |
#[derive(Debug, Clone)]
pub struct PredictionTuning {
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub retry_sweep_delay_ms: u64,
    pub l1_max_chunk_size: usize,
    pub l2_max_chunk_size: usize,
    pub l3_max_chunk_size: usize,
    pub inputs_per_worker: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub network_latency_ms: u64,
    pub memory_limit_mb: u64,
    pub server_concurrency: usize,
}

impl Default for PredictionTuning {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 200,
            retry_sweep_delay_ms: 500,
            l1_max_chunk_size: 50,
            l2_max_chunk_size: 40,
            l3_max_chunk_size: 25,
            inputs_per_worker: 10,
            min_concurrency: 2,
            max_concurrency: 8,
            network_latency_ms: 120,
            memory_limit_mb: 512,
            server_concurrency: 4,
        }
    }
}

impl PredictionTuning {
    /// Resolve tuning from environment variables and the TOML section.
    pub fn from_sources(toml: &PredictionToml) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_parse("UAG_MAX_RETRIES")
                .or(toml.max_retries)
                .unwrap_or(defaults.max_retries),
            base_retry_delay_ms: env_parse("UAG_BASE_RETRY_DELAY_MS")
                .or(toml.base_retry_delay_ms)
                .unwrap_or(defaults.base_retry_delay_ms),
            retry_sweep_delay_ms: env_parse("UAG_RETRY_SWEEP_DELAY_MS")
                .or(toml.retry_sweep_delay_ms)
                .unwrap_or(defaults.retry_sweep_delay_ms),
            l1_max_chunk_size: env_parse("UAG_L1_MAX_CHUNK_SIZE")
                .or(toml.l1_max_chunk_size)
                .unwrap_or(defaults.l1_max_chunk_size),
            l2_max_chunk_size: env_parse("UAG_L2_MAX_CHUNK_SIZE")
                .or(toml.l2_max_chunk_size)
                .unwrap_or(defaults.l2_max_chunk_size),
            l3_max_chunk_size: env_parse("UAG_L3_MAX_CHUNK_SIZE")
                .or(toml.l3_max_chunk_size)
                .unwrap_or(defaults.l3_max_chunk_size),
            inputs_per_worker: env_parse("UAG_INPUTS_PER_WORKER")
                .or(toml.inputs_per_worker)
                .unwrap_or(defaults.inputs_per_worker),
            min_concurrency: env_parse("UAG_MIN_CONCURRENCY")
                .or(toml.min_concurrency)
                .unwrap_or(defaults.min_concurrency),
            max_concurrency: env_parse("UAG_MAX_CONCURRENCY")
                .or(toml.max_concurrency)
                .unwrap_or(defaults.max_concurrency),
            network_latency_ms: env_parse("UAG_NETWORK_LATENCY_MS")
                .or(toml.network_latency_ms)
                .unwrap_or(defaults.network_latency_ms),
            memory_limit_mb: env_parse("UAG_MEMORY_LIMIT_MB")
                .or(toml.memory_limit_mb)
                .unwrap_or(defaults.memory_limit_mb),
            server_concurrency: env_parse("UAG_SERVER_CONCURRENCY")
                .or(toml.server_concurrency)
                .unwrap_or(defaults.server_concurrency),
        }
    }
}

/// Parse an environment variable, ignoring unset values and logging a
/// warning for unparseable ones.
pub fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(var = name, value = %raw, "Ignoring unparseable environment variable");
                None
            }
        },
        Err(_) => None,
    }
}

/// Load the TOML config file.
///
/// A missing file yields the default (empty) configuration; a file that
/// exists but does not parse is a hard error.
pub fn load_toml_config(explicit_path: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit_path {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(TomlConfig::default()),
        },
    };

    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Default config file path for the platform.
///
/// On Linux the user config dir is tried first, then `/etc/uag`.
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("uag").join("uag-pe.toml"));
    if let Some(path) = &user_config {
        if path.exists() {
            return user_config;
        }
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/uag/uag-pe.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    user_config
}

/// Resolve the SQLite database path: CLI argument, then `UAG_DATABASE`,
/// then the TOML file, then the platform data dir.
pub fn resolve_database_path(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("UAG_DATABASE") {
        return PathBuf::from(path);
    }
    if let Some(path) = &toml.database_path {
        return PathBuf::from(path);
    }
    dirs::data_local_dir()
        .map(|d| d.join("uag").join("uag.db"))
        .unwrap_or_else(|| PathBuf::from("./uag_data/uag.db"))
}
