use std::collections::HashMap;
use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::defaults;

/// Top-level configuration for the crawlguard proxy.
/// Deserializes from a TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_server_config")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_upstream_config")]
    pub upstream: UpstreamConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_detection_config")]
    pub detection: DetectionConfig,

    #[serde(default = "defaults::default_rate_limit_config")]
    pub rate_limit: RateLimitConfig,

    #[serde(default = "defaults::default_behavioral_config")]
    pub behavioral: BehavioralConfig,

    #[serde(default = "defaults::default_prevention_config")]
    pub prevention: PreventionConfig,

    #[serde(default = "defaults::default_client_report_config")]
    pub client_report: ClientReportConfig,
}

impl Settings {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config file: {}", path))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: defaults::default_server_config(),
            upstream: defaults::default_upstream_config(),
            logging: defaults::default_logging_config(),
            storage: defaults::default_storage_config(),
            detection: defaults::default_detection_config(),
            rate_limit: defaults::default_rate_limit_config(),
            behavioral: defaults::default_behavioral_config(),
            prevention: defaults::default_prevention_config(),
            client_report: defaults::default_client_report_config(),
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind")]
    pub bind: String,

    #[serde(default = "defaults::default_max_connections")]
    pub max_connections: usize,
}

/// Upstream backend server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "defaults::default_upstream_address")]
    pub address: String,

    #[serde(default = "defaults::default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_filter")]
    pub filter: String,

    #[serde(default = "defaults::default_log_file")]
    pub file: String,

    #[serde(default)]
    pub access_log: String,

    #[serde(default)]
    pub json: bool,
}

/// In-memory store housekeeping.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// How much of the request feeds the cache/identity fingerprint.
///
/// `Detailed` splits visitors more finely (per path, per Accept header set),
/// which lowers cache hit rates without changing detection correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    #[default]
    Basic,
    Detailed,
}

/// Detection pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "defaults::default_detection_threshold")]
    pub threshold: u8,

    #[serde(default = "defaults::default_early_exit_score")]
    pub early_exit_score: u8,

    #[serde(default = "defaults::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub fingerprint_mode: FingerprintMode,

    #[serde(default = "defaults::default_detection_cookie")]
    pub detection_cookie: String,

    #[serde(default)]
    pub extra_crawler_signatures: Vec<String>,

    #[serde(default = "defaults::default_analyzer_toggles")]
    pub analyzers: AnalyzerToggles,
}

/// Per-analyzer enable switches.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerToggles {
    #[serde(default = "defaults::default_true")]
    pub header: bool,

    #[serde(default = "defaults::default_true")]
    pub pattern: bool,

    #[serde(default = "defaults::default_true")]
    pub rate_limit: bool,

    #[serde(default = "defaults::default_true")]
    pub behavioral: bool,
}

/// Rate window limits. Counts above a limit raise the matching signal.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "defaults::default_short_window_secs")]
    pub short_window_secs: u64,

    #[serde(default = "defaults::default_short_limit")]
    pub short_limit: u64,

    #[serde(default = "defaults::default_medium_window_secs")]
    pub medium_window_secs: u64,

    #[serde(default = "defaults::default_medium_limit")]
    pub medium_limit: u64,

    #[serde(default = "defaults::default_burst_window_secs")]
    pub burst_window_secs: f64,

    #[serde(default = "defaults::default_burst_limit")]
    pub burst_limit: u64,

    #[serde(default = "defaults::default_user_agent_ttl_secs")]
    pub user_agent_ttl_secs: u64,

    #[serde(default = "defaults::default_max_user_agents")]
    pub max_user_agents: usize,
}

/// Behavioral analysis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BehavioralConfig {
    #[serde(default = "defaults::default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "defaults::default_sample_limit")]
    pub sample_limit: usize,

    #[serde(default = "defaults::default_long_page_height")]
    pub long_page_height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreventionMode {
    #[default]
    Adaptive,
    Static,
}

/// Score thresholds for adaptive strategy selection (inclusive lower bounds).
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyThresholds {
    #[serde(default = "defaults::default_block_threshold")]
    pub block: u8,

    #[serde(default = "defaults::default_honeypot_threshold")]
    pub honeypot: u8,

    #[serde(default = "defaults::default_alternate_threshold")]
    pub alternate: u8,

    #[serde(default = "defaults::default_delay_threshold")]
    pub delay: u8,
}

/// Prevention engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PreventionConfig {
    #[serde(default)]
    pub mode: PreventionMode,

    /// Strategy name used in static mode.
    #[serde(default = "defaults::default_static_strategy")]
    pub strategy: String,

    #[serde(default = "defaults::default_strategy_thresholds")]
    pub thresholds: StrategyThresholds,

    #[serde(default = "defaults::default_delay_secs")]
    pub delay_secs: f64,

    #[serde(default = "defaults::default_true")]
    pub honeypot_enabled: bool,

    #[serde(default = "defaults::default_alternate_message")]
    pub alternate_message: String,
}

/// Client-side report ingestion configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientReportConfig {
    #[serde(default = "defaults::default_report_path")]
    pub path: String,

    #[serde(default = "defaults::default_report_weight")]
    pub default_weight: u32,

    /// Overrides merged on top of the built-in weight table.
    #[serde(default)]
    pub weights: HashMap<String, u32>,
}
