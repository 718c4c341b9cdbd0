use std::collections::HashMap;

use super::settings::{
    AnalyzerToggles, BehavioralConfig, ClientReportConfig, DetectionConfig, FingerprintMode,
    LoggingConfig, PreventionConfig, PreventionMode, RateLimitConfig, ServerConfig,
    StorageConfig, StrategyThresholds, UpstreamConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
        max_connections: default_max_connections(),
    }
}

pub fn default_upstream_config() -> UpstreamConfig {
    UpstreamConfig {
        address: default_upstream_address(),
        response_timeout_ms: default_response_timeout_ms(),
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        filter: default_log_filter(),
        file: default_log_file(),
        access_log: String::new(),
        json: false,
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        cleanup_interval_secs: default_cleanup_interval_secs(),
    }
}

pub fn default_detection_config() -> DetectionConfig {
    DetectionConfig {
        threshold: default_detection_threshold(),
        early_exit_score: default_early_exit_score(),
        cache_ttl_secs: default_cache_ttl_secs(),
        fingerprint_mode: FingerprintMode::Basic,
        detection_cookie: default_detection_cookie(),
        extra_crawler_signatures: Vec::new(),
        analyzers: default_analyzer_toggles(),
    }
}

pub fn default_analyzer_toggles() -> AnalyzerToggles {
    AnalyzerToggles {
        header: true,
        pattern: true,
        rate_limit: true,
        behavioral: true,
    }
}

pub fn default_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        short_window_secs: default_short_window_secs(),
        short_limit: default_short_limit(),
        medium_window_secs: default_medium_window_secs(),
        medium_limit: default_medium_limit(),
        burst_window_secs: default_burst_window_secs(),
        burst_limit: default_burst_limit(),
        user_agent_ttl_secs: default_user_agent_ttl_secs(),
        max_user_agents: default_max_user_agents(),
    }
}

pub fn default_behavioral_config() -> BehavioralConfig {
    BehavioralConfig {
        session_ttl_secs: default_session_ttl_secs(),
        sample_limit: default_sample_limit(),
        long_page_height: default_long_page_height(),
    }
}

pub fn default_prevention_config() -> PreventionConfig {
    PreventionConfig {
        mode: PreventionMode::Adaptive,
        strategy: default_static_strategy(),
        thresholds: default_strategy_thresholds(),
        delay_secs: default_delay_secs(),
        honeypot_enabled: true,
        alternate_message: default_alternate_message(),
    }
}

pub fn default_strategy_thresholds() -> StrategyThresholds {
    StrategyThresholds {
        block: default_block_threshold(),
        honeypot: default_honeypot_threshold(),
        alternate: default_alternate_threshold(),
        delay: default_delay_threshold(),
    }
}

pub fn default_client_report_config() -> ClientReportConfig {
    ClientReportConfig {
        path: default_report_path(),
        default_weight: default_report_weight(),
        weights: HashMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Scalar defaults
// ---------------------------------------------------------------------------

pub fn default_true() -> bool {
    true
}

pub fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

pub fn default_max_connections() -> usize {
    10_000
}

pub fn default_upstream_address() -> String {
    "127.0.0.1:3000".to_string()
}

pub fn default_response_timeout_ms() -> u64 {
    30_000
}

pub fn default_log_filter() -> String {
    "info,crawlguard=debug".to_string()
}

pub fn default_log_file() -> String {
    "/var/log/crawlguard/crawlguard.log".to_string()
}

pub fn default_cleanup_interval_secs() -> u64 {
    30
}

pub fn default_detection_threshold() -> u8 {
    60
}

pub fn default_early_exit_score() -> u8 {
    80
}

pub fn default_cache_ttl_secs() -> u64 {
    3600
}

pub fn default_detection_cookie() -> String {
    "crawlguard_verified".to_string()
}

pub fn default_short_window_secs() -> u64 {
    60
}

pub fn default_short_limit() -> u64 {
    30
}

pub fn default_medium_window_secs() -> u64 {
    300
}

pub fn default_medium_limit() -> u64 {
    100
}

pub fn default_burst_window_secs() -> f64 {
    2.0
}

pub fn default_burst_limit() -> u64 {
    5
}

pub fn default_user_agent_ttl_secs() -> u64 {
    1800
}

pub fn default_max_user_agents() -> usize {
    3
}

pub fn default_session_ttl_secs() -> u64 {
    1800
}

pub fn default_sample_limit() -> usize {
    20
}

pub fn default_long_page_height() -> f64 {
    2000.0
}

pub fn default_static_strategy() -> String {
    "delay".to_string()
}

pub fn default_block_threshold() -> u8 {
    90
}

pub fn default_honeypot_threshold() -> u8 {
    75
}

pub fn default_alternate_threshold() -> u8 {
    60
}

pub fn default_delay_threshold() -> u8 {
    40
}

pub fn default_delay_secs() -> f64 {
    2.0
}

pub fn default_alternate_message() -> String {
    "This content is not available to automated clients.".to_string()
}

pub fn default_report_path() -> String {
    "/__crawlguard/report".to_string()
}

pub fn default_report_weight() -> u32 {
    20
}
