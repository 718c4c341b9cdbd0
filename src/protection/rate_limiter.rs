use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::settings::RateLimitConfig;
use crate::models::detection::DetectionResult;
use crate::models::request::RequestContext;
use crate::storage::memory::{get_json, put_json, CacheStore};

use super::fingerprint::hash_parts;
use super::{Analyzer, AnalyzerError, Step};

/// Cap on the per-IP user-agent list so a rotating client can't grow it unbounded.
const MAX_TRACKED_AGENTS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BurstWindow {
    count: u64,
    start: f64,
}

/// Multi-window request rate analysis.
///
/// Counters are keyed by a hash of client address and User-Agent, so two
/// browsers behind one NAT are tracked separately. The distinct User-Agent
/// count is keyed by address alone. Results are recomputed on every call and
/// never cached by fingerprint.
pub struct RateLimitAnalyzer {
    store: Arc<dyn CacheStore>,
    config: RateLimitConfig,
}

impl RateLimitAnalyzer {
    pub fn new(store: Arc<dyn CacheStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn evaluate(&self, ctx: &RequestContext) -> Result<DetectionResult, AnalyzerError> {
        let mut result = DetectionResult::new();
        let ip = ctx.client_ip.to_string();
        let identity = hash_parts(&[&ip, ctx.user_agent()]);

        // Fixed windows: the counter keeps the expiry it was created with.
        let short = self.store.increment(
            &format!("rate:short:{}", identity),
            Duration::from_secs(self.config.short_window_secs),
        )?;
        if short > self.config.short_limit {
            let overage = (short - self.config.short_limit) as f64;
            debug!(ip = %ctx.client_ip, count = short, "Short window rate exceeded");
            result.add_signal("high_request_rate", short, (2.0 * overage).min(50.0));
        }

        let medium = self.store.increment(
            &format!("rate:medium:{}", identity),
            Duration::from_secs(self.config.medium_window_secs),
        )?;
        if medium > self.config.medium_limit {
            let overage = (medium - self.config.medium_limit) as f64;
            debug!(ip = %ctx.client_ip, count = medium, "Medium window rate exceeded");
            result.add_signal("sustained_request_rate", medium, overage.min(40.0));
        }

        let burst = self.record_burst(&identity, ctx.timestamp)?;
        if burst > self.config.burst_limit {
            let overage = (burst - self.config.burst_limit) as f64;
            debug!(ip = %ctx.client_ip, count = burst, "Request burst detected");
            result.add_signal("request_bursting", burst, (15.0 * overage).min(60.0));
        }

        let agents = self.record_user_agent(&ip, ctx.user_agent())?;
        if agents > self.config.max_user_agents {
            let excess = (agents - self.config.max_user_agents) as f64;
            debug!(ip = %ctx.client_ip, agents = agents, "Multiple User-Agents from one address");
            result.add_signal("multiple_user_agents", agents, (15.0 * excess).min(40.0));
        }

        Ok(result)
    }

    /// Advance the counters without producing a score. Used when a cached
    /// detection answers the request so rates still reflect real traffic.
    pub fn observe(&self, ctx: &RequestContext) -> Result<(), AnalyzerError> {
        self.evaluate(ctx).map(|_| ())
    }

    fn record_burst(&self, identity: &str, now: f64) -> Result<u64, AnalyzerError> {
        let key = format!("rate:burst:{}", identity);
        let window = self.config.burst_window_secs;

        let burst = match get_json::<BurstWindow>(self.store.as_ref(), &key)? {
            Some(mut w) if now - w.start <= window => {
                w.count += 1;
                w
            }
            _ => BurstWindow { count: 1, start: now },
        };

        put_json(
            self.store.as_ref(),
            &key,
            &burst,
            Duration::from_secs_f64(window.max(0.0) + 1.0),
        )?;
        Ok(burst.count)
    }

    fn record_user_agent(&self, ip: &str, user_agent: &str) -> Result<usize, AnalyzerError> {
        let key = format!("rate:agents:{}", ip);
        let mut agents: Vec<String> = get_json(self.store.as_ref(), &key)?.unwrap_or_default();

        if !agents.iter().any(|a| a == user_agent) && agents.len() < MAX_TRACKED_AGENTS {
            agents.push(user_agent.to_string());
        }

        put_json(
            self.store.as_ref(),
            &key,
            &agents,
            Duration::from_secs(self.config.user_agent_ttl_secs),
        )?;
        Ok(agents.len())
    }
}

impl Analyzer for RateLimitAnalyzer {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn analyze(&self, ctx: &RequestContext) -> Result<Step, AnalyzerError> {
        self.evaluate(ctx).map(Step::Continue)
    }
}
