use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::settings::Settings;
use crate::config::FingerprintMode;
use crate::models::detection::DetectionResult;
use crate::models::request::RequestContext;
use crate::storage::memory::{get_json, put_json, CacheStore};

use super::behavioral::BehavioralAnalyzer;
use super::fingerprint::FingerprintGenerator;
use super::header_analysis::HeaderAnalyzer;
use super::known_crawlers::{BotClassifier, KnownCrawlers, PatternBotClassifier};
use super::rate_limiter::RateLimitAnalyzer;
use super::request_pattern::RequestPatternAnalyzer;
use super::Analyzer;

/// Orchestrates detection for one request.
///
/// Order of evaluation:
/// 1. Fingerprint lookup in the detection cache. A hit is returned as-is,
///    only advancing the rate counters.
/// 2. Known AI crawler fast path.
/// 3. Enabled analyzers in order: header, pattern, rate_limit, behavioral.
///    A terminal step or a merged score at the early-exit level stops here.
/// 4. The final result is cached under the fingerprint.
///
/// Store failures never fail the request: a broken cache read is treated as
/// a miss and a broken write is skipped.
pub struct DetectionPipeline {
    store: Arc<dyn CacheStore>,
    fingerprints: FingerprintGenerator,
    visitors: FingerprintGenerator,
    crawlers: Arc<KnownCrawlers>,
    analyzers: Vec<Arc<dyn Analyzer>>,
    rate_limiter: Option<Arc<RateLimitAnalyzer>>,
    threshold: u8,
    early_exit_score: u8,
    cache_ttl: Duration,
}

impl DetectionPipeline {
    pub fn new(settings: &Settings, store: Arc<dyn CacheStore>, classifier: Arc<dyn BotClassifier>) -> Self {
        let detection = &settings.detection;
        let toggles = &detection.analyzers;
        let crawlers = Arc::new(KnownCrawlers::new(&detection.extra_crawler_signatures, classifier));

        let mut analyzers: Vec<Arc<dyn Analyzer>> = Vec::with_capacity(4);
        let mut rate_limiter = None;

        if toggles.header {
            analyzers.push(Arc::new(HeaderAnalyzer::new(crawlers.clone())));
        }
        if toggles.pattern {
            analyzers.push(Arc::new(RequestPatternAnalyzer::new(store.clone())));
        }
        if toggles.rate_limit {
            let limiter = Arc::new(RateLimitAnalyzer::new(store.clone(), settings.rate_limit.clone()));
            rate_limiter = Some(limiter.clone());
            analyzers.push(limiter);
        }
        if toggles.behavioral {
            analyzers.push(Arc::new(BehavioralAnalyzer::new(store.clone(), settings.behavioral.clone())));
        }

        info!(
            analyzers = ?analyzers.iter().map(|a| a.name()).collect::<Vec<_>>(),
            threshold = detection.threshold,
            fingerprint_mode = ?detection.fingerprint_mode,
            "Detection pipeline initialized"
        );

        Self {
            store,
            fingerprints: FingerprintGenerator::new(detection.fingerprint_mode),
            visitors: FingerprintGenerator::new(FingerprintMode::Basic),
            crawlers,
            analyzers,
            rate_limiter,
            threshold: detection.threshold,
            early_exit_score: detection.early_exit_score,
            cache_ttl: Duration::from_secs(detection.cache_ttl_secs),
        }
    }

    /// Pipeline with the built-in substring bot classifier.
    pub fn from_settings(settings: &Settings, store: Arc<dyn CacheStore>) -> Self {
        Self::new(settings, store, Arc::new(PatternBotClassifier))
    }

    /// Replace the analyzer chain. Rate counters are still advanced on
    /// cache hits if the built-in rate limiter was enabled.
    pub fn with_analyzers(mut self, analyzers: Vec<Arc<dyn Analyzer>>) -> Self {
        self.analyzers = analyzers;
        self
    }

    pub fn analyzer_names(&self) -> Vec<&'static str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    pub fn fingerprint(&self, ctx: &RequestContext) -> String {
        self.fingerprints.generate(ctx)
    }

    /// Detection cache key of the page view `page` describes.
    ///
    /// In detailed mode the key depends on the navigation's own Accept
    /// headers, which a later request from the same visitor does not repeat,
    /// so the key recorded when the page was scored is used when present.
    pub fn page_cache_key(&self, page: &RequestContext) -> String {
        if self.fingerprints.mode() == FingerprintMode::Detailed {
            match get_json::<String>(self.store.as_ref(), &self.page_view_key(page)) {
                Ok(Some(key)) => return key,
                Ok(None) => {}
                Err(e) => warn!(ip = %page.client_ip, error = %e, "Page view lookup failed"),
            }
        }
        detection_cache_key(&self.fingerprint(page))
    }

    fn page_view_key(&self, page: &RequestContext) -> String {
        format!("pageview:{}:{}", self.visitors.generate(page), page.path)
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    pub fn detect(&self, ctx: &RequestContext) -> DetectionResult {
        let fingerprint = self.fingerprint(ctx);
        let cache_key = detection_cache_key(&fingerprint);

        match get_json::<DetectionResult>(self.store.as_ref(), &cache_key) {
            Ok(Some(cached)) => {
                if let Some(limiter) = &self.rate_limiter {
                    if let Err(e) = limiter.observe(ctx) {
                        warn!(ip = %ctx.client_ip, error = %e, "Failed to advance rate counters");
                    }
                }
                debug!(ip = %ctx.client_ip, score = cached.score(), "Detection cache hit");
                return cached;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(ip = %ctx.client_ip, error = %e, "Detection cache unavailable, scoring uncached");
            }
        }

        if let Some(result) = self.crawlers.fast_path(ctx.user_agent()) {
            return self.finish(ctx, &cache_key, result.with_threshold(self.threshold));
        }

        let mut result = DetectionResult::new().with_threshold(self.threshold);

        for analyzer in &self.analyzers {
            match analyzer.analyze(ctx) {
                Ok(step) => {
                    let terminal = step.is_terminal();
                    result.merge(step.into_result());

                    if terminal || result.score() >= self.early_exit_score {
                        debug!(
                            ip = %ctx.client_ip,
                            analyzer = analyzer.name(),
                            score = result.score(),
                            "Early exit"
                        );
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        ip = %ctx.client_ip,
                        user_agent = %ctx.user_agent(),
                        analyzer = analyzer.name(),
                        error = %e,
                        "Analyzer failed, skipping"
                    );
                }
            }
        }

        self.finish(ctx, &cache_key, result)
    }

    fn finish(&self, ctx: &RequestContext, cache_key: &str, result: DetectionResult) -> DetectionResult {
        if let Err(e) = put_json(self.store.as_ref(), cache_key, &result, self.cache_ttl) {
            warn!(ip = %ctx.client_ip, error = %e, "Failed to cache detection result");
        }

        if self.fingerprints.mode() == FingerprintMode::Detailed && ctx.is_get() {
            if let Err(e) = put_json(self.store.as_ref(), &self.page_view_key(ctx), &cache_key, self.cache_ttl) {
                warn!(ip = %ctx.client_ip, error = %e, "Failed to record page view");
            }
        }

        if result.is_detected() {
            info!(
                ip = %ctx.client_ip,
                user_agent = %ctx.user_agent(),
                path = %ctx.path,
                score = result.score(),
                confidence = %result.confidence(),
                top_signals = ?result.top_signals(3),
                "Crawler detected"
            );
        } else {
            debug!(ip = %ctx.client_ip, score = result.score(), "Request scored");
        }

        result
    }
}

pub fn detection_cache_key(fingerprint: &str) -> String {
    format!("detection:{}", fingerprint)
}
