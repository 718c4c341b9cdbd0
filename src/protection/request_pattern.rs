use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::detection::DetectionResult;
use crate::models::request::{is_static_asset, RequestContext};
use crate::storage::memory::{get_json, put_json, CacheStore};

use super::stats;
use super::{Analyzer, AnalyzerError, Step};

const PATH_HISTORY_TTL: Duration = Duration::from_secs(15 * 60);
const PATH_HISTORY_LEN: usize = 20;
const RESOURCE_TTL: Duration = Duration::from_secs(30 * 60);
const RESOURCE_MIN_PAGES: u64 = 5;
const RESOURCE_EVAL_INTERVAL: f64 = 60.0;
const TIMING_TTL: Duration = Duration::from_secs(5 * 60);
const TIMING_SAMPLES: usize = 20;
const TIMING_MIN_SAMPLES: usize = 5;
const DEPTH_TTL: Duration = Duration::from_secs(30 * 60);
const DEPTH_MIN_REQUESTS: u64 = 5;
const DEEP_PAGE_DEPTH: usize = 4;
const MAX_REFERER_DOMAINS: usize = 20;

/// What a path fetches, for resource-ratio accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Page,
    Css,
    Js,
    Image,
    OtherStatic,
    Api,
}

impl ResourceKind {
    pub fn classify(path: &str) -> Self {
        let p = path.to_lowercase();
        if p.starts_with("/api/") || p.contains("/api/") || p.ends_with(".json") || p.ends_with(".xml") {
            return ResourceKind::Api;
        }
        if p.ends_with(".css") {
            return ResourceKind::Css;
        }
        if p.ends_with(".js") || p.ends_with(".mjs") {
            return ResourceKind::Js;
        }
        const IMAGES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".avif"];
        if IMAGES.iter().any(|ext| p.ends_with(ext)) {
            return ResourceKind::Image;
        }
        if is_static_asset(&p) {
            return ResourceKind::OtherStatic;
        }
        ResourceKind::Page
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ResourceTally {
    pages: u64,
    css: u64,
    js: u64,
    images: u64,
    other_static: u64,
    last_evaluated: Option<f64>,
}

impl ResourceTally {
    fn record(&mut self, kind: ResourceKind) {
        match kind {
            ResourceKind::Page => self.pages += 1,
            ResourceKind::Css => self.css += 1,
            ResourceKind::Js => self.js += 1,
            ResourceKind::Image => self.images += 1,
            ResourceKind::OtherStatic => self.other_static += 1,
            ResourceKind::Api => {}
        }
    }

    fn static_total(&self) -> u64 {
        self.css + self.js + self.images + self.other_static
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DepthProfile {
    total: u64,
    deep: u64,
    referer_seen: bool,
    referer_domains: Vec<String>,
}

/// Per-IP request pattern analysis: sequential enumeration, missing page
/// resources, machine-like request timing and unnatural navigation depth.
pub struct RequestPatternAnalyzer {
    store: Arc<dyn CacheStore>,
}

impl RequestPatternAnalyzer {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn evaluate(&self, ctx: &RequestContext) -> Result<DetectionResult, AnalyzerError> {
        let mut result = DetectionResult::new();
        let kind = ResourceKind::classify(&ctx.path);

        self.check_sequential_access(ctx, kind, &mut result)?;
        self.check_resource_ratio(ctx, kind, &mut result)?;
        self.check_request_speed(ctx, &mut result)?;
        if kind == ResourceKind::Page {
            self.check_navigation_depth(ctx, &mut result)?;
        }

        Ok(result)
    }

    fn check_sequential_access(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        result: &mut DetectionResult,
    ) -> Result<(), AnalyzerError> {
        if !matches!(kind, ResourceKind::Page | ResourceKind::Api) {
            return Ok(());
        }

        let key = key(ctx.client_ip, "paths");
        let mut paths: Vec<String> = get_json(self.store.as_ref(), &key)?.unwrap_or_default();
        paths.push(ctx.path.clone());
        if paths.len() > PATH_HISTORY_LEN {
            let excess = paths.len() - PATH_HISTORY_LEN;
            paths.drain(..excess);
        }
        put_json(self.store.as_ref(), &key, &paths, PATH_HISTORY_TTL)?;

        let numeric = longest_numeric_run(&paths);
        if numeric >= 3 {
            debug!(ip = %ctx.client_ip, run = numeric, "Sequential numeric path access");
            result.add_signal("sequential_numeric_access", numeric, (numeric as f64 * 10.0).min(40.0));
        }

        let alpha = longest_alpha_run(&paths);
        if alpha >= 3 {
            debug!(ip = %ctx.client_ip, run = alpha, "Sequential alphabetic path access");
            result.add_signal("sequential_alpha_access", alpha, (alpha as f64 * 10.0).min(40.0));
        }

        Ok(())
    }

    fn check_resource_ratio(
        &self,
        ctx: &RequestContext,
        kind: ResourceKind,
        result: &mut DetectionResult,
    ) -> Result<(), AnalyzerError> {
        let key = key(ctx.client_ip, "resources");
        let mut tally: ResourceTally = get_json(self.store.as_ref(), &key)?.unwrap_or_default();
        tally.record(kind);

        let due = tally
            .last_evaluated
            .map_or(true, |t| ctx.timestamp - t >= RESOURCE_EVAL_INTERVAL);

        if tally.pages >= RESOURCE_MIN_PAGES && due {
            tally.last_evaluated = Some(ctx.timestamp);

            if tally.css == 0 {
                result.add_signal("missing_css_requests", true, 25.0);
            }
            if tally.js == 0 {
                result.add_signal("missing_js_requests", true, 25.0);
            }
            if tally.images == 0 {
                result.add_signal("missing_image_requests", true, 20.0);
            }

            let ratio = tally.static_total() as f64 / tally.pages as f64;
            if ratio < 0.5 {
                result.add_signal("low_resource_ratio", ratio, 30.0);
            }

            debug!(
                ip = %ctx.client_ip,
                pages = tally.pages,
                static_total = tally.static_total(),
                ratio = ratio,
                entropy = stats::shannon_entropy(&[tally.pages, tally.css, tally.js, tally.images, tally.other_static]),
                "Resource ratio evaluated"
            );
        }

        put_json(self.store.as_ref(), &key, &tally, RESOURCE_TTL)?;
        Ok(())
    }

    fn check_request_speed(
        &self,
        ctx: &RequestContext,
        result: &mut DetectionResult,
    ) -> Result<(), AnalyzerError> {
        let key = key(ctx.client_ip, "timing");
        let mut times: Vec<f64> = get_json(self.store.as_ref(), &key)?.unwrap_or_default();
        times.push(ctx.timestamp);
        if times.len() > TIMING_SAMPLES {
            let excess = times.len() - TIMING_SAMPLES;
            times.drain(..excess);
        }
        put_json(self.store.as_ref(), &key, &times, TIMING_TTL)?;

        if times.len() < TIMING_MIN_SAMPLES {
            return Ok(());
        }

        let gaps = stats::intervals(&times);
        let mean = stats::mean(&gaps);
        if mean < 0.5 {
            debug!(ip = %ctx.client_ip, mean_interval = mean, "Rapid request rate");
            result.add_signal("rapid_requests", mean, (50.0 * (0.5 - mean)).min(50.0));
        }

        if gaps.len() >= 5 {
            let cv = stats::coefficient_of_variation(&gaps);
            if cv < 0.1 {
                debug!(ip = %ctx.client_ip, cv = cv, "Consistent request timing");
                result.add_signal("consistent_timing", cv, 35.0);
            }
        }

        Ok(())
    }

    fn check_navigation_depth(
        &self,
        ctx: &RequestContext,
        result: &mut DetectionResult,
    ) -> Result<(), AnalyzerError> {
        let key = key(ctx.client_ip, "depth");
        let mut profile: DepthProfile = get_json(self.store.as_ref(), &key)?.unwrap_or_default();

        profile.total += 1;
        if path_depth(&ctx.path) >= DEEP_PAGE_DEPTH {
            profile.deep += 1;
        }
        if let Some(referer) = ctx.referer() {
            profile.referer_seen = true;
            if let Some(domain) = referer_domain(referer) {
                if !profile.referer_domains.contains(&domain)
                    && profile.referer_domains.len() < MAX_REFERER_DOMAINS
                {
                    profile.referer_domains.push(domain);
                }
            }
        }
        put_json(self.store.as_ref(), &key, &profile, DEPTH_TTL)?;

        if profile.total < DEPTH_MIN_REQUESTS {
            return Ok(());
        }

        let ratio = profile.deep as f64 / profile.total as f64;
        if profile.total >= 10 && ratio > 0.7 {
            debug!(ip = %ctx.client_ip, ratio = ratio, "Deep page ratio");
            result.add_signal("deep_page_ratio", ratio, (ratio * 50.0).min(35.0));
        }

        if !profile.referer_seen && profile.total > 5 {
            result.add_signal("no_referers", profile.total, 15.0);
        }

        if profile.referer_domains.len() > 3 && profile.total < 10 {
            result.add_signal("multiple_referer_domains", profile.referer_domains.len(), 20.0);
        }

        Ok(())
    }
}

impl Analyzer for RequestPatternAnalyzer {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn analyze(&self, ctx: &RequestContext) -> Result<Step, AnalyzerError> {
        self.evaluate(ctx).map(Step::Continue)
    }
}

fn key(ip: IpAddr, kind: &str) -> String {
    format!("pattern:{}:{}", kind, ip)
}

fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

fn referer_domain(referer: &str) -> Option<String> {
    url::Url::parse(referer)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Splits a path around its last run of ASCII digits.
fn numeric_template(path: &str) -> Option<(String, u64)> {
    let bytes = path.as_bytes();
    let end = bytes.iter().rposition(|b| b.is_ascii_digit())? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map_or(0, |i| i + 1);
    let value = path[start..end].parse::<u64>().ok()?;
    let template = format!("{}#{}", &path[..start], &path[end..]);
    Some((template, value))
}

/// Splits a path whose final segment is a single ASCII letter.
fn alpha_template(path: &str) -> Option<(String, char)> {
    let trimmed = path.trim_end_matches('/');
    let (prefix, last) = trimmed.rsplit_once('/')?;
    let mut chars = last.chars();
    let c = chars.next()?;
    if chars.next().is_some() || !c.is_ascii_alphabetic() {
        return None;
    }
    Some((prefix.to_string(), c.to_ascii_lowercase()))
}

fn longest_run<T>(keys: &[Option<(String, T)>], is_next: impl Fn(&T, &T) -> bool) -> usize {
    let mut best = 0;
    let mut run = 0;
    for pair in keys.windows(2) {
        match (&pair[0], &pair[1]) {
            (Some((ta, a)), Some((tb, b))) if ta == tb && is_next(a, b) => {
                run += 1;
                best = best.max(run);
            }
            _ => run = 0,
        }
    }
    best
}

fn longest_numeric_run(paths: &[String]) -> usize {
    let keys: Vec<_> = paths.iter().map(|p| numeric_template(p)).collect();
    longest_run(&keys, |a, b| a.checked_add(1) == Some(*b))
}

fn longest_alpha_run(paths: &[String]) -> usize {
    let keys: Vec<_> = paths.iter().map(|p| alpha_template(p)).collect();
    longest_run(&keys, |a, b| (*a as u8).checked_add(1) == Some(*b as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::MemoryStore;

    const IP: &str = "203.0.113.20";

    fn analyzer() -> RequestPatternAnalyzer {
        let clock = Arc::new(ManualClock::new(10_000.0));
        RequestPatternAnalyzer::new(Arc::new(MemoryStore::new(clock)))
    }

    fn req(path: &str, t: f64) -> RequestContext {
        RequestContext::new(IP.parse().unwrap(), "GET", path, t)
    }

    #[test]
    fn test_numeric_template() {
        assert_eq!(numeric_template("/item/41"), Some(("/item/#".to_string(), 41)));
        assert_eq!(numeric_template("/p/7/edit"), Some(("/p/#/edit".to_string(), 7)));
        assert_eq!(numeric_template("/about"), None);
    }

    #[test]
    fn test_alpha_template() {
        assert_eq!(alpha_template("/dir/b"), Some(("/dir".to_string(), 'b')));
        assert_eq!(alpha_template("/dir/C/"), Some(("/dir".to_string(), 'c')));
        assert_eq!(alpha_template("/dir/ab"), None);
        assert_eq!(alpha_template("/dir/1"), None);
    }

    #[test]
    fn test_sequential_numeric_access() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for (i, n) in (10..=14).enumerate() {
            last = a.evaluate(&req(&format!("/article/{}", n), i as f64 * 3.0)).unwrap();
        }
        assert!(last.has_signal("sequential_numeric_access"));
        assert_eq!(last.signal("sequential_numeric_access").unwrap().as_f64(), Some(4.0));
    }

    #[test]
    fn test_non_sequential_numbers_ignored() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for (i, n) in [3, 9, 4, 20, 21].iter().enumerate() {
            last = a.evaluate(&req(&format!("/article/{}", n), i as f64 * 3.0)).unwrap();
        }
        assert!(!last.has_signal("sequential_numeric_access"));
    }

    #[test]
    fn test_sequential_alpha_access() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for (i, l) in ["a", "b", "c", "d"].iter().enumerate() {
            last = a.evaluate(&req(&format!("/glossary/{}", l), i as f64 * 3.0)).unwrap();
        }
        assert!(last.has_signal("sequential_alpha_access"));
    }

    #[test]
    fn test_missing_resources_flagged_once_per_minute() {
        let a = analyzer();
        let mut results = Vec::new();
        for i in 0..6 {
            results.push(a.evaluate(&req(&format!("/page-{}", ["x", "y", "z", "w", "v", "u"][i]), i as f64 * 2.0)).unwrap());
        }
        // fifth page view triggers the evaluation
        let fifth = &results[4];
        assert!(fifth.has_signal("missing_css_requests"));
        assert!(fifth.has_signal("missing_js_requests"));
        assert!(fifth.has_signal("missing_image_requests"));
        assert!(fifth.has_signal("low_resource_ratio"));
        // sixth is inside the 60s re-evaluation window
        assert!(!results[5].has_signal("missing_css_requests"));
    }

    #[test]
    fn test_resources_present_not_flagged() {
        let a = analyzer();
        let mut t = 0.0;
        let mut last = DetectionResult::new();
        for page in ["/p-a", "/p-b", "/p-c", "/p-d", "/p-e"] {
            for asset in ["/s.css", "/app.js", "/logo.png"] {
                a.evaluate(&req(asset, t)).unwrap();
                t += 2.0;
            }
            last = a.evaluate(&req(page, t)).unwrap();
            t += 2.0;
        }
        assert!(!last.has_signal("missing_css_requests"));
        assert!(!last.has_signal("low_resource_ratio"));
    }

    #[test]
    fn test_api_paths_are_not_pages() {
        assert_eq!(ResourceKind::classify("/api/v1/items"), ResourceKind::Api);
        assert_eq!(ResourceKind::classify("/feed.xml"), ResourceKind::Api);
        assert_eq!(ResourceKind::classify("/fonts/a.woff2"), ResourceKind::OtherStatic);
        assert_eq!(ResourceKind::classify("/blog/post"), ResourceKind::Page);
    }

    #[test]
    fn test_rapid_and_consistent_timing() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for i in 0..7 {
            last = a.evaluate(&req("/api/poll", 100.0 + i as f64 * 0.1)).unwrap();
        }
        assert!(last.has_signal("rapid_requests"));
        assert!(last.has_signal("consistent_timing"));
    }

    #[test]
    fn test_irregular_slow_timing_not_flagged() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for t in [0.0, 3.0, 4.5, 11.0, 12.0, 30.0, 31.5] {
            last = a.evaluate(&req("/api/poll", t)).unwrap();
        }
        assert!(!last.has_signal("rapid_requests"));
        assert!(!last.has_signal("consistent_timing"));
    }

    #[test]
    fn test_deep_pages_without_referers() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for i in 0..10 {
            last = a
                .evaluate(&req(&format!("/docs/guide/part/section-{}", ["q", "r", "s", "t", "u", "v", "w", "x", "y", "z"][i]), i as f64 * 5.0))
                .unwrap();
        }
        assert!(last.has_signal("deep_page_ratio"));
        assert!(last.has_signal("no_referers"));
    }

    #[test]
    fn test_many_referer_domains() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for (i, host) in ["a.example", "b.example", "c.example", "d.example", "e.example"].iter().enumerate() {
            let ctx = req(&format!("/landing-{}", host), i as f64 * 5.0)
                .with_header("Referer", format!("https://{}/x", host));
            last = a.evaluate(&ctx).unwrap();
        }
        assert!(last.has_signal("multiple_referer_domains"));
        assert!(!last.has_signal("no_referers"));
    }

    #[test]
    fn test_path_depth() {
        assert_eq!(path_depth("/"), 0);
        assert_eq!(path_depth("/a/b/c/d"), 4);
        assert_eq!(path_depth("//a//b/"), 2);
    }
}
