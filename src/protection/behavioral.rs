use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::settings::BehavioralConfig;
use crate::config::FingerprintMode;
use crate::models::detection::DetectionResult;
use crate::models::request::{is_static_asset, RequestContext};
use crate::storage::memory::{get_json, put_json, CacheStore};

use super::fingerprint::FingerprintGenerator;
use super::stats;
use super::{Analyzer, AnalyzerError, Step};

pub const PARAM_CLICK_X: &str = "cg_click_x";
pub const PARAM_CLICK_Y: &str = "cg_click_y";
pub const PARAM_SCROLL_Y: &str = "cg_scroll_y";
pub const PARAM_PAGE_HEIGHT: &str = "cg_page_height";
pub const PARAM_LONG_PAGE: &str = "cg_long_page";
pub const PARAM_TYPING_EVENTS: &str = "cg_typing_events";

const RECENT_DWELL_SAMPLES: usize = 5;
const MAX_PAGE_ENTRIES: usize = 50;
const FORM_EVAL_INTERVAL: f64 = 60.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Click {
    x: f64,
    y: f64,
    t: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Scroll {
    y: f64,
    t: f64,
}

/// Interaction history for one visitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VisitorSession {
    page_entries: HashMap<String, f64>,
    dwell_times: Vec<f64>,
    clicks: Vec<Click>,
    scrolls: Vec<Scroll>,
    form_submissions: Vec<f64>,
    typing_events: u64,
    last_form_eval: Option<f64>,
}

/// Per-visitor interaction analysis: page dwell time, click geometry and
/// timing, scroll cadence and form submission habits.
///
/// State is keyed by the address + User-Agent fingerprint regardless of the
/// configured cache fingerprint mode, since a detailed fingerprint changes
/// with every path.
pub struct BehavioralAnalyzer {
    store: Arc<dyn CacheStore>,
    config: BehavioralConfig,
    fingerprints: FingerprintGenerator,
}

impl BehavioralAnalyzer {
    pub fn new(store: Arc<dyn CacheStore>, config: BehavioralConfig) -> Self {
        Self {
            store,
            config,
            fingerprints: FingerprintGenerator::new(FingerprintMode::Basic),
        }
    }

    pub fn evaluate(&self, ctx: &RequestContext) -> Result<DetectionResult, AnalyzerError> {
        let key = format!("behavior:{}", self.fingerprints.generate(ctx));
        let mut session: VisitorSession =
            get_json(self.store.as_ref(), &key)?.unwrap_or_default();
        let mut result = DetectionResult::new();

        self.track_dwell_time(ctx, &mut session, &mut result);
        self.track_clicks(ctx, &mut session, &mut result);
        self.track_scrolling(ctx, &mut session, &mut result);
        self.track_forms(ctx, &mut session, &mut result);

        put_json(
            self.store.as_ref(),
            &key,
            &session,
            Duration::from_secs(self.config.session_ttl_secs),
        )?;

        if result.score() > 0 {
            debug!(
                ip = %ctx.client_ip,
                score = result.score(),
                signals = ?result.signals().keys().collect::<Vec<_>>(),
                "Behavioral anomalies"
            );
        }

        Ok(result)
    }

    fn track_dwell_time(&self, ctx: &RequestContext, session: &mut VisitorSession, result: &mut DetectionResult) {
        if is_static_asset(&ctx.path) {
            return;
        }

        let host = ctx.header("host");
        if let Some(previous) = ctx.referer().and_then(|r| referer_path(r, host)) {
            if previous != ctx.path {
                if let Some(entered) = session.page_entries.get(&previous) {
                    let dwell = ctx.timestamp - entered;
                    if dwell < 1.0 {
                        result.add_signal("short_page_view", dwell, 20.0);
                    }
                    push_bounded(&mut session.dwell_times, dwell, self.config.sample_limit);
                }
            }
        }

        let recent = tail(&session.dwell_times, RECENT_DWELL_SAMPLES);
        if recent.len() >= 3 {
            let mean = stats::mean(recent);
            let cv = stats::coefficient_of_variation(recent);
            if cv < 0.1 && mean > 1.0 {
                result.add_signal("consistent_page_times", cv, 25.0);
            }
        }

        if session.page_entries.len() >= MAX_PAGE_ENTRIES && !session.page_entries.contains_key(&ctx.path) {
            // drop the oldest entry
            if let Some(oldest) = session
                .page_entries
                .iter()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(path, _)| path.clone())
            {
                session.page_entries.remove(&oldest);
            }
        }
        session.page_entries.insert(ctx.path.clone(), ctx.timestamp);
    }

    fn track_clicks(&self, ctx: &RequestContext, session: &mut VisitorSession, result: &mut DetectionResult) {
        let (Some(x), Some(y)) = (ctx.param_f64(PARAM_CLICK_X), ctx.param_f64(PARAM_CLICK_Y)) else {
            return;
        };
        push_bounded(&mut session.clicks, Click { x, y, t: ctx.timestamp }, self.config.sample_limit);

        let collinear = session
            .clicks
            .windows(3)
            .filter(|w| triangle_area(&w[0], &w[1], &w[2]) < 1.0)
            .count();
        if collinear >= 3 {
            result.add_signal("linear_click_pattern", collinear, (collinear as f64 * 8.0).min(40.0));
        }

        let times: Vec<f64> = session.clicks.iter().map(|c| c.t).collect();
        let gaps = stats::intervals(&times);
        if gaps.len() >= 3 {
            let cv = stats::coefficient_of_variation(&gaps);
            if cv < 0.3 {
                result.add_signal("mechanical_click_timing", cv, 30.0);
            }
        }
    }

    fn track_scrolling(&self, ctx: &RequestContext, session: &mut VisitorSession, result: &mut DetectionResult) {
        if let Some(y) = ctx.param_f64(PARAM_SCROLL_Y) {
            push_bounded(&mut session.scrolls, Scroll { y, t: ctx.timestamp }, self.config.sample_limit);

            let times: Vec<f64> = session.scrolls.iter().map(|s| s.t).collect();
            let gaps = stats::intervals(&times);
            if gaps.len() >= 5 {
                let cv = stats::coefficient_of_variation(&gaps);
                if cv < 0.3 {
                    result.add_signal("mechanical_scrolling", cv, 30.0);
                }
            }

            let positions: Vec<f64> = session.scrolls.iter().map(|s| s.y).collect();
            let deltas = stats::intervals(&positions);
            let mut distinct = positions.clone();
            distinct.sort_by(|a, b| a.total_cmp(b));
            distinct.dedup();
            if deltas.len() >= 3
                && distinct.len() >= 3
                && deltas.iter().all(|d| (d - deltas[0]).abs() < f64::EPSILON)
            {
                result.add_signal("identical_scroll_jumps", deltas[0], 30.0);
            }
        }

        let long_page = ctx
            .param_f64(PARAM_PAGE_HEIGHT)
            .is_some_and(|h| h > self.config.long_page_height)
            || ctx
                .param(PARAM_LONG_PAGE)
                .is_some_and(|v| matches!(v, "1" | "true" | "yes"));
        if long_page && session.scrolls.len() < 3 {
            result.add_signal("no_scrolling_long_page", session.scrolls.len(), 35.0);
        }
    }

    fn track_forms(&self, ctx: &RequestContext, session: &mut VisitorSession, result: &mut DetectionResult) {
        if ctx.method != "POST" {
            return;
        }

        push_bounded(&mut session.form_submissions, ctx.timestamp, self.config.sample_limit);
        let typed = ctx
            .param(PARAM_TYPING_EVENTS)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        session.typing_events = session.typing_events.saturating_add(typed);

        let submissions = session.form_submissions.len();
        let due = session
            .last_form_eval
            .map_or(true, |t| ctx.timestamp - t >= FORM_EVAL_INTERVAL);
        if submissions < 2 || !due {
            return;
        }
        session.last_form_eval = Some(ctx.timestamp);

        // Spans shorter than a minute count as one minute.
        let span = ctx.timestamp - session.form_submissions[0];
        let per_minute = submissions as f64 / (span.max(60.0) / 60.0);
        if per_minute > 3.0 {
            result.add_signal("rapid_form_submissions", per_minute, (per_minute * 10.0).min(40.0));
        }

        if submissions > 2 && (session.typing_events as usize) < submissions {
            result.add_signal("submissions_without_typing", session.typing_events, 30.0);
        }
    }
}

impl Analyzer for BehavioralAnalyzer {
    fn name(&self) -> &'static str {
        "behavioral"
    }

    fn analyze(&self, ctx: &RequestContext) -> Result<Step, AnalyzerError> {
        self.evaluate(ctx).map(Step::Continue)
    }
}

/// Path of a same-site referer. Absolute referers only count when their
/// host matches the request's `Host` (port ignored).
fn referer_path(referer: &str, host: Option<&str>) -> Option<String> {
    if referer.starts_with('/') {
        return Some(referer.split('?').next().unwrap_or(referer).to_string());
    }
    let url = url::Url::parse(referer).ok()?;
    let host = host?;
    let request_host = match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };
    url.host_str()
        .filter(|h| h.eq_ignore_ascii_case(request_host))
        .map(|_| url.path().to_string())
}

fn triangle_area(a: &Click, b: &Click, c: &Click) -> f64 {
    (a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y)).abs() / 2.0
}

fn push_bounded<T>(items: &mut Vec<T>, item: T, limit: usize) {
    items.push(item);
    if items.len() > limit.max(1) {
        let excess = items.len() - limit.max(1);
        items.drain(..excess);
    }
}

fn tail(items: &[f64], n: usize) -> &[f64] {
    &items[items.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::defaults::default_behavioral_config;
    use crate::storage::memory::MemoryStore;

    const UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) Safari/605.1.15";

    fn analyzer() -> BehavioralAnalyzer {
        let clock = Arc::new(ManualClock::new(0.0));
        BehavioralAnalyzer::new(Arc::new(MemoryStore::new(clock)), default_behavioral_config())
    }

    fn req(method: &str, path: &str, t: f64) -> RequestContext {
        RequestContext::new("192.0.2.50".parse().unwrap(), method, path, t)
            .with_header("User-Agent", UA)
            .with_header("Host", "shop.example")
    }

    #[test]
    fn test_short_page_view() {
        let a = analyzer();
        a.evaluate(&req("GET", "/", 10.0)).unwrap();
        let result = a
            .evaluate(&req("GET", "/pricing", 10.4).with_header("Referer", "https://shop.example/"))
            .unwrap();
        assert!(result.has_signal("short_page_view"));
        assert_eq!(result.score(), 20);
    }

    #[test]
    fn test_normal_dwell_not_flagged() {
        let a = analyzer();
        a.evaluate(&req("GET", "/", 10.0)).unwrap();
        let result = a
            .evaluate(&req("GET", "/pricing", 25.0).with_header("Referer", "https://shop.example/"))
            .unwrap();
        assert!(!result.has_signal("short_page_view"));
    }

    #[test]
    fn test_static_assets_skip_dwell() {
        let a = analyzer();
        a.evaluate(&req("GET", "/", 10.0)).unwrap();
        let result = a
            .evaluate(&req("GET", "/style.css", 10.1).with_header("Referer", "https://shop.example/"))
            .unwrap();
        assert!(!result.has_signal("short_page_view"));
    }

    #[test]
    fn test_consistent_page_times() {
        let a = analyzer();
        let pages = ["/a", "/b", "/c", "/d", "/e"];
        let mut t = 0.0;
        a.evaluate(&req("GET", pages[0], t)).unwrap();
        let mut last = DetectionResult::new();
        for pair in pages.windows(2) {
            t += 5.0;
            let referer = format!("https://shop.example{}", pair[0]);
            last = a.evaluate(&req("GET", pair[1], t).with_header("Referer", referer)).unwrap();
        }
        assert!(last.has_signal("consistent_page_times"));
        assert!(!last.has_signal("short_page_view"));
    }

    #[test]
    fn test_linear_mechanical_clicks() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for i in 0..5 {
            let x = (i * 10).to_string();
            let y = (i * 20).to_string();
            last = a
                .evaluate(&req("GET", "/app", i as f64 * 2.0).with_param(PARAM_CLICK_X, x).with_param(PARAM_CLICK_Y, y))
                .unwrap();
        }
        assert_eq!(last.signal("linear_click_pattern").and_then(|v| v.as_f64()), Some(3.0));
        assert!(last.has_signal("mechanical_click_timing"));
        assert_eq!(last.score(), 24 + 30);
    }

    #[test]
    fn test_human_clicks() {
        let a = analyzer();
        let clicks = [(12.0, 80.0, 0.0), (340.0, 95.0, 1.7), (200.0, 410.0, 6.1), (55.0, 300.0, 6.9), (500.0, 20.0, 12.4)];
        let mut last = DetectionResult::new();
        for (x, y, t) in clicks {
            last = a
                .evaluate(&req("GET", "/app", t).with_param(PARAM_CLICK_X, x.to_string()).with_param(PARAM_CLICK_Y, y.to_string()))
                .unwrap();
        }
        assert!(!last.has_signal("linear_click_pattern"));
        assert!(!last.has_signal("mechanical_click_timing"));
    }

    #[test]
    fn test_mechanical_identical_scrolling() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for i in 0..6 {
            let y = (i * 400).to_string();
            last = a.evaluate(&req("GET", "/article", i as f64).with_param(PARAM_SCROLL_Y, y)).unwrap();
        }
        assert!(last.has_signal("mechanical_scrolling"));
        assert!(last.has_signal("identical_scroll_jumps"));
    }

    #[test]
    fn test_long_page_without_scrolling() {
        let a = analyzer();
        let result = a
            .evaluate(&req("GET", "/article", 1.0).with_param(PARAM_PAGE_HEIGHT, "4800"))
            .unwrap();
        assert!(result.has_signal("no_scrolling_long_page"));

        let result = a
            .evaluate(&req("GET", "/short", 2.0).with_param(PARAM_PAGE_HEIGHT, "900"))
            .unwrap();
        assert!(!result.has_signal("no_scrolling_long_page"));

        let result = a
            .evaluate(&req("GET", "/hinted", 3.0).with_param(PARAM_LONG_PAGE, "true"))
            .unwrap();
        assert!(result.has_signal("no_scrolling_long_page"));
    }

    #[test]
    fn test_rapid_forms_without_typing() {
        let a = analyzer();
        a.evaluate(&req("POST", "/contact", 0.0)).unwrap();
        let first = a.evaluate(&req("POST", "/contact", 1.0).with_param(PARAM_TYPING_EVENTS, "1")).unwrap();
        assert!(!first.has_signal("rapid_form_submissions"));
        a.evaluate(&req("POST", "/contact", 2.0)).unwrap();
        a.evaluate(&req("POST", "/contact", 3.0)).unwrap();

        // five submissions in 61s, evaluated once the interval has passed
        let last = a.evaluate(&req("POST", "/contact", 61.0)).unwrap();
        assert!(last.has_signal("rapid_form_submissions"));
        assert_eq!(last.score(), 40 + 30);
        assert!(last.has_signal("submissions_without_typing"));
    }

    #[test]
    fn test_typed_forms_not_flagged() {
        let a = analyzer();
        let mut last = DetectionResult::new();
        for (i, t) in [0.0, 90.0, 200.0].into_iter().enumerate() {
            last = a
                .evaluate(&req("POST", "/contact", t).with_param(PARAM_TYPING_EVENTS, "40"))
                .unwrap();
            assert!(!last.has_signal("rapid_form_submissions"), "submission {}", i);
        }
        assert!(!last.has_signal("submissions_without_typing"));
    }

    #[test]
    fn test_referer_path() {
        assert_eq!(referer_path("https://a.example/x/y?q=1", Some("a.example")), Some("/x/y".to_string()));
        assert_eq!(referer_path("https://A.example:8443/x", Some("a.example:8443")), Some("/x".to_string()));
        assert_eq!(referer_path("/local?x", None), Some("/local".to_string()));
        assert_eq!(referer_path("https://google.com/", Some("a.example")), None);
        assert_eq!(referer_path("https://a.example/x", None), None);
        assert_eq!(referer_path("not a url", Some("a.example")), None);
    }

    #[test]
    fn test_external_referer_is_not_a_page_view() {
        let a = analyzer();
        a.evaluate(&req("GET", "/", 10.0)).unwrap();
        let result = a
            .evaluate(&req("GET", "/pricing", 10.4).with_header("Referer", "https://google.com/"))
            .unwrap();
        assert!(!result.has_signal("short_page_view"));
    }
}
