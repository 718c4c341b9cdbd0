use std::sync::Arc;

use tracing::debug;

use crate::models::detection::DetectionResult;
use crate::models::request::RequestContext;

use super::known_crawlers::{known_crawler_result, CrawlerMatch, KnownCrawlers};
use super::{Analyzer, AnalyzerError, Step};

/// Coarse device class derived from the User-Agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceClass {
    pub fn from_user_agent(ua: &str) -> Self {
        let lower = ua.to_lowercase();
        let android = lower.contains("android");
        if lower.contains("ipad")
            || lower.contains("tablet")
            || (android && !lower.contains("mobile"))
        {
            return DeviceClass::Tablet;
        }
        if lower.contains("mobi") || lower.contains("iphone") || lower.contains("ipod") || android {
            return DeviceClass::Mobile;
        }
        DeviceClass::Desktop
    }
}

/// Stateless header rule table.
///
/// Each rule adds independently. A missing User-Agent ends the rule table
/// early, and a known AI crawler ends the whole pipeline.
pub struct HeaderAnalyzer {
    crawlers: Arc<KnownCrawlers>,
}

impl HeaderAnalyzer {
    pub fn new(crawlers: Arc<KnownCrawlers>) -> Self {
        Self { crawlers }
    }

    pub fn evaluate(&self, ctx: &RequestContext) -> Step {
        let mut result = DetectionResult::new();
        let ua = ctx.user_agent();

        // Rule 1: missing User-Agent
        if ua.trim().is_empty() {
            debug!(ip = %ctx.client_ip, "Missing User-Agent header");
            result.add_signal("missing_user_agent", true, 80.0);
            return Step::Continue(result);
        }

        // Rules 2-3: known bots
        match self.crawlers.check(ua) {
            CrawlerMatch::AiCrawler(name) => {
                debug!(ip = %ctx.client_ip, crawler = %name, "Known AI crawler User-Agent");
                return Step::Terminal(known_crawler_result(&name));
            }
            CrawlerMatch::Bot(name) => {
                debug!(ip = %ctx.client_ip, bot = %name, "Known non-AI bot User-Agent");
                result.add_signal("known_bot", name, 30.0);
            }
            CrawlerMatch::None => {}
        }

        let device = DeviceClass::from_user_agent(ua);
        let desktop_browser = device == DeviceClass::Desktop && is_desktop_browser(ua);
        let accept = ctx.header("accept").unwrap_or("");

        // Rule 4: browser without the headers every browser sends
        if desktop_browser {
            let missing: Vec<&str> = ["accept", "accept-language", "accept-encoding"]
                .into_iter()
                .filter(|h| ctx.header(h).map_or(true, |v| v.is_empty()))
                .collect();
            if !missing.is_empty() {
                debug!(ip = %ctx.client_ip, missing = ?missing, "Browser UA but missing standard headers");
                result.add_signal("missing_browser_headers", missing.join(","), 40.0);
            }
        }

        // Rule 5: browser with a scripted-client Accept value
        if desktop_browser {
            let trimmed = accept.trim();
            if trimmed == "*/*" || trimmed == "text/html" {
                debug!(ip = %ctx.client_ip, accept = %trimmed, "Browser UA with generic Accept header");
                result.add_signal("generic_accept_header", trimmed, 30.0);
            }
        }

        // Rule 6: mobile browser without the AJAX marker
        if device == DeviceClass::Mobile && ctx.header("x-requested-with").is_none() {
            debug!(ip = %ctx.client_ip, "Mobile UA without X-Requested-With");
            result.add_signal("mobile_missing_ajax_header", true, 20.0);
        }

        // Rule 7: forwarded without a proxy Via header
        if ctx.header("x-forwarded-for").is_some() && ctx.header("via").is_none() {
            debug!(ip = %ctx.client_ip, "X-Forwarded-For without Via");
            result.add_signal("forwarded_without_via", true, 15.0);
        }

        // Rule 8: overly simple Accept header
        if accept.len() < 10 || !accept.contains(',') {
            debug!(ip = %ctx.client_ip, accept = %accept, "Simple Accept header");
            result.add_signal("simple_accept_header", accept, 25.0);
        }

        // Rule 9: state-changing request from a client that never got the cookie
        if !ctx.is_get() && !ctx.has_detection_cookie {
            debug!(ip = %ctx.client_ip, method = %ctx.method, "Non-GET request without detection cookie");
            result.add_signal("non_get_without_cookie", ctx.method.as_str(), 10.0);
        }

        Step::Continue(result)
    }
}

impl Analyzer for HeaderAnalyzer {
    fn name(&self) -> &'static str {
        "header"
    }

    fn analyze(&self, ctx: &RequestContext) -> Result<Step, AnalyzerError> {
        Ok(self.evaluate(ctx))
    }
}

fn is_desktop_browser(ua: &str) -> bool {
    let lower = ua.to_lowercase();
    lower.contains("mozilla/5.0")
        && (lower.contains("chrome")
            || lower.contains("firefox")
            || lower.contains("safari")
            || lower.contains("edg/"))
}
