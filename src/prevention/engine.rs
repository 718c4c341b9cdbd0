use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::settings::{PreventionConfig, StrategyThresholds};
use crate::config::PreventionMode;
use crate::models::detection::DetectionResult;
use crate::models::request::RequestContext;

use super::content::ContentProtector;
use super::honeypot::HoneypotGenerator;
use super::strategy::Strategy;

pub const ROBOTS_HEADER: &str = "x-robots-tag";
pub const ROBOTS_HEADER_VALUE: &str = "noindex, nofollow";
pub const PROTECTION_HEADER: &str = "x-crawlguard-protection";
pub const BLOCKED_BODY: &str = "Blocked";
/// Lower bound on the configured delay.
pub const MIN_DELAY_SECS: f64 = 0.5;

/// What detection concluded about a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub score: u8,
    pub detected: bool,
}

impl Assessment {
    pub fn new(score: u8, detected: bool) -> Self {
        Self { score, detected }
    }

    pub fn of(result: &DetectionResult) -> Self {
        Self::new(result.score(), result.is_detected())
    }
}

/// Strategy that was applied and the response to send.
#[derive(Debug)]
pub struct PreventionDecision {
    pub strategy: Strategy,
    pub response: Response<Full<Bytes>>,
}

/// Maps detection scores to a response strategy and carries it out.
///
/// In adaptive mode the score selects the strategy through the configured
/// thresholds. In static mode the configured strategy applies to every
/// detected request.
pub struct PreventionEngine {
    mode: PreventionMode,
    static_strategy: Strategy,
    thresholds: StrategyThresholds,
    min_delay: Duration,
    alternate_message: String,
    protector: Arc<dyn ContentProtector>,
    honeypot: Option<Arc<dyn HoneypotGenerator>>,
}

impl PreventionEngine {
    pub fn new(
        config: &PreventionConfig,
        protector: Arc<dyn ContentProtector>,
        honeypot: Option<Arc<dyn HoneypotGenerator>>,
    ) -> Self {
        let static_strategy = Strategy::from_name(&config.strategy).unwrap_or_else(|| {
            warn!(strategy = %config.strategy, "Unknown prevention strategy, using delay");
            Strategy::Delay
        });

        Self {
            mode: config.mode,
            static_strategy,
            thresholds: config.thresholds.clone(),
            min_delay: Duration::from_secs_f64(config.delay_secs.max(MIN_DELAY_SECS)),
            alternate_message: config.alternate_message.clone(),
            protector,
            honeypot: if config.honeypot_enabled { honeypot } else { None },
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn mode(&self) -> PreventionMode {
        self.mode
    }

    /// Score to hand to [`execute`](Self::execute) for a detection result.
    /// Static mode only reacts to detected requests.
    pub fn score_for(&self, detected: bool, score: u8) -> Option<u8> {
        match self.mode {
            PreventionMode::Adaptive => Some(score),
            PreventionMode::Static => detected.then_some(score),
        }
    }

    /// Pick the strategy for a score. `None` means the request was not
    /// scored, or in static mode that it was not detected.
    pub fn select_strategy(&self, score: Option<u8>) -> Strategy {
        let chosen = match self.mode {
            PreventionMode::Static => match score {
                Some(_) => self.static_strategy,
                None => Strategy::Monitor,
            },
            PreventionMode::Adaptive => match score {
                None => Strategy::Monitor,
                Some(s) if s >= self.thresholds.block => Strategy::Block,
                Some(s) if s >= self.thresholds.honeypot => Strategy::Honeypot,
                Some(s) if s >= self.thresholds.alternate => Strategy::AlternateContent,
                Some(s) if s >= self.thresholds.delay => Strategy::Delay,
                Some(_) => Strategy::Monitor,
            },
        };

        if chosen == Strategy::Honeypot && self.honeypot.is_none() {
            return Strategy::AlternateContent;
        }
        chosen
    }

    /// Apply the strategy for `assessment`. `next` produces the upstream
    /// response and is only awaited by strategies that pass traffic through.
    ///
    /// Every acting strategy tags the response. Monitor tags it only when the
    /// request was detected, so undetected visitors get untouched headers.
    pub async fn execute<F, Fut>(&self, ctx: &RequestContext, assessment: Assessment, next: F) -> PreventionDecision
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Response<Full<Bytes>>>,
    {
        let score = self.score_for(assessment.detected, assessment.score);
        let strategy = self.select_strategy(score);

        if strategy != Strategy::Monitor {
            info!(
                ip = %ctx.client_ip,
                path = %ctx.path,
                score = ?score,
                strategy = %strategy,
                "Applying prevention strategy"
            );
        }

        let response = match strategy {
            Strategy::Block => text_response(StatusCode::FORBIDDEN, "text/plain; charset=utf-8", BLOCKED_BODY.to_string()),
            Strategy::Honeypot => match &self.honeypot {
                Some(generator) => {
                    let page = self.protector.protect(generator.generate(ctx));
                    text_response(StatusCode::OK, "text/html; charset=utf-8", page)
                }
                None => self.alternate(next().await),
            },
            Strategy::AlternateContent => self.alternate(next().await),
            Strategy::Delay => {
                let started = Instant::now();
                let response = self.protect_html(next().await).await;
                let elapsed = started.elapsed();
                if elapsed < self.min_delay {
                    let deficit = self.min_delay - elapsed;
                    debug!(ip = %ctx.client_ip, deficit_ms = deficit.as_millis() as u64, "Delaying response");
                    tokio::time::sleep(deficit).await;
                }
                response
            }
            Strategy::Monitor => self.protect_html(next().await).await,
        };

        let response = if strategy == Strategy::Monitor && !assessment.detected {
            response
        } else {
            tag_response(response, strategy)
        };

        PreventionDecision { strategy, response }
    }

    fn alternate(&self, response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
        if !is_html(&response) {
            return response;
        }
        let (mut parts, _) = response.into_parts();
        let page = self.protector.protect(placeholder_page(&self.alternate_message));
        parts.headers.remove(CONTENT_LENGTH);
        Response::from_parts(parts, Full::new(Bytes::from(page)))
    }

    async fn protect_html(&self, response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
        if !is_html(&response) {
            return response;
        }
        let (mut parts, body) = response.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        match String::from_utf8(bytes.to_vec()) {
            Ok(html) => {
                parts.headers.remove(CONTENT_LENGTH);
                let protected = self.protector.protect(html);
                Response::from_parts(parts, Full::new(Bytes::from(protected)))
            }
            Err(_) => Response::from_parts(parts, Full::new(bytes)),
        }
    }
}

fn is_html(response: &Response<Full<Bytes>>) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_lowercase().contains("text/html"))
}

fn placeholder_page(message: &str) -> String {
    format!(
        "<!DOCTYPE html>\
        <html><head><meta charset=\"utf-8\"><title>Content unavailable</title></head>\
        <body><p>{}</p></body></html>",
        message
    )
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn tag_response(mut response: Response<Full<Bytes>>, strategy: Strategy) -> Response<Full<Bytes>> {
    let headers = response.headers_mut();
    headers.insert(HeaderName::from_static(ROBOTS_HEADER), HeaderValue::from_static(ROBOTS_HEADER_VALUE));
    headers.insert(HeaderName::from_static(PROTECTION_HEADER), HeaderValue::from_static(strategy.as_str()));
    response
}
