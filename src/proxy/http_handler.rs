use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::settings::Settings;
use crate::models::request::{parse_query, RequestContext};
use crate::prevention::{Assessment, PreventionEngine, Strategy};
use crate::protection::client_report::ClientReportScorer;
use crate::protection::pipeline::DetectionPipeline;

use super::access_log::{AccessEntry, AccessLogger};

/// Largest client report body accepted.
const MAX_REPORT_BYTES: usize = 64 * 1024;

/// Core HTTP request handler for the crawlguard reverse proxy.
///
/// For every incoming request the handler:
///
/// 1. Builds a [`RequestContext`] from the request line, headers, cookies
///    and query parameters.
/// 2. Scores it with the [`DetectionPipeline`].
/// 3. Hands the score to the [`PreventionEngine`], whose downstream is the
///    upstream backend.
/// 4. Writes an access log line.
///
/// `POST` to the client report path is answered directly.
pub struct HttpHandler {
    pipeline: Arc<DetectionPipeline>,
    engine: Arc<PreventionEngine>,
    reports: Arc<ClientReportScorer>,
    clock: Arc<dyn Clock>,
    settings: Arc<Settings>,
    upstream_client: HyperClient<HttpConnector, Full<Bytes>>,
    access_log: Option<Arc<AccessLogger>>,
}

impl HttpHandler {
    pub fn new(
        pipeline: Arc<DetectionPipeline>,
        engine: Arc<PreventionEngine>,
        reports: Arc<ClientReportScorer>,
        clock: Arc<dyn Clock>,
        settings: Arc<Settings>,
    ) -> Self {
        let upstream_client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(128)
            .build_http();

        let access_log = if !settings.logging.access_log.is_empty() {
            match AccessLogger::new(&settings.logging.access_log) {
                Ok(logger) => {
                    info!("Access log enabled: {}", settings.logging.access_log);
                    Some(Arc::new(logger))
                }
                Err(e) => {
                    error!("Failed to open access log {}: {}", settings.logging.access_log, e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            pipeline,
            engine,
            reports,
            clock,
            settings,
            upstream_client,
            access_log,
        }
    }

    /// Process a single inbound HTTP request end-to-end.
    pub async fn handle(&self, req: Request<Incoming>, client_ip: IpAddr) -> Response<Full<Bytes>> {
        let start = std::time::Instant::now();

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(|q| q.to_string());
        let headers = collect_headers(&req);

        let mut ctx = RequestContext::new(client_ip, method.as_str(), path.clone(), self.clock.now());
        ctx.has_detection_cookie = has_cookie(&headers, &self.settings.detection.detection_cookie);
        if let Some(q) = query.as_deref() {
            ctx.params = parse_query(q);
        }
        ctx.headers = headers;

        debug!(client_ip = %client_ip, method = %method, path = %path, "Incoming request");

        if method == Method::POST && path == self.settings.client_report.path {
            return self.handle_client_report(req, &ctx).await;
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(client_ip = %client_ip, error = %err, "Failed to read request body");
                Bytes::new()
            }
        };

        // Form posts carry interaction data in the body.
        if method == Method::POST && is_form(&ctx) {
            if let Ok(text) = std::str::from_utf8(&body) {
                for (k, v) in parse_query(text) {
                    ctx.params.entry(k).or_insert(v);
                }
            }
        }

        let result = self.pipeline.detect(&ctx);

        let decision = self
            .engine
            .execute(&ctx, Assessment::of(&result), || {
                self.forward_to_backend(&method, &path, query.as_deref(), &ctx, body.clone())
            })
            .await;

        let mut response = decision.response;
        if decision.strategy == Strategy::Monitor && !result.is_detected() && !ctx.has_detection_cookie {
            set_detection_cookie(&mut response, &self.settings.detection.detection_cookie);
        }

        if let Some(ref logger) = self.access_log {
            logger.log(&AccessEntry {
                ip: client_ip,
                method: method.as_str(),
                path: &path,
                status: response.status().as_u16(),
                strategy: decision.strategy.as_str(),
                score: result.score(),
                detected: result.is_detected(),
                us: start.elapsed().as_micros() as u64,
                ua: ctx.user_agent(),
            });
        }

        response
    }

    async fn handle_client_report(&self, req: Request<Incoming>, ctx: &RequestContext) -> Response<Full<Bytes>> {
        let body = match Limited::new(req.into_body(), MAX_REPORT_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(client_ip = %ctx.client_ip, error = %err, "Client report body rejected");
                return json_response(StatusCode::PAYLOAD_TOO_LARGE, r#"{"error":"report too large"}"#.to_string());
            }
        };

        match self.reports.ingest(&self.pipeline, ctx, &body) {
            Ok(result) => json_response(
                StatusCode::OK,
                serde_json::json!({
                    "score": result.score(),
                    "detected": result.is_detected(),
                })
                .to_string(),
            ),
            Err(err) => {
                debug!(client_ip = %ctx.client_ip, error = %err, "Malformed client report");
                json_response(
                    StatusCode::BAD_REQUEST,
                    serde_json::json!({ "error": err.to_string() }).to_string(),
                )
            }
        }
    }

    async fn forward_to_backend(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        ctx: &RequestContext,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        let upstream_addr = &self.settings.upstream.address;
        let uri = match query {
            Some(q) => format!("http://{}{}?{}", upstream_addr, path, q),
            None => format!("http://{}{}", upstream_addr, path),
        };

        let mut builder = Request::builder().method(method.clone()).uri(&uri);
        builder = builder.header("X-Forwarded-For", ctx.client_ip.to_string());
        builder = builder.header("X-Real-IP", ctx.client_ip.to_string());

        // Hop-by-hop headers and ones we set ourselves are not forwarded.
        let skip_headers: &[&str] = &[
            "x-forwarded-for",
            "x-real-ip",
            "transfer-encoding",
            "connection",
            "keep-alive",
            "upgrade",
        ];
        for (name, value) in &ctx.headers {
            if skip_headers.contains(&name.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        let upstream_req = match builder.body(Full::new(body)) {
            Ok(r) => r,
            Err(err) => {
                error!("Failed to build upstream request: {}", err);
                return bad_gateway();
            }
        };

        let timeout = Duration::from_millis(self.settings.upstream.response_timeout_ms);
        let upstream_resp = match tokio::time::timeout(timeout, self.upstream_client.request(upstream_req)).await {
            Ok(Ok(r)) => r,
            Ok(Err(err)) => {
                error!(upstream = %upstream_addr, error = %err, "Backend request failed");
                return bad_gateway();
            }
            Err(_) => {
                error!(upstream = %upstream_addr, timeout_ms = timeout.as_millis() as u64, "Backend request timed out");
                return gateway_timeout();
            }
        };

        let (parts, incoming_body) = upstream_resp.into_parts();
        let body_bytes = match incoming_body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                error!("Failed to read backend response body: {}", err);
                return bad_gateway();
            }
        };

        Response::from_parts(parts, Full::new(body_bytes))
    }
}

// ---------------------------------------------------------------------------
// Canned responses
// ---------------------------------------------------------------------------

fn canned(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Return a `502 Bad Gateway` response.
pub fn bad_gateway() -> Response<Full<Bytes>> {
    canned(
        StatusCode::BAD_GATEWAY,
        "text/html; charset=utf-8",
        "<!DOCTYPE html><html><head><title>502 Bad Gateway</title></head>\
        <body><h1>502 Bad Gateway</h1>\
        <p>The upstream server is not available. Please try again later.</p></body></html>"
            .to_string(),
    )
}

/// Return a `504 Gateway Timeout` response.
pub fn gateway_timeout() -> Response<Full<Bytes>> {
    canned(
        StatusCode::GATEWAY_TIMEOUT,
        "text/html; charset=utf-8",
        "<!DOCTYPE html><html><head><title>504 Gateway Timeout</title></head>\
        <body><h1>504 Gateway Timeout</h1></body></html>"
            .to_string(),
    )
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = canned(status, "application/json", body);
    response
        .headers_mut()
        .insert(http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// Lower-cased header map. Repeated headers are joined with `, `, cookies
/// with `; `.
fn collect_headers<B>(req: &Request<B>) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in req.headers() {
        let value = value.to_str().unwrap_or("").to_string();
        let separator = if *name == COOKIE { "; " } else { ", " };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(separator);
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    headers
}

fn has_cookie(headers: &HashMap<String, String>, cookie_name: &str) -> bool {
    headers.get("cookie").is_some_and(|raw| {
        raw.split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(name, value)| name == cookie_name && !value.is_empty())
    })
}

fn is_form(ctx: &RequestContext) -> bool {
    ctx.header("content-type")
        .is_some_and(|ct| ct.to_lowercase().starts_with("application/x-www-form-urlencoded"))
}

fn set_detection_cookie(response: &mut Response<Full<Bytes>>, cookie_name: &str) {
    let cookie = format!("{}=1; Path=/; Max-Age=86400; HttpOnly; SameSite=Lax", cookie_name);
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(err) => warn!(cookie = %cookie_name, error = %err, "Invalid detection cookie name"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_headers_joins_repeats() {
        let req = Request::builder()
            .header("Accept", "text/html")
            .header("Accept", "*/*")
            .header("Cookie", "a=1")
            .header("Cookie", "crawlguard_verified=1")
            .body(())
            .unwrap();
        let headers = collect_headers(&req);
        assert_eq!(headers["accept"], "text/html, */*");
        assert_eq!(headers["cookie"], "a=1; crawlguard_verified=1");
        assert!(has_cookie(&headers, "crawlguard_verified"));
        assert!(!has_cookie(&headers, "other"));
    }

    #[test]
    fn test_empty_cookie_value_ignored() {
        let mut headers = HashMap::new();
        headers.insert("cookie".to_string(), "crawlguard_verified=; x=2".to_string());
        assert!(!has_cookie(&headers, "crawlguard_verified"));
    }

    #[test]
    fn test_detection_cookie_header() {
        let mut response = Response::new(Full::new(Bytes::new()));
        set_detection_cookie(&mut response, "crawlguard_verified");
        let value = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(value.starts_with("crawlguard_verified=1;"));
    }

    #[test]
    fn test_form_content_type() {
        let ctx = RequestContext::new("192.0.2.1".parse().unwrap(), "POST", "/f", 0.0)
            .with_header("Content-Type", "application/x-www-form-urlencoded; charset=UTF-8");
        assert!(is_form(&ctx));
    }
}
