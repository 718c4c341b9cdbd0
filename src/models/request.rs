use std::collections::HashMap;
use std::net::IpAddr;

/// Read-only view of an inbound request as seen by the detection pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Client IP address
    pub client_ip: IpAddr,

    /// HTTP method, upper case
    pub method: String,

    /// Request path without query string
    pub path: String,

    /// Request headers keyed by lower-case name
    pub headers: HashMap<String, String>,

    /// Whether the client presented the detection cookie
    pub has_detection_cookie: bool,

    /// Arrival time in seconds since the Unix epoch
    pub timestamp: f64,

    /// Query and form parameters (client-reported interaction data)
    pub params: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(client_ip: IpAddr, method: impl Into<String>, path: impl Into<String>, timestamp: f64) -> Self {
        Self {
            client_ip,
            method: method.into().to_uppercase(),
            path: path.into(),
            headers: HashMap::new(),
            has_detection_cookie: false,
            timestamp,
            params: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    pub fn with_detection_cookie(mut self, present: bool) -> Self {
        self.has_detection_cookie = present;
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// User-Agent, or an empty string when absent.
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    pub fn referer(&self) -> Option<&str> {
        self.header("referer").filter(|r| !r.is_empty())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    /// Parameter parsed as a float; unparseable values are ignored.
    pub fn param_f64(&self, name: &str) -> Option<f64> {
        self.param(name).and_then(|v| v.trim().parse::<f64>().ok())
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// Whether a path names a static asset (stylesheet, script, image, font).
pub fn is_static_asset(path: &str) -> bool {
    let p = path.to_lowercase();
    const EXTENSIONS: &[&str] = &[
        ".css", ".js", ".mjs", ".map", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp",
        ".ico", ".avif", ".woff", ".woff2", ".ttf", ".eot",
    ];
    EXTENSIONS.iter().any(|ext| p.ends_with(ext))
}

/// Parse a query string (`a=1&b=two`) into decoded key/value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}
