use std::sync::Arc;

/// Marker embedded in every HTML document that went through protection.
pub const PROTECTED_MARKER: &str = "data-crawlguard-protected";

const HEAD_CLOSE: &[u8] = b"</head>";

/// One stage of HTML post-processing for suspicious visitors.
pub trait ContentProtector: Send + Sync {
    fn protect(&self, html: String) -> String;
}

/// Tags the document as protected with a meta element in `<head>`.
#[derive(Debug, Clone)]
pub struct MarkerProtector {
    label: String,
}

impl MarkerProtector {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl Default for MarkerProtector {
    fn default() -> Self {
        Self::new("crawlguard")
    }
}

impl ContentProtector for MarkerProtector {
    fn protect(&self, html: String) -> String {
        if html.contains(PROTECTED_MARKER) {
            return html;
        }
        let tag = format!(r#"<meta name="{}" {}="true">"#, self.label, PROTECTED_MARKER);
        insert_into_head(html, &tag)
    }
}

/// Adds a robots meta element so compliant indexers drop the page.
#[derive(Debug, Clone, Copy, Default)]
pub struct RobotsMetaProtector;

impl ContentProtector for RobotsMetaProtector {
    fn protect(&self, html: String) -> String {
        if html.to_ascii_lowercase().contains(r#"name="robots""#) {
            return html;
        }
        insert_into_head(html, r#"<meta name="robots" content="noindex, nofollow, noarchive">"#)
    }
}

/// Runs protectors in sequence, each taking the previous stage's output.
#[derive(Default, Clone)]
pub struct ProtectorChain {
    stages: Vec<Arc<dyn ContentProtector>>,
}

impl ProtectorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn ContentProtector>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl ContentProtector for ProtectorChain {
    fn protect(&self, html: String) -> String {
        self.stages.iter().fold(html, |doc, stage| stage.protect(doc))
    }
}

/// Default chain: robots meta, then the protection marker.
pub fn default_protector() -> ProtectorChain {
    ProtectorChain::new()
        .with_stage(Arc::new(RobotsMetaProtector))
        .with_stage(Arc::new(MarkerProtector::default()))
}

/// Insert `fragment` right before `</head>`, or at the top of the document
/// when there is no head. The tag is matched on ASCII bytes so the offset is
/// always a char boundary of `html`.
fn insert_into_head(mut html: String, fragment: &str) -> String {
    let close = html
        .as_bytes()
        .windows(HEAD_CLOSE.len())
        .position(|w| w.eq_ignore_ascii_case(HEAD_CLOSE));
    match close {
        Some(pos) => {
            html.insert_str(pos, fragment);
            html
        }
        None => format!("{}{}", fragment, html),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<html><head><title>x</title></head><body>hi</body></html>";

    #[test]
    fn test_marker_inserted_in_head() {
        let out = MarkerProtector::default().protect(PAGE.to_string());
        assert!(out.contains(PROTECTED_MARKER));
        let marker = out.find(PROTECTED_MARKER).unwrap();
        assert!(marker < out.find("</head>").unwrap());
        assert!(out.ends_with("<body>hi</body></html>"));
    }

    #[test]
    fn test_marker_is_idempotent() {
        let p = MarkerProtector::default();
        let once = p.protect(PAGE.to_string());
        assert_eq!(p.protect(once.clone()), once);
    }

    #[test]
    fn test_headless_fragment() {
        let out = MarkerProtector::default().protect("<p>fragment</p>".to_string());
        assert!(out.starts_with("<meta"));
        assert!(out.ends_with("<p>fragment</p>"));
    }

    #[test]
    fn test_chain_runs_in_order() {
        let out = default_protector().protect(PAGE.to_string());
        let robots = out.find("noarchive").unwrap();
        let marker = out.find(PROTECTED_MARKER).unwrap();
        assert!(robots < marker);
    }

    #[test]
    fn test_existing_robots_meta_kept() {
        let page = r#"<html><head><meta name="robots" content="all"></head></html>"#;
        let out = RobotsMetaProtector.protect(page.to_string());
        assert_eq!(out, page);
    }

    #[test]
    fn test_non_ascii_head_keeps_close_tag() {
        let page = "<html><head><title>İstanbul</title></head><body>x</body></html>";
        let out = MarkerProtector::default().protect(page.to_string());
        assert!(out.contains(r#"="true"></head><body>"#));
        assert!(out.starts_with("<html><head><title>İstanbul</title><meta"));
    }

    #[test]
    fn test_shrinking_lowercase_chars_do_not_panic() {
        let page = "<html><head><title>t</title>\u{2126}\u{20ac}\u{212A}</HEAD><body>x</body></html>";
        let out = default_protector().protect(page.to_string());
        let marker = out.find(PROTECTED_MARKER).unwrap();
        assert!(marker < out.find("</HEAD>").unwrap());
        assert!(out.contains("\u{2126}\u{20ac}\u{212A}<meta"));
        assert!(out.ends_with("</HEAD><body>x</body></html>"));
    }

    #[test]
    fn test_empty_chain_is_identity() {
        assert_eq!(ProtectorChain::new().protect(PAGE.to_string()), PAGE);
    }
}
