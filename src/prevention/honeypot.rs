use std::sync::Arc;

use crate::clock::RandomSource;
use crate::models::request::RequestContext;

/// Prefix for the query parameter carried by every bait link.
pub const TRAP_PARAM: &str = "cg_trap";

const TOKEN_LEN: usize = 16;
const MIN_BAIT_LINKS: usize = 4;

const BAIT_SECTIONS: &[&str] = &["archive", "research", "catalog", "reports", "datasets", "library"];

/// Builds decoy pages served to high-confidence crawlers.
pub trait HoneypotGenerator: Send + Sync {
    fn generate(&self, ctx: &RequestContext) -> String;
}

/// Plain decoy page: plausible filler text, a set of bait links that no
/// human would follow, a hidden tracking pixel and the page token.
pub struct DecoyPageGenerator {
    random: Arc<dyn RandomSource>,
    link_count: usize,
}

impl DecoyPageGenerator {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self {
            random,
            link_count: 6,
        }
    }

    /// Number of bait links; never fewer than four.
    pub fn with_link_count(mut self, count: usize) -> Self {
        self.link_count = count.max(MIN_BAIT_LINKS);
        self
    }
}

impl HoneypotGenerator for DecoyPageGenerator {
    fn generate(&self, ctx: &RequestContext) -> String {
        let token = self.random.token(TOKEN_LEN);

        let links: String = (0..self.link_count)
            .map(|i| {
                let section = BAIT_SECTIONS[i % BAIT_SECTIONS.len()];
                let slug = self.random.token(8);
                format!(
                    "<li><a href=\"/{section}/{slug}?{param}={token}\">{title} {n}</a></li>\n",
                    section = section,
                    slug = slug,
                    param = TRAP_PARAM,
                    token = token,
                    title = capitalize(section),
                    n = i + 1,
                )
            })
            .collect();

        let title = html_escape(ctx.path.trim_matches('/'));
        let title = if title.is_empty() { "Index".to_string() } else { title };

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="robots" content="noindex, nofollow">
<meta name="cg-token" content="{token}">
<title>{title}</title>
</head>
<body>
<!-- cg-honeypot:{token} -->
<h1>{title}</h1>
<p>This collection is being reorganised. Browse the sections below for the full material.</p>
<ul>
{links}</ul>
<img src="/__crawlguard/pixel/{token}.gif" width="1" height="1" alt="" style="display:none">
</body>
</html>"#,
            token = token,
            title = title,
            links = links,
        )
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SequenceRandom;

    fn ctx(path: &str) -> RequestContext {
        RequestContext::new("192.0.2.90".parse().unwrap(), "GET", path, 0.0)
    }

    #[test]
    fn test_page_has_token_and_bait_links() {
        let gen = DecoyPageGenerator::new(Arc::new(SequenceRandom::new("tok")));
        let page = gen.generate(&ctx("/docs/intro"));
        let token = "tok0000000000000";
        assert!(page.contains(&format!("cg-honeypot:{}", token)));
        assert_eq!(page.matches(&format!("{}={}", TRAP_PARAM, token)).count(), 6);
        assert!(page.contains("<title>docs/intro</title>"));
    }

    #[test]
    fn test_tokens_differ_between_pages() {
        let gen = DecoyPageGenerator::new(Arc::new(SequenceRandom::new("t")));
        let a = gen.generate(&ctx("/"));
        let b = gen.generate(&ctx("/"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_link_count_floor() {
        let gen = DecoyPageGenerator::new(Arc::new(SequenceRandom::new("x"))).with_link_count(1);
        let page = gen.generate(&ctx("/"));
        assert_eq!(page.matches("<li><a href=").count(), 4);
        assert!(page.contains("<title>Index</title>"));
    }

    #[test]
    fn test_title_escaped() {
        let gen = DecoyPageGenerator::new(Arc::new(SequenceRandom::new("x")));
        let page = gen.generate(&ctx("/<script>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<title><script>"));
    }
}
