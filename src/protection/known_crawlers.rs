use std::sync::Arc;

use tracing::debug;

use crate::models::detection::DetectionResult;

/// User-Agent substrings identifying AI training / answer-engine crawlers.
/// Matched case-insensitively.
pub const AI_CRAWLER_SIGNATURES: &[&str] = &[
    "GPTBot",
    "ChatGPT-User",
    "OAI-SearchBot",
    "CCBot",
    "anthropic-ai",
    "ClaudeBot",
    "Claude-Web",
    "Claude-User",
    "Claude-SearchBot",
    "Google-Extended",
    "GoogleOther",
    "PerplexityBot",
    "Perplexity-User",
    "Bytespider",
    "Amazonbot",
    "Applebot-Extended",
    "FacebookBot",
    "Meta-ExternalAgent",
    "Meta-ExternalFetcher",
    "cohere-ai",
    "cohere-training-data-crawler",
    "Diffbot",
    "YouBot",
    "Omgilibot",
    "ImagesiftBot",
    "Timpibot",
    "AI2Bot",
    "DuckAssistBot",
    "img2dataset",
    "Kangaroo Bot",
];

/// Names a [`BotClassifier`] may return that count as AI crawlers.
pub const AI_CRAWLER_NAMES: &[&str] = &[
    "GPTBot",
    "ChatGPT",
    "CCBot",
    "ClaudeBot",
    "Anthropic",
    "PerplexityBot",
    "Bytespider",
    "Google-Extended",
    "Amazonbot",
    "Diffbot",
    "Cohere",
    "YouBot",
    "FacebookBot",
    "Omgili",
];

/// Generic bot classifier: maps a User-Agent to a bot name.
pub trait BotClassifier: Send + Sync {
    fn classify(&self, user_agent: &str) -> Option<String>;
}

/// Substring-table classifier covering common crawlers and HTTP tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternBotClassifier;

const BOT_PATTERNS: &[(&str, &str)] = &[
    ("gptbot", "GPTBot"),
    ("chatgpt", "ChatGPT"),
    ("ccbot", "CCBot"),
    ("claudebot", "ClaudeBot"),
    ("anthropic", "Anthropic"),
    ("perplexitybot", "PerplexityBot"),
    ("bytespider", "Bytespider"),
    ("amazonbot", "Amazonbot"),
    ("diffbot", "Diffbot"),
    ("cohere", "Cohere"),
    ("omgili", "Omgili"),
    ("googlebot", "Googlebot"),
    ("bingbot", "Bingbot"),
    ("yandexbot", "YandexBot"),
    ("baiduspider", "Baiduspider"),
    ("duckduckbot", "DuckDuckBot"),
    ("slurp", "Yahoo Slurp"),
    ("applebot", "Applebot"),
    ("facebookexternalhit", "Facebook"),
    ("twitterbot", "Twitterbot"),
    ("linkedinbot", "LinkedInBot"),
    ("ahrefsbot", "AhrefsBot"),
    ("semrushbot", "SemrushBot"),
    ("mj12bot", "MJ12bot"),
    ("dotbot", "DotBot"),
    ("petalbot", "PetalBot"),
    ("headlesschrome", "HeadlessChrome"),
    ("phantomjs", "PhantomJS"),
    ("selenium", "Selenium"),
    ("puppeteer", "Puppeteer"),
    ("playwright", "Playwright"),
    ("scrapy", "Scrapy"),
    ("python-requests", "python-requests"),
    ("python-urllib", "python-urllib"),
    ("aiohttp", "aiohttp"),
    ("go-http-client", "Go-http-client"),
    ("curl/", "curl"),
    ("wget/", "Wget"),
    ("okhttp", "okhttp"),
    ("java/", "Java"),
    ("libwww-perl", "libwww-perl"),
    ("node-fetch", "node-fetch"),
    ("axios/", "axios"),
    ("crawler", "Generic crawler"),
    ("spider", "Generic spider"),
    ("bot/", "Generic bot"),
];

impl BotClassifier for PatternBotClassifier {
    fn classify(&self, user_agent: &str) -> Option<String> {
        let lower = user_agent.to_lowercase();
        BOT_PATTERNS
            .iter()
            .find(|(pattern, _)| lower.contains(pattern))
            .map(|(_, name)| name.to_string())
    }
}

/// Outcome of a User-Agent lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlerMatch {
    /// AI crawler: terminal for the whole pipeline.
    AiCrawler(String),
    /// Some other bot: suspicious but not conclusive.
    Bot(String),
    None,
}

/// AI crawler signature list plus a cross-referenced generic classifier.
pub struct KnownCrawlers {
    signatures: Vec<(String, String)>,
    ai_names: Vec<String>,
    classifier: Arc<dyn BotClassifier>,
}

impl KnownCrawlers {
    pub fn new(extra_signatures: &[String], classifier: Arc<dyn BotClassifier>) -> Self {
        let signatures = AI_CRAWLER_SIGNATURES
            .iter()
            .map(|s| s.to_string())
            .chain(extra_signatures.iter().filter(|s| !s.trim().is_empty()).cloned())
            .map(|s| (s.to_lowercase(), s))
            .collect();
        let ai_names = AI_CRAWLER_NAMES.iter().map(|s| s.to_lowercase()).collect();

        Self {
            signatures,
            ai_names,
            classifier,
        }
    }

    pub fn check(&self, user_agent: &str) -> CrawlerMatch {
        if user_agent.is_empty() {
            return CrawlerMatch::None;
        }

        let lower = user_agent.to_lowercase();
        if let Some((_, original)) = self.signatures.iter().find(|(sig, _)| lower.contains(sig.as_str())) {
            return CrawlerMatch::AiCrawler(original.clone());
        }

        match self.classifier.classify(user_agent) {
            Some(name) if self.ai_names.contains(&name.to_lowercase()) => CrawlerMatch::AiCrawler(name),
            Some(name) => CrawlerMatch::Bot(name),
            None => CrawlerMatch::None,
        }
    }

    /// Terminal result for AI crawlers, `None` for anything else.
    pub fn fast_path(&self, user_agent: &str) -> Option<DetectionResult> {
        match self.check(user_agent) {
            CrawlerMatch::AiCrawler(name) => {
                debug!(crawler = %name, "Known AI crawler User-Agent");
                Some(known_crawler_result(&name))
            }
            _ => None,
        }
    }
}

impl Default for KnownCrawlers {
    fn default() -> Self {
        Self::new(&[], Arc::new(PatternBotClassifier))
    }
}

pub fn known_crawler_result(name: &str) -> DetectionResult {
    let mut result = DetectionResult::new();
    result.add_signal("known_crawler", name, 100.0);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClassifier(&'static str);

    impl BotClassifier for FixedClassifier {
        fn classify(&self, _user_agent: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[test]
    fn test_signature_match_is_case_insensitive() {
        let crawlers = KnownCrawlers::default();
        assert_eq!(
            crawlers.check("Mozilla/5.0 (compatible; gptbot/1.2; +https://openai.com/gptbot)"),
            CrawlerMatch::AiCrawler("GPTBot".to_string())
        );
        assert_eq!(
            crawlers.check("CCBot/2.0 (https://commoncrawl.org/faq/)"),
            CrawlerMatch::AiCrawler("CCBot".to_string())
        );
    }

    #[test]
    fn test_generic_bot_is_not_terminal() {
        let crawlers = KnownCrawlers::default();
        assert_eq!(
            crawlers.check("Mozilla/5.0 (compatible; Googlebot/2.1)"),
            CrawlerMatch::Bot("Googlebot".to_string())
        );
        assert_eq!(crawlers.check("curl/8.4.0"), CrawlerMatch::Bot("curl".to_string()));
        assert!(crawlers.fast_path("curl/8.4.0").is_none());
    }

    #[test]
    fn test_browser_is_not_a_bot() {
        let crawlers = KnownCrawlers::default();
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
        assert_eq!(crawlers.check(ua), CrawlerMatch::None);
        assert_eq!(crawlers.check(""), CrawlerMatch::None);
    }

    #[test]
    fn test_classifier_cross_reference() {
        let crawlers = KnownCrawlers::new(&[], Arc::new(FixedClassifier("Cohere")));
        assert_eq!(
            crawlers.check("SomethingOpaque/1.0"),
            CrawlerMatch::AiCrawler("Cohere".to_string())
        );

        let crawlers = KnownCrawlers::new(&[], Arc::new(FixedClassifier("Bingbot")));
        assert_eq!(crawlers.check("SomethingOpaque/1.0"), CrawlerMatch::Bot("Bingbot".to_string()));
    }

    #[test]
    fn test_extra_signatures() {
        let crawlers = KnownCrawlers::new(&["NewAIBot".to_string()], Arc::new(PatternBotClassifier));
        let result = crawlers.fast_path("newaibot/0.1").unwrap();
        assert_eq!(result.score(), 100);
        assert!(result.has_signal("known_crawler"));
    }
}
