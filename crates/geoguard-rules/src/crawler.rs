//! Crawler detection.
//!
//! Two fixed signature sets, both matched case-insensitively as substrings:
//! a list of well-known, legitimate crawlers and a broader set of generic
//! tokens that mark automated clients.

use aho_corasick::AhoCorasick;
use std::sync::OnceLock;

/// User-Agent signatures of well-known search engine and preview crawlers.
pub const KNOWN_CRAWLERS: &[&str] = &[
    "googlebot",
    "google-inspectiontool",
    "adsbot-google",
    "mediapartners-google",
    "bingbot",
    "msnbot",
    "bingpreview",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandexbot",
    "yandeximages",
    "sogou",
    "exabot",
    "facebot",
    "facebookexternalhit",
    "ia_archiver",
    "applebot",
    "twitterbot",
    "linkedinbot",
    "petalbot",
    "qwantify",
    "seznambot",
];

/// Generic tokens that identify automated clients.
pub const CRAWLER_TOKENS: &[&str] = &[
    "bot",
    "spider",
    "crawler",
    "crawl",
    "slurp",
    "scraper",
    "fetcher",
    "headless",
    "python-requests",
    "python-urllib",
    "curl/",
    "wget/",
    "httpclient",
    "go-http-client",
    "libwww",
    "scrapy",
];

fn build(patterns: &[&str]) -> Option<AhoCorasick> {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(patterns)
        .ok()
}

fn known_matcher() -> Option<&'static AhoCorasick> {
    static MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MATCHER.get_or_init(|| build(KNOWN_CRAWLERS)).as_ref()
}

fn token_matcher() -> Option<&'static AhoCorasick> {
    static MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MATCHER.get_or_init(|| build(CRAWLER_TOKENS)).as_ref()
}

/// Returns `true` if `ua` belongs to a well-known crawler.
pub fn is_known_crawler(ua: &str) -> bool {
    !ua.is_empty() && known_matcher().is_some_and(|m| m.is_match(ua))
}

/// Returns `true` if `ua` looks automated: a known crawler or any generic
/// bot token.
pub fn looks_like_crawler(ua: &str) -> bool {
    if ua.is_empty() {
        return false;
    }
    is_known_crawler(ua) || token_matcher().is_some_and(|m| m.is_match(ua))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOGLEBOT: &str =
        "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
    const DISCORD: &str = "Mozilla/5.0 (compatible; Discordbot/2.0; +https://discordapp.com)";
    const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_known_crawlers() {
        assert!(is_known_crawler(GOOGLEBOT));
        assert!(is_known_crawler("Mozilla/5.0 (compatible; bingbot/2.0)"));
        assert!(!is_known_crawler(DISCORD));
        assert!(!is_known_crawler(CHROME));
        assert!(!is_known_crawler(""));
    }

    #[test]
    fn test_generic_tokens() {
        assert!(looks_like_crawler(DISCORD));
        assert!(looks_like_crawler(GOOGLEBOT));
        assert!(looks_like_crawler("python-requests/2.31.0"));
        assert!(looks_like_crawler("curl/8.4.0"));
        assert!(!looks_like_crawler(CHROME));
        assert!(!looks_like_crawler(""));
    }
}
