//! Crawler filter.

use super::{Filter, FilterError, FilterInput};
use geoguard_rules::{
    Category, Decision, first_match, is_known_crawler, looks_like_crawler, navigator_match,
    split_signed_rules,
};
use std::convert::Infallible;

/// Rule keyword that matches well-known crawlers when `allow_known` is set.
const KNOWN: &str = "known";

/// Decides on automated clients.
///
/// The baseline starts at the default behavior, turns to deny for anything
/// that looks like a crawler, and back to allow for a well-known crawler
/// when `allow_known` is set. Explicit rules then override the baseline.
pub struct CrawlerFilter;

impl Filter for CrawlerFilter {
    fn category(&self) -> Category {
        Category::Crawler
    }

    fn code(&self) -> &'static str {
        "crawler_filter"
    }

    fn decide(&self, input: &FilterInput<'_>) -> Result<Option<Decision>, FilterError> {
        let Some(settings) = self.settings(input.filters) else {
            return Ok(None);
        };
        let ua = input.user_agent()?;
        let known = settings.allow_known && is_known_crawler(ua);

        let mut allow = settings.default_behavior.is_allow();
        if looks_like_crawler(ua) {
            allow = false;
        }
        if known {
            allow = true;
        }

        let rules = split_signed_rules(&settings.rules);
        let matcher = |ua: &str, pattern: &str| {
            Ok::<_, Infallible>(if pattern.eq_ignore_ascii_case(KNOWN) {
                known
            } else {
                !ua.is_empty() && navigator_match(ua, pattern)
            })
        };

        if first_match(ua, &rules.deny, matcher).is_some() {
            return Ok(Some(Decision::deny(Category::Crawler, "crawler rule")));
        }
        if first_match(ua, &rules.allow, matcher).is_some() {
            return Ok(None);
        }

        if allow {
            Ok(None)
        } else {
            Ok(Some(Decision::deny(Category::Crawler, "crawler:default")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterSettings, FiltersConfig};
    use crate::context::GeoContext;
    use crate::request::RequestInfo;
    use geoguard_rules::DefaultBehavior;

    const GOOGLEBOT: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
    const DISCORD: &str = "Mozilla/5.0 (compatible; Discordbot/2.0; +https://discordapp.com)";
    const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn decide(settings: FilterSettings, ua: &str) -> Option<Decision> {
        let mut filters = FiltersConfig::default();
        filters.set(Category::Crawler, settings);
        let request = RequestInfo::new("/", None).with_header("User-Agent", ua);
        let context = GeoContext::unresolved("1.2.3.4");
        CrawlerFilter
            .decide(&FilterInput {
                request: &request,
                client_ip: Some("1.2.3.4"),
                context: &context,
                filters: &filters,
            })
            .unwrap()
    }

    fn settings(allow_known: bool, rules: &[&str]) -> FilterSettings {
        FilterSettings {
            allow_known,
            rules: rules.iter().map(|r| r.to_string()).collect(),
            ..FilterSettings::default()
        }
    }

    #[test]
    fn test_allow_known_lets_search_engines_through() {
        assert_eq!(decide(settings(true, &["-discordbot"]), GOOGLEBOT), None);
        let d = decide(settings(true, &["-discordbot"]), DISCORD).unwrap();
        assert_eq!(d.reason.as_deref(), Some("crawler rule"));
    }

    #[test]
    fn test_bots_denied_without_allow_known() {
        let d = decide(settings(false, &[]), GOOGLEBOT).unwrap();
        assert_eq!(d.reason.as_deref(), Some("crawler:default"));
        assert_eq!(decide(settings(false, &[]), CHROME), None);
    }

    #[test]
    fn test_known_keyword() {
        let d = decide(settings(true, &["-known"]), GOOGLEBOT).unwrap();
        assert_eq!(d.reason.as_deref(), Some("crawler rule"));
        // Without allow_known the keyword never matches.
        let d = decide(settings(false, &["+known"]), GOOGLEBOT).unwrap();
        assert_eq!(d.reason.as_deref(), Some("crawler:default"));
    }

    #[test]
    fn test_allow_rule_overrides_heuristic() {
        assert_eq!(decide(settings(false, &["+discordbot"]), DISCORD), None);
    }
}
