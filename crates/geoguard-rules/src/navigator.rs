//! User-Agent pattern matching.
//!
//! Three pattern shapes are supported, tried in this order:
//!
//! 1. Delimited regex: `/expr/flags` with flags from `imsxuU`
//! 2. Plain token (`[A-Za-z0-9._-]+`): case-insensitive whole-word match
//! 3. Anything else: case-insensitive substring search
//!
//! Compiled regexes are cached process-wide; a pattern that fails to compile
//! is cached as a permanent non-match.

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Upper bound on cached compiled patterns before the cache is reset.
const REGEX_CACHE_LIMIT: usize = 4096;

type RegexCache = RwLock<HashMap<String, Option<Arc<Regex>>>>;

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Split a `/expr/flags` pattern into expression and flags.
///
/// Returns `None` if the pattern is not delimited or has unknown flags.
pub fn parse_delimited_regex(pattern: &str) -> Option<(&str, &str)> {
    let body = pattern.strip_prefix('/')?;
    let close = body.rfind('/')?;
    let (expr, flags) = (&body[..close], &body[close + 1..]);
    if expr.is_empty() || !flags.chars().all(|c| "imsxuU".contains(c)) {
        return None;
    }
    Some((expr, flags))
}

fn build_regex(expr: &str, flags: &str) -> Option<Regex> {
    let mut builder = RegexBuilder::new(expr);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'U' => builder.swap_greed(true),
            _ => builder.unicode(true),
        };
    }
    builder.size_limit(1 << 20).build().ok()
}

fn compiled(cache_key: &str, build: impl FnOnce() -> Option<Regex>) -> Option<Arc<Regex>> {
    if let Some(entry) = regex_cache().read().get(cache_key) {
        return entry.clone();
    }

    let regex = build().map(Arc::new);
    let mut cache = regex_cache().write();
    if cache.len() >= REGEX_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(cache_key.to_string(), regex.clone());
    regex
}

fn is_plain_token(pattern: &str) -> bool {
    !pattern.is_empty()
        && pattern
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Match a user agent against one navigator pattern.
pub fn navigator_match(ua: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }

    if let Some((expr, flags)) = parse_delimited_regex(pattern) {
        return compiled(pattern, || build_regex(expr, flags))
            .map(|re| re.is_match(ua))
            .unwrap_or(false);
    }

    if is_plain_token(pattern) {
        let key = format!("\u{0}word\u{0}{pattern}");
        return compiled(&key, || {
            RegexBuilder::new(&format!(r"\b{}\b", regex::escape(pattern)))
                .case_insensitive(true)
                .build()
                .ok()
        })
        .map(|re| re.is_match(ua))
        .unwrap_or(false);
    }

    ua.to_lowercase().contains(&pattern.to_lowercase())
}

/// Return the first pattern, in list order, that `matcher` accepts.
///
/// A matcher error counts as a non-match so a single broken rule never aborts
/// evaluation of the rest of the list.
pub fn first_match<'a, S, E, F>(subject: &str, patterns: &'a [S], mut matcher: F) -> Option<&'a str>
where
    S: AsRef<str>,
    F: FnMut(&str, &str) -> Result<bool, E>,
{
    patterns
        .iter()
        .map(|p| p.as_ref())
        .find(|pattern| matches!(matcher(subject, *pattern), Ok(true)))
}
