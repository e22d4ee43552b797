//! Signed rule lists.
//!
//! A rule is written `+pattern` (explicit allow) or `-pattern` (explicit
//! deny). Unsigned entries carry no intent and are ignored by evaluation.

/// Sign of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSign {
    /// `+` prefix.
    Allow,
    /// `-` prefix.
    Deny,
}

impl RuleSign {
    /// Split a raw rule into its sign and trimmed pattern.
    ///
    /// Returns `None` for unsigned or empty rules.
    pub fn split(rule: &str) -> Option<(RuleSign, &str)> {
        let rule = rule.trim();
        let (sign, rest) = if let Some(rest) = rule.strip_prefix('+') {
            (RuleSign::Allow, rest)
        } else if let Some(rest) = rule.strip_prefix('-') {
            (RuleSign::Deny, rest)
        } else {
            return None;
        };
        let pattern = rest.trim();
        if pattern.is_empty() {
            None
        } else {
            Some((sign, pattern))
        }
    }
}

/// Allow and deny patterns extracted from a rule list, in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedRules {
    /// Patterns from `+` rules.
    pub allow: Vec<String>,
    /// Patterns from `-` rules.
    pub deny: Vec<String>,
}

impl SignedRules {
    /// Returns `true` when neither list has entries.
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// Partition `rules` into allow and deny patterns.
pub fn split_signed_rules<S: AsRef<str>>(rules: &[S]) -> SignedRules {
    let mut out = SignedRules::default();
    for rule in rules {
        match RuleSign::split(rule.as_ref()) {
            Some((RuleSign::Allow, pattern)) => out.allow.push(pattern.to_string()),
            Some((RuleSign::Deny, pattern)) => out.deny.push(pattern.to_string()),
            None => {}
        }
    }
    out
}

/// Normalized identity of a rule: sign stripped, trimmed, lowercased.
///
/// Delimited regexes (`/.../flags`) keep their case, since `/Bot/` and
/// `/bot/` match different agents. Two rules with the same normalized
/// pattern address the same subject, so the later one replaces the earlier
/// one when lists are merged.
pub fn normalize_pattern(rule: &str) -> String {
    let rule = rule.trim();
    let stripped = rule
        .strip_prefix('+')
        .or_else(|| rule.strip_prefix('-'))
        .unwrap_or(rule)
        .trim();
    if crate::navigator::parse_delimited_regex(stripped).is_some() {
        stripped.to_string()
    } else {
        stripped.to_lowercase()
    }
}

/// Merge `overlay` onto `base`.
///
/// Entries are deduplicated by [`normalize_pattern`]; a later entry replaces
/// an earlier one in place, so the position of first appearance is kept
/// while the sign of the last occurrence wins.
pub fn merge_rules<S: AsRef<str>>(base: &[S], overlay: &[S]) -> Vec<String> {
    let mut merged: Vec<(String, String)> = Vec::with_capacity(base.len() + overlay.len());

    for rule in base.iter().chain(overlay.iter()) {
        let rule = rule.as_ref().trim();
        let key = normalize_pattern(rule);
        if key.is_empty() {
            continue;
        }
        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = rule.to_string(),
            None => merged.push((key, rule.to_string())),
        }
    }

    merged.into_iter().map(|(_, rule)| rule).collect()
}
