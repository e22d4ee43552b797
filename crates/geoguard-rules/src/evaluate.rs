//! Signed IP rule evaluation.

use crate::decision::{Category, Decision, DefaultBehavior};
use crate::ip::ip_matches;
use crate::navigator::first_match;
use crate::signed::split_signed_rules;
use std::convert::Infallible;

/// Evaluate `ip` against a signed rule list.
///
/// Precedence:
/// 1. any allow-list match: no opinion (`None`), regardless of deny entries
/// 2. first deny-list match: deny with reason `ip:<pattern>`
/// 3. default behavior: `None` for allow, deny `ip:default` otherwise
pub fn evaluate_ip_rules<S: AsRef<str>>(
    ip: &str,
    rules: &[S],
    default_behavior: DefaultBehavior,
) -> Option<Decision> {
    let split = split_signed_rules(rules);
    let matcher = |ip: &str, pattern: &str| Ok::<_, Infallible>(ip_matches(ip, pattern));

    if first_match(ip, &split.allow, matcher).is_some() {
        return None;
    }

    if let Some(pattern) = first_match(ip, &split.deny, matcher) {
        return Some(Decision::deny(Category::Ip, format!("ip:{pattern}")));
    }

    if default_behavior.is_allow() {
        None
    } else {
        Some(Decision::deny(Category::Ip, "ip:default"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_beats_deny_regardless_of_order() {
        let rules = ["-10.0.0.0/8", "+10.1.2.3"];
        assert_eq!(evaluate_ip_rules("10.1.2.3", &rules, DefaultBehavior::Block), None);

        let reversed = ["+10.1.2.3", "-10.0.0.0/8"];
        assert_eq!(evaluate_ip_rules("10.1.2.3", &reversed, DefaultBehavior::Block), None);
    }

    #[test]
    fn test_first_deny_reason() {
        let rules = ["-192.168.0.0/16", "-192.168.1.1"];
        let d = evaluate_ip_rules("192.168.1.1", &rules, DefaultBehavior::Allow).unwrap();
        assert_eq!(d.reason.as_deref(), Some("ip:192.168.0.0/16"));
        assert_eq!(d.blocking_filter, Some(Category::Ip));
    }

    #[test]
    fn test_default_behavior() {
        let rules: [&str; 0] = [];
        assert_eq!(evaluate_ip_rules("8.8.8.8", &rules, DefaultBehavior::Allow), None);
        let d = evaluate_ip_rules("8.8.8.8", &rules, DefaultBehavior::Block).unwrap();
        assert_eq!(d.reason.as_deref(), Some("ip:default"));
    }
}
