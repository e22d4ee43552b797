//! IP and CIDR filter.

use super::{Filter, FilterError, FilterInput};
use geoguard_rules::{Category, Decision, RuleSign, evaluate_ip_rules, ip_matches};

/// Matches the client address against signed IP and CIDR rules.
///
/// Any `+` entry in `rules` or `whitelist` that matches is an explicit allow.
/// Whitelist entries may omit the sign.
pub struct IpFilter;

impl Filter for IpFilter {
    fn category(&self) -> Category {
        Category::Ip
    }

    fn code(&self) -> &'static str {
        "ip_filter"
    }

    fn decide(&self, input: &FilterInput<'_>) -> Result<Option<Decision>, FilterError> {
        let Some(settings) = self.settings(input.filters) else {
            return Ok(None);
        };
        let ip = input
            .client_ip
            .or(Some(input.context.ip.as_str()))
            .filter(|ip| !ip.is_empty())
            .ok_or(FilterError::MissingClientIp)?;

        let whitelisted = settings
            .rules
            .iter()
            .filter_map(|rule| match RuleSign::split(rule) {
                Some((RuleSign::Allow, pattern)) => Some(pattern),
                _ => None,
            })
            .chain(settings.whitelist.iter().filter_map(|entry| match RuleSign::split(entry) {
                Some((RuleSign::Allow, pattern)) => Some(pattern),
                Some((RuleSign::Deny, _)) => None,
                None => Some(entry.trim()).filter(|e| !e.is_empty()),
            }))
            .find(|pattern| ip_matches(ip, pattern));

        if let Some(pattern) = whitelisted {
            return Ok(Some(Decision::allow(Some(format!("ip:{pattern}")))));
        }

        Ok(evaluate_ip_rules(ip, &settings.rules, settings.default_behavior))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterSettings, FiltersConfig};
    use crate::context::GeoContext;
    use crate::request::RequestInfo;
    use geoguard_rules::DefaultBehavior;

    fn decide(settings: FilterSettings, ip: Option<&str>) -> Result<Option<Decision>, FilterError> {
        let mut filters = FiltersConfig::default();
        filters.set(Category::Ip, settings);
        let request = RequestInfo::new("/", None);
        let context = GeoContext::unresolved("");
        IpFilter.decide(&FilterInput {
            request: &request,
            client_ip: ip,
            context: &context,
            filters: &filters,
        })
    }

    fn rules(rules: &[&str], behavior: DefaultBehavior) -> FilterSettings {
        FilterSettings {
            default_behavior: behavior,
            rules: rules.iter().map(|r| r.to_string()).collect(),
            ..FilterSettings::default()
        }
    }

    #[test]
    fn test_allow_wins_over_covering_deny() {
        let d = decide(rules(&["-10.0.0.0/8", "+10.1.2.3"], DefaultBehavior::Block), Some("10.1.2.3"))
            .unwrap()
            .unwrap();
        assert!(d.allowed);
        assert_eq!(d.reason.as_deref(), Some("ip:10.1.2.3"));
    }

    #[test]
    fn test_deny_and_default() {
        let d = decide(rules(&["-10.0.0.0/8"], DefaultBehavior::Allow), Some("10.9.9.9"))
            .unwrap()
            .unwrap();
        assert_eq!(d.reason.as_deref(), Some("ip:10.0.0.0/8"));

        let d = decide(rules(&[], DefaultBehavior::Block), Some("8.8.8.8")).unwrap().unwrap();
        assert_eq!(d.reason.as_deref(), Some("ip:default"));
    }

    #[test]
    fn test_unsigned_whitelist_entries() {
        let settings = FilterSettings {
            default_behavior: DefaultBehavior::Block,
            whitelist: vec!["2001:db8::/32".into()],
            ..FilterSettings::default()
        };
        let d = decide(settings, Some("2001:db8::42")).unwrap().unwrap();
        assert!(d.allowed);
    }

    #[test]
    fn test_missing_ip() {
        assert!(matches!(
            decide(rules(&[], DefaultBehavior::Block), None),
            Err(FilterError::MissingClientIp)
        ));
    }
}
