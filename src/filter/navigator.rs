//! User-Agent filter.

use super::{Filter, FilterError, FilterInput};
use geoguard_rules::{Category, Decision, first_match, navigator_match, split_signed_rules};
use std::convert::Infallible;

/// Matches the `User-Agent` header against signed navigator patterns
/// (whole word, substring or `/regex/flags`).
pub struct NavigatorFilter;

impl Filter for NavigatorFilter {
    fn category(&self) -> Category {
        Category::Navigator
    }

    fn code(&self) -> &'static str {
        "navigator_filter"
    }

    fn decide(&self, input: &FilterInput<'_>) -> Result<Option<Decision>, FilterError> {
        let Some(settings) = self.settings(input.filters) else {
            return Ok(None);
        };
        let ua = input.user_agent()?;
        let rules = split_signed_rules(&settings.rules);
        let matcher = |ua: &str, pattern: &str| Ok::<_, Infallible>(navigator_match(ua, pattern));

        if !ua.is_empty() {
            if let Some(pattern) = first_match(ua, &rules.deny, matcher) {
                return Ok(Some(Decision::deny(
                    Category::Navigator,
                    format!("navigator:{pattern}"),
                )));
            }
            if first_match(ua, &rules.allow, matcher).is_some() {
                return Ok(None);
            }
        }

        if settings.default_behavior.is_allow() {
            Ok(None)
        } else {
            Ok(Some(Decision::deny(Category::Navigator, "navigator:default")))
        }
    }
}
