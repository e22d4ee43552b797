//! ISO country code filter.

use super::{Filter, FilterError, FilterInput};
use geoguard_rules::{Category, Decision, split_signed_rules};

/// Matches the context's country code against `+XX` / `-XX` rules.
///
/// Deny rules are checked first, then allow rules (which only stop the
/// default from applying), then the default behavior.
pub struct CountryFilter;

impl Filter for CountryFilter {
    fn category(&self) -> Category {
        Category::Country
    }

    fn code(&self) -> &'static str {
        "country_filter"
    }

    fn decide(&self, input: &FilterInput<'_>) -> Result<Option<Decision>, FilterError> {
        let Some(settings) = self.settings(input.filters) else {
            return Ok(None);
        };
        let rules = split_signed_rules(&settings.rules);
        let code = input
            .context
            .country_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        if let Some(code) = code {
            if let Some(denied) = rules.deny.iter().find(|r| r.eq_ignore_ascii_case(code)) {
                return Ok(Some(Decision::deny(
                    Category::Country,
                    format!("country:{}", denied.to_ascii_uppercase()),
                )));
            }
            if rules.allow.iter().any(|r| r.eq_ignore_ascii_case(code)) {
                return Ok(None);
            }
        }

        if settings.default_behavior.is_allow() {
            Ok(None)
        } else {
            Ok(Some(Decision::deny(Category::Country, "country:default")))
        }
    }
}
