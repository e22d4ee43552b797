//! Proxy and hosting network filter.

use super::{Filter, FilterError, FilterInput};
use geoguard_rules::{Category, Decision};

/// Denies anonymizing networks (proxy, VPN, Tor, hosting) unless the default
/// behavior is `allow`.
pub struct VpnFilter;

impl Filter for VpnFilter {
    fn category(&self) -> Category {
        Category::Vpn
    }

    fn code(&self) -> &'static str {
        "vpn_filter"
    }

    fn decide(&self, input: &FilterInput<'_>) -> Result<Option<Decision>, FilterError> {
        let Some(settings) = self.settings(input.filters) else {
            return Ok(None);
        };
        if !input.context.is_anonymized() || settings.default_behavior.is_allow() {
            return Ok(None);
        }
        Ok(Some(Decision::deny(Category::Vpn, "vpn")))
    }
}
