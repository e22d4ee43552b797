//! Per-route overrides.
//!
//! A route may tighten or relax the global settings. Scalar fields replace
//! the global value; rule lists are merged with
//! [`geoguard_rules::merge_rules`] so a route can flip the sign of a single
//! global rule without restating the list.

use geoguard_rules::{merge_rules, Category, DefaultBehavior};
use serde::Deserialize;
use std::borrow::Cow;

use super::filters::{FilterSettings, FiltersConfig};

/// Overridable subset of [`FilterSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FilterOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub default_behavior: Option<DefaultBehavior>,
    #[serde(default)]
    pub rules: Option<Vec<String>>,
    #[serde(default)]
    pub allow_known: Option<bool>,
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,
}

impl FilterOverride {
    fn apply(&self, base: Option<&FilterSettings>) -> FilterSettings {
        let mut out = base.cloned().unwrap_or_default();
        if let Some(enabled) = self.enabled {
            out.enabled = enabled;
        }
        if let Some(behavior) = self.default_behavior {
            out.default_behavior = behavior;
        }
        if let Some(ref rules) = self.rules {
            out.rules = merge_rules(&out.rules, rules);
        }
        if let Some(allow_known) = self.allow_known {
            out.allow_known = allow_known;
        }
        if let Some(ref whitelist) = self.whitelist {
            out.whitelist = merge_rules(&out.whitelist, whitelist);
        }
        out
    }
}

/// Filter overrides by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FilterOverrides {
    #[serde(default)]
    pub navigator: Option<FilterOverride>,
    #[serde(default)]
    pub country: Option<FilterOverride>,
    #[serde(default)]
    pub ip: Option<FilterOverride>,
    #[serde(default)]
    pub crawler: Option<FilterOverride>,
    #[serde(default)]
    pub vpn: Option<FilterOverride>,
}

impl FilterOverrides {
    fn get(&self, category: Category) -> Option<&FilterOverride> {
        match category {
            Category::Navigator => self.navigator.as_ref(),
            Category::Country => self.country.as_ref(),
            Category::Ip => self.ip.as_ref(),
            Category::Crawler => self.crawler.as_ref(),
            Category::Vpn => self.vpn.as_ref(),
        }
    }

    fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|c| self.get(*c).is_none())
    }
}

/// Route-level override of resolver and filter settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RouteOverride {
    /// Provider alias preferred for this route (ignored if unknown).
    #[serde(default)]
    pub provider: Option<String>,
    /// Provider alias that wins over every other selection source.
    #[serde(default)]
    pub force_provider: Option<String>,
    #[serde(default)]
    pub cache_ttl: Option<u64>,
    #[serde(default)]
    pub block_on_error: Option<bool>,
    #[serde(default)]
    pub filters: FilterOverrides,
}

impl RouteOverride {
    /// Merge this route's filter overrides over `global`.
    ///
    /// Borrows `global` untouched when the route overrides no filter.
    pub fn merge_filters<'a>(&self, global: &'a FiltersConfig) -> Cow<'a, FiltersConfig> {
        if self.filters.is_empty() {
            return Cow::Borrowed(global);
        }
        let mut merged = global.clone();
        for category in Category::ALL {
            if let Some(o) = self.filters.get(category) {
                let settings = o.apply(global.get(category));
                *merged.slot_mut(category) = Some(settings);
            }
        }
        Cow::Owned(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global() -> FiltersConfig {
        let mut f = FiltersConfig::default();
        f.set(
            Category::Country,
            FilterSettings {
                rules: vec!["-FR".into(), "-DE".into()],
                ..FilterSettings::default()
            },
        );
        f
    }

    #[test]
    fn test_no_filter_override_borrows() {
        let g = global();
        let route = RouteOverride {
            cache_ttl: Some(10),
            ..RouteOverride::default()
        };
        assert!(matches!(route.merge_filters(&g), Cow::Borrowed(_)));
    }

    #[test]
    fn test_rules_merge_and_flip() {
        let g = global();
        let route: RouteOverride = toml::from_str(
            r#"
            [filters.country]
            default_behavior = "block"
            rules = ["+fr", "-IT"]
            "#,
        )
        .unwrap();

        let merged = route.merge_filters(&g);
        let country = merged.country.as_ref().unwrap();
        assert_eq!(country.rules, vec!["+fr", "-DE", "-IT"]);
        assert_eq!(country.default_behavior, DefaultBehavior::Block);
        // Global config is untouched.
        assert_eq!(g.country.as_ref().unwrap().rules, vec!["-FR", "-DE"]);
    }

    #[test]
    fn test_override_enables_unconfigured_filter() {
        let g = global();
        let route: RouteOverride = toml::from_str(
            r#"
            [filters.vpn]
            default_behavior = "block"
            "#,
        )
        .unwrap();
        let merged = route.merge_filters(&g);
        let vpn = merged.enabled(Category::Vpn).unwrap();
        assert_eq!(vpn.default_behavior, DefaultBehavior::Block);
    }

    #[test]
    fn test_override_disables_filter() {
        let g = global();
        let route: RouteOverride = toml::from_str("[filters.country]\nenabled = false\n").unwrap();
        assert!(route.merge_filters(&g).enabled(Category::Country).is_none());
    }
}
