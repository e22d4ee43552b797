//! Filter chain configuration (`[filters.*]`).

use geoguard_rules::{Category, DefaultBehavior};
use serde::Deserialize;
use std::collections::HashMap;

use super::defaults::default_true;

/// Settings for one filter category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilterSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Outcome when no rule matched.
    #[serde(default)]
    pub default_behavior: DefaultBehavior,
    /// Signed rules: `+pattern` allows, `-pattern` denies.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Crawler filter only: let well-known search engine crawlers through.
    #[serde(default)]
    pub allow_known: bool,
    /// IP filter only: extra `+` entries that explicitly allow.
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_behavior: DefaultBehavior::Allow,
            rules: Vec::new(),
            allow_known: false,
            whitelist: Vec::new(),
        }
    }
}

/// All filter settings. A missing category means the filter is off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FiltersConfig {
    #[serde(default)]
    pub navigator: Option<FilterSettings>,
    #[serde(default)]
    pub country: Option<FilterSettings>,
    #[serde(default)]
    pub ip: Option<FilterSettings>,
    #[serde(default)]
    pub crawler: Option<FilterSettings>,
    #[serde(default)]
    pub vpn: Option<FilterSettings>,
    /// Priority overrides keyed by category name or filter code.
    #[serde(default)]
    pub priority: HashMap<String, i32>,
}

impl FiltersConfig {
    /// Settings for `category`, if configured.
    pub fn get(&self, category: Category) -> Option<&FilterSettings> {
        match category {
            Category::Navigator => self.navigator.as_ref(),
            Category::Country => self.country.as_ref(),
            Category::Ip => self.ip.as_ref(),
            Category::Crawler => self.crawler.as_ref(),
            Category::Vpn => self.vpn.as_ref(),
        }
    }

    /// Settings for `category` only when present and enabled.
    pub fn enabled(&self, category: Category) -> Option<&FilterSettings> {
        self.get(category).filter(|s| s.enabled)
    }

    pub(crate) fn slot_mut(&mut self, category: Category) -> &mut Option<FilterSettings> {
        match category {
            Category::Navigator => &mut self.navigator,
            Category::Country => &mut self.country,
            Category::Ip => &mut self.ip,
            Category::Crawler => &mut self.crawler,
            Category::Vpn => &mut self.vpn,
        }
    }

    /// Replace the settings for `category`.
    pub fn set(&mut self, category: Category, settings: FilterSettings) {
        *self.slot_mut(category) = Some(settings);
    }
}
