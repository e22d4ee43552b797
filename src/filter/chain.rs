//! Priority-ordered filter chain.

use super::{
    CountryFilter, CrawlerFilter, Filter, FilterInput, IpFilter, NavigatorFilter, VpnFilter,
    category_for_key,
};
use geoguard_rules::{Category, Decision};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Built-in priority of a category. Higher runs first.
pub fn default_priority(category: Category) -> i32 {
    match category {
        Category::Navigator => 50,
        Category::Country => 40,
        Category::Ip => 30,
        Category::Crawler => 20,
        Category::Vpn => 10,
    }
}

struct Registered {
    priority: i32,
    filter: Box<dyn Filter>,
}

/// Filters sorted once at construction.
pub struct FilterChain {
    filters: Vec<Registered>,
}

impl FilterChain {
    pub fn empty() -> Self {
        Self { filters: Vec::new() }
    }

    /// The five built-in filters, with priorities from `overrides` (keyed by
    /// category name or filter code) or their defaults.
    pub fn with_defaults(overrides: &HashMap<String, i32>) -> Self {
        let resolved: HashMap<Category, i32> = overrides
            .iter()
            .filter_map(|(k, v)| category_for_key(k).map(|c| (c, *v)))
            .collect();
        let priority = |c: Category| resolved.get(&c).copied().unwrap_or_else(|| default_priority(c));

        Self::empty()
            .register(Box::new(NavigatorFilter), priority(Category::Navigator))
            .register(Box::new(CountryFilter), priority(Category::Country))
            .register(Box::new(IpFilter), priority(Category::Ip))
            .register(Box::new(CrawlerFilter), priority(Category::Crawler))
            .register(Box::new(VpnFilter), priority(Category::Vpn))
    }

    /// Add a filter. Equal priorities keep registration order.
    pub fn register(mut self, filter: Box<dyn Filter>, priority: i32) -> Self {
        let at = self
            .filters
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(self.filters.len());
        self.filters.insert(at, Registered { priority, filter });
        self
    }

    /// Filter codes in evaluation order.
    pub fn order(&self) -> Vec<&'static str> {
        self.filters.iter().map(|r| r.filter.code()).collect()
    }

    /// Run the chain: the first denial wins, otherwise the last explicit
    /// allow, otherwise `None`.
    pub fn decide(&self, input: &FilterInput<'_>) -> Option<Decision> {
        let mut last_allow = None;

        for Registered { filter, .. } in &self.filters {
            if !filter.is_enabled(input.filters) {
                continue;
            }
            match filter.decide(input) {
                Ok(Some(decision)) if decision.is_deny() => {
                    debug!(filter = filter.code(), reason = ?decision.reason, "Filter denied request");
                    return Some(decision);
                }
                Ok(Some(decision)) => last_allow = Some(decision),
                Ok(None) => {}
                Err(e) => {
                    warn!(filter = filter.code(), error = %e, code = e.error_code(), "Filter failed, skipping");
                }
            }
        }

        last_allow
    }
}
