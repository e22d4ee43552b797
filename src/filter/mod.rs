//! Request filters.
//!
//! Each filter looks at one aspect of a request (user agent, country, IP,
//! crawler signature, anonymizing network) and returns:
//!
//! - `Some(deny)`: the request is refused; the chain stops
//! - `Some(allow)`: explicit allow; later filters still run
//! - `None`: no opinion
//!
//! Filters are stateless. Their settings arrive per request through
//! [`FilterInput`], already merged with any route override.

mod chain;
mod country;
mod crawler;
mod ip;
mod navigator;
mod vpn;

pub use chain::{FilterChain, default_priority};
pub use country::CountryFilter;
pub use crawler::CrawlerFilter;
pub use ip::IpFilter;
pub use navigator::NavigatorFilter;
pub use vpn::VpnFilter;

use crate::config::{FilterSettings, FiltersConfig};
use crate::context::GeoContext;
use crate::request::RequestInfo;
use geoguard_rules::{Category, Decision};
use thiserror::Error;

/// Errors a filter may report. The chain logs them and treats the filter as
/// having no opinion.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("header {0} is not valid text")]
    InvalidHeader(&'static str),
    #[error("client address unavailable")]
    MissingClientIp,
}

impl FilterError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidHeader(_) => "invalid_header",
            Self::MissingClientIp => "missing_client_ip",
        }
    }
}

/// Everything a filter may look at.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub request: &'a RequestInfo,
    /// Client address as resolved from trusted headers or the transport.
    pub client_ip: Option<&'a str>,
    pub context: &'a GeoContext,
    pub filters: &'a FiltersConfig,
}

impl<'a> FilterInput<'a> {
    /// User agent of the request, empty when absent.
    pub fn user_agent(&self) -> Result<&'a str, FilterError> {
        self.request
            .user_agent()
            .map(Option::unwrap_or_default)
            .map_err(|_| FilterError::InvalidHeader("User-Agent"))
    }
}

/// A request filter.
pub trait Filter: Send + Sync {
    fn category(&self) -> Category;

    /// Stable identifier, also accepted as a priority key.
    fn code(&self) -> &'static str;

    /// Settings for this filter when present and enabled.
    fn settings<'a>(&self, filters: &'a FiltersConfig) -> Option<&'a FilterSettings> {
        filters.enabled(self.category())
    }

    fn is_enabled(&self, filters: &FiltersConfig) -> bool {
        self.settings(filters).is_some()
    }

    fn decide(&self, input: &FilterInput<'_>) -> Result<Option<Decision>, FilterError>;
}

/// Category named by a priority key: a category name or a filter code
/// (`ip_filter`, `country_filter`, ...).
pub fn category_for_key(key: &str) -> Option<Category> {
    let key = key.trim();
    let name = key.strip_suffix("_filter").unwrap_or(key);
    name.parse().ok()
}
