//! Authorization decisions and filter categories.

use std::fmt;
use std::str::FromStr;

/// Filter category a decision originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Category {
    /// User-Agent based filtering.
    Navigator,
    /// ISO country code filtering.
    Country,
    /// Exact IP and CIDR filtering.
    Ip,
    /// Search engine and bot filtering.
    Crawler,
    /// Proxy and hosting network filtering.
    Vpn,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Category; 5] = [
        Category::Navigator,
        Category::Country,
        Category::Ip,
        Category::Crawler,
        Category::Vpn,
    ];

    /// Stable lowercase tag used in config keys and response payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Navigator => "navigator",
            Category::Country => "country",
            Category::Ip => "ip",
            Category::Crawler => "crawler",
            Category::Vpn => "vpn",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "navigator" | "user_agent" | "useragent" => Ok(Category::Navigator),
            "country" => Ok(Category::Country),
            "ip" => Ok(Category::Ip),
            "crawler" | "bot" => Ok(Category::Crawler),
            "vpn" | "proxy" => Ok(Category::Vpn),
            other => Err(format!("unknown filter category: {other}")),
        }
    }
}

/// What a filter does when none of its rules matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DefaultBehavior {
    /// Let the request through.
    #[default]
    Allow,
    /// Refuse the request.
    #[cfg_attr(feature = "serde", serde(alias = "deny"))]
    Block,
}

impl DefaultBehavior {
    /// Returns `true` for [`DefaultBehavior::Allow`].
    #[inline]
    pub fn is_allow(&self) -> bool {
        matches!(self, DefaultBehavior::Allow)
    }
}

impl FromStr for DefaultBehavior {
    type Err = String;

    /// Accepts `allow`, `block` or `deny`, ignoring case. Anything else is an
    /// error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(DefaultBehavior::Allow),
            "block" | "deny" => Ok(DefaultBehavior::Block),
            other => Err(format!("unknown default behavior: {other}")),
        }
    }
}

/// Result of evaluating a filter or a whole chain.
///
/// Filters return `Option<Decision>`: `None` means "no opinion".
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Machine-readable reason, e.g. `country:FR` or `ip:default`.
    pub reason: Option<String>,
    /// Category of the filter that produced a denial.
    pub blocking_filter: Option<Category>,
}

impl Decision {
    /// An explicit allow.
    pub fn allow(reason: Option<String>) -> Self {
        Self {
            allowed: true,
            reason,
            blocking_filter: None,
        }
    }

    /// An explicit denial attributed to `category`.
    pub fn deny(category: Category, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            blocking_filter: Some(category),
        }
    }

    /// A denial that is not attributed to any filter (e.g. provider outage).
    pub fn deny_unattributed(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            blocking_filter: None,
        }
    }

    /// Returns `true` if this decision refuses the request.
    #[inline]
    pub fn is_deny(&self) -> bool {
        !self.allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
        assert!("geo".parse::<Category>().is_err());
    }

    #[test]
    fn default_behavior_parsing() {
        assert_eq!("allow".parse(), Ok(DefaultBehavior::Allow));
        assert_eq!("BLOCK".parse(), Ok(DefaultBehavior::Block));
        assert_eq!("deny".parse(), Ok(DefaultBehavior::Block));
        assert!("maybe".parse::<DefaultBehavior>().is_err());
    }

    #[test]
    fn deny_carries_category() {
        let d = Decision::deny(Category::Country, "country:FR");
        assert!(d.is_deny());
        assert_eq!(d.blocking_filter, Some(Category::Country));
        assert_eq!(d.reason.as_deref(), Some("country:FR"));
    }
}
