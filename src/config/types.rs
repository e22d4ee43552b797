//! Root configuration struct and loading.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use super::filters::FiltersConfig;
use super::guard::{BanConfig, ExclusionConfig, RateLimitConfig, SimulateConfig, StorageConfig};
use super::resolver::{ProviderConfig, ResolverConfig};

/// Configuration errors.
///
/// Everything here is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid provider DSN for '{alias}': {reason}")]
    InvalidProviderDsn { alias: String, reason: String },
    #[error("provider '{alias}' references undefined variable '{variable}'")]
    MissingProviderVariable { alias: String, variable: String },
    #[error("duplicate provider alias '{0}'")]
    DuplicateProvider(String),
    #[error("invalid storage DSN '{0}'")]
    InvalidStorageDsn(String),
    #[error("unsupported storage scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("storage driver '{0}' is not compiled in; use sqlite, file or redis")]
    UnsupportedDriver(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
    #[error("configuration is invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    /// Stable label for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Parse(_) => "parse",
            Self::InvalidProviderDsn { .. } => "invalid_provider_dsn",
            Self::MissingProviderVariable { .. } => "missing_provider_variable",
            Self::DuplicateProvider(_) => "duplicate_provider",
            Self::InvalidStorageDsn(_) => "invalid_storage_dsn",
            Self::UnsupportedScheme(_) => "unsupported_scheme",
            Self::UnsupportedDriver(_) => "unsupported_driver",
            Self::HttpClient(_) => "http_client",
            Self::Invalid(_) => "invalid",
        }
    }
}

/// Guard configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Geo context resolution.
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Geolocation providers, in declaration (fallback) order.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Ban and attempt storage.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Ban escalation.
    #[serde(default)]
    pub bans: BanConfig,
    /// Per-IP request rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Dry-run mode.
    #[serde(default)]
    pub simulate: SimulateConfig,
    /// Requests that bypass the guard entirely.
    #[serde(default)]
    pub exclusions: ExclusionConfig,
    /// Filter chain settings.
    #[serde(default)]
    pub filters: FiltersConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Look up a provider declaration by alias.
    pub fn provider(&self, alias: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.alias == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BanKeyStrategy, CacheKeyStrategy};
    use geoguard_rules::DefaultBehavior;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.resolver.cache_ttl, 300);
        assert_eq!(config.resolver.retries, 1);
        assert_eq!(config.resolver.breaker_threshold, 3);
        assert_eq!(config.resolver.breaker_cooldown_secs, 30);
        assert_eq!(config.resolver.cache_key_strategy, CacheKeyStrategy::Ip);
        assert_eq!(config.storage.dsn, "memory://");
        assert_eq!(config.bans.max_attempts, 10);
        assert_eq!(config.bans.duration, "1 hour");
        assert!(config.providers.is_empty());
        assert!(config.filters.country.is_none());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            [resolver]
            default_provider = "ipapi"
            fallback = true
            cache_ttl = 60
            cache_key_strategy = "session"
            trusted_headers = ["X-Forwarded-For"]

            [[providers]]
            alias = "ipapi"
            dsn = "ipapi+http://ip-api.com/json/{ip}"

            [[providers]]
            alias = "ipinfo"
            dsn = "ipinfo+https://ipinfo.io/{ip}?token={token}"
            variables = { token = "secret" }

            [storage]
            dsn = "sqlite::memory:"

            [bans]
            max_attempts = 3
            duration = "30 minutes"
            key_strategy = "session"

            [filters.country]
            default_behavior = "block"
            rules = ["+FR", "+DE"]

            [filters.crawler]
            allow_known = true
            rules = ["-discordbot"]

            [filters.priority]
            country = 99
            ip_filter = 5
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].alias, "ipinfo");
        assert_eq!(config.provider("ipinfo").unwrap().variables["token"], "secret");
        assert!(config.resolver.fallback);
        assert_eq!(config.resolver.cache_key_strategy, CacheKeyStrategy::Session);
        assert_eq!(config.bans.key_strategy, BanKeyStrategy::Session);

        let country = config.filters.country.as_ref().unwrap();
        assert!(country.enabled);
        assert_eq!(country.default_behavior, DefaultBehavior::Block);
        assert_eq!(country.rules, vec!["+FR", "+DE"]);
        assert!(config.filters.crawler.as_ref().unwrap().allow_known);
        assert_eq!(config.filters.priority["ip_filter"], 5);
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::from_toml(include_str!("../../geoguard.example.toml")).unwrap();
        assert_eq!(config.providers.len(), 3);
        assert!(crate::config::validation::validate(&config).is_ok());
        assert_eq!(config.filters.navigator.as_ref().unwrap().rules.len(), 2);
        assert!(!config.filters.vpn.as_ref().unwrap().enabled);
    }

    #[test]
    fn test_simulate_query_is_opt_in() {
        let config = Config::from_toml("[simulate]\nenabled = false\n").unwrap();
        assert!(!config.simulate.allow_query);
        assert_eq!(config.simulate.query_param, "geo_simulate");
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml("[resolver\n").unwrap_err();
        assert_eq!(err.error_code(), "parse");
    }
}
