//! Geo context resolution and provider configuration.

use serde::Deserialize;
use std::collections::HashMap;

use super::defaults::*;

/// Identity used to key cached geo contexts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKeyStrategy {
    /// Key by client IP.
    #[default]
    Ip,
    /// Key by session id when one is available, else by IP.
    Session,
}

/// Where resolved contexts are cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextCacheBackend {
    /// Process-local map.
    #[default]
    Memory,
    /// The configured ban storage's key-value namespace (shared across instances).
    Storage,
}

/// Resolver configuration (`[resolver]`).
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Provider alias used when a route does not name one.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Try the remaining providers when the selected one fails.
    #[serde(default)]
    pub fallback: bool,
    /// Seconds a resolved context stays cached.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    #[serde(default)]
    pub cache_key_strategy: CacheKeyStrategy,
    #[serde(default)]
    pub cache_backend: ContextCacheBackend,
    /// Upper bound for the in-process context cache.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Headers consulted for the client IP, in order. Empty means only the
    /// transport address is trusted.
    #[serde(default)]
    pub trusted_headers: Vec<String>,
    /// Cookie carrying the session id.
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// IP echo service used when the client address is not public.
    /// Set to an empty string to disable the lookup.
    #[serde(default = "default_public_ip_url")]
    pub public_ip_url: Option<String>,
    /// Deny requests when no provider could resolve a context.
    #[serde(default)]
    pub block_on_error: bool,
    /// Retries per provider call for transport errors, timeouts and 5xx.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Consecutive failures that open a provider's circuit.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Seconds an open circuit rejects calls.
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,
    /// Overall timeout per provider attempt, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Inactivity timeout while reading a provider response, in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_public_ip_timeout")]
    pub public_ip_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            fallback: false,
            cache_ttl: default_cache_ttl(),
            cache_key_strategy: CacheKeyStrategy::default(),
            cache_backend: ContextCacheBackend::default(),
            cache_max_entries: default_cache_max_entries(),
            trusted_headers: Vec::new(),
            session_cookie: default_session_cookie(),
            public_ip_url: default_public_ip_url(),
            block_on_error: false,
            retries: default_retries(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
            request_timeout_secs: default_request_timeout(),
            read_timeout_secs: default_read_timeout(),
            public_ip_timeout_secs: default_public_ip_timeout(),
        }
    }
}

impl ResolverConfig {
    /// The public-IP lookup URL, if the lookup is enabled.
    pub fn public_ip_url(&self) -> Option<&str> {
        self.public_ip_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// A geolocation provider declaration (`[[providers]]`).
///
/// The DSN is `<scheme>+<url template>`, where the scheme picks the response
/// mapper and the template contains `{ip}` plus any `{name}` placeholders
/// filled from `variables`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub alias: String,
    pub dsn: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}
