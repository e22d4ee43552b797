//! Geo context resolution.
//!
//! Picks a provider, derives the cache identity (client IP or session),
//! serves cache hits and otherwise calls providers through their circuit
//! breakers, falling back across providers in declaration order when enabled.

mod cache;

pub use cache::{ContextCache, MemoryContextCache, StorageContextCache};

use crate::config::{CacheKeyStrategy, ConfigError, ProviderConfig, ResolverConfig};
use crate::context::GeoContext;
use crate::provider::{Admission, CircuitBreaker, GeoProvider, ProviderError, ProviderHttp};
use crate::request::RequestInfo;
use crate::telemetry::spans;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{Instrument, debug, info, warn};

/// Per-request resolution knobs, usually taken from a route override.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions<'a> {
    /// Wins over every other provider source.
    pub force_provider: Option<&'a str>,
    /// Preferred over the configured default.
    pub provider: Option<&'a str>,
    /// Cache TTL for this resolution.
    pub cache_ttl: Option<u64>,
}

/// Build a cache key from a provider alias and an identity, keeping only
/// `[A-Za-z0-9_.]` and mapping everything else to `_`.
pub fn cache_key(provider: &str, ip: &str, session: Option<&str>) -> String {
    let raw = match session {
        Some(sid) => format!("ctx:{provider}:sess:{sid}"),
        None => format!("ctx:{provider}:{ip}"),
    };
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct GeoContextResolver {
    config: ResolverConfig,
    /// Declaration order; fallback walks it front to back.
    providers: Vec<GeoProvider>,
    http: ProviderHttp,
    breaker: CircuitBreaker,
    cache: Arc<dyn ContextCache>,
    /// This host's public address. Only a successful lookup is kept, so a
    /// failed one is retried on the next private client.
    public_ip: OnceCell<IpAddr>,
}

impl GeoContextResolver {
    pub fn new(
        config: ResolverConfig,
        providers: &[ProviderConfig],
        cache: Arc<dyn ContextCache>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let providers = providers
            .iter()
            .map(|p| {
                if !seen.insert(p.alias.as_str()) {
                    return Err(ConfigError::DuplicateProvider(p.alias.clone()));
                }
                GeoProvider::from_config(p)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let http = ProviderHttp::new(&config)?;
        let breaker = CircuitBreaker::new(
            config.breaker_threshold,
            Duration::from_secs(config.breaker_cooldown_secs),
        );

        info!(
            providers = providers.len(),
            default = config.default_provider.as_deref().unwrap_or("-"),
            fallback = config.fallback,
            "Geo context resolver initialized"
        );

        Ok(Self {
            config,
            providers,
            http,
            breaker,
            cache,
            public_ip: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn providers(&self) -> &[GeoProvider] {
        &self.providers
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn provider(&self, alias: &str) -> Option<&GeoProvider> {
        self.providers.iter().find(|p| p.alias() == alias)
    }

    /// Client address as seen through the trusted proxy headers.
    pub fn client_ip(&self, request: &RequestInfo) -> Option<IpAddr> {
        request.client_ip(&self.config.trusted_headers)
    }

    /// Effective provider: forced, then per-route, then configured default,
    /// then the first declared. Unknown aliases fall through.
    pub fn select_provider(&self, options: &ResolveOptions<'_>) -> Option<&GeoProvider> {
        [
            options.force_provider,
            options.provider,
            self.config.default_provider.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find_map(|alias| {
            let found = self.provider(alias);
            if found.is_none() {
                debug!(provider = %alias, "Unknown provider alias, falling through");
            }
            found
        })
        .or_else(|| self.providers.first())
    }

    /// Resolve the context for `request`, or `None` when no provider could
    /// answer.
    pub async fn resolve(
        &self,
        request: &RequestInfo,
        options: &ResolveOptions<'_>,
    ) -> Option<GeoContext> {
        let Some(ip) = self.client_ip(request) else {
            warn!(path = %request.path, "No client IP, cannot resolve context");
            return None;
        };
        let primary = self.select_provider(options)?;

        let session = match self.config.cache_key_strategy {
            CacheKeyStrategy::Session => request.session(&self.config.session_cookie),
            CacheKeyStrategy::Ip => None,
        };
        let ttl = options.cache_ttl.unwrap_or(self.config.cache_ttl);
        let ip_text = ip.to_string();

        let mut candidates = vec![primary];
        if self.config.fallback {
            candidates.extend(self.providers.iter().filter(|p| p.alias() != primary.alias()));
        }

        for provider in candidates {
            let key = cache_key(provider.alias(), &ip_text, session.as_deref());

            if let Some(context) = self.cache.get(&key).await {
                crate::metrics::record_cache(true);
                debug!(provider = %provider.alias(), key = %key, "Context cache hit");
                return Some(context);
            }
            crate::metrics::record_cache(false);

            let target = self.lookup_address(ip).await;
            let result = self
                .call(provider, target)
                .instrument(spans::resolve(provider.alias(), &key))
                .await;

            match result {
                Ok(context) => {
                    self.cache.set(&key, &context, ttl).await;
                    return Some(context);
                }
                Err(e) if self.config.fallback => {
                    debug!(provider = %provider.alias(), code = %e.error_code(), "Trying next provider");
                }
                Err(_) => break,
            }
        }

        warn!(ip = %ip, "All providers failed to resolve context");
        None
    }

    /// Look `ip` up directly, skipping the cache. Used by the CLI.
    pub async fn lookup(&self, ip: IpAddr, alias: Option<&str>) -> Result<GeoContext, ProviderError> {
        let provider = match alias {
            Some(alias) => self
                .provider(alias)
                .ok_or_else(|| ProviderError::UnknownProvider(alias.to_string()))?,
            None => self
                .select_provider(&ResolveOptions::default())
                .ok_or_else(|| ProviderError::UnknownProvider("(none configured)".into()))?,
        };
        let target = self.lookup_address(ip).await;
        self.call(provider, target).await
    }

    /// Private and loopback addresses are swapped for this host's public
    /// address when one can be discovered.
    async fn lookup_address(&self, ip: IpAddr) -> IpAddr {
        if geoguard_rules::is_public_ip(&ip) {
            return ip;
        }
        let Some(url) = self.config.public_ip_url() else {
            return ip;
        };
        let public = self
            .public_ip
            .get_or_try_init(|| async {
                match self.http.public_ip(url).await {
                    Some(public) => {
                        info!(ip = %public, "Using public address for private clients");
                        Ok(public)
                    }
                    None => {
                        warn!(client = %ip, "Public address lookup failed, keeping private address");
                        Err(())
                    }
                }
            })
            .await;
        public.map_or(ip, |public| *public)
    }

    async fn call(&self, provider: &GeoProvider, ip: IpAddr) -> Result<GeoContext, ProviderError> {
        let alias = provider.alias();
        if self.breaker.admit(alias) == Admission::Rejected {
            debug!(provider = %alias, "Circuit open, skipping provider");
            return Err(ProviderError::CircuitOpen(alias.to_string()));
        }

        let result = provider.lookup(&self.http, ip).await;
        match &result {
            // A rejection is a well-formed answer; the provider is healthy.
            Ok(_) | Err(ProviderError::Rejected(_)) => self.breaker.record_success(alias),
            Err(_) => self.breaker.record_failure(alias),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider(alias: &str) -> ProviderConfig {
        ProviderConfig {
            alias: alias.into(),
            dsn: format!("ipapi+http://{alias}.test/json/{{ip}}"),
            variables: HashMap::new(),
        }
    }

    fn resolver(default: Option<&str>) -> GeoContextResolver {
        let config = ResolverConfig {
            default_provider: default.map(str::to_string),
            ..ResolverConfig::default()
        };
        GeoContextResolver::new(
            config,
            &[provider("alpha"), provider("beta"), provider("gamma")],
            Arc::new(MemoryContextCache::new(16)),
        )
        .unwrap()
    }

    #[test]
    fn test_cache_key_sanitized() {
        assert_eq!(cache_key("ipapi", "8.8.8.8", None), "ctx_ipapi_8.8.8.8");
        assert_eq!(cache_key("ipapi", "2001:db8::1", None), "ctx_ipapi_2001_db8__1");
        assert_eq!(
            cache_key("ipinfo", "8.8.8.8", Some("ab/c+d=")),
            "ctx_ipinfo_sess_ab_c_d_"
        );
    }

    fn pick(r: &GeoContextResolver, force: Option<&str>, provider: Option<&str>) -> Option<String> {
        r.select_provider(&ResolveOptions {
            force_provider: force,
            provider,
            cache_ttl: None,
        })
        .map(|p| p.alias().to_string())
    }

    #[test]
    fn test_provider_selection_order() {
        let r = resolver(Some("beta"));
        assert_eq!(pick(&r, None, None).as_deref(), Some("beta"));
        assert_eq!(pick(&r, None, Some("gamma")).as_deref(), Some("gamma"));
        assert_eq!(pick(&r, Some("alpha"), Some("gamma")).as_deref(), Some("alpha"));
        assert_eq!(pick(&r, Some("nope"), Some("gamma")).as_deref(), Some("gamma"));

        let r = resolver(Some("missing"));
        assert_eq!(pick(&r, None, None).as_deref(), Some("alpha"));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let result = GeoContextResolver::new(
            ResolverConfig::default(),
            &[provider("alpha"), provider("alpha")],
            Arc::new(MemoryContextCache::new(16)),
        );
        assert!(matches!(result, Err(ConfigError::DuplicateProvider(a)) if a == "alpha"));
    }
}
