//! Request orchestration.
//!
//! ```text
//! request ─► exclusions ─► rate limit ─► ban check ─► resolve ─► filter chain
//!                                                                    │
//!                                    deny ─► attempt / ban escalation ┘
//! ```
//!
//! Configuration is resolved once per request: the global filter settings
//! merged with the route override, if any.

mod response;

use crate::config::{BanKeyStrategy, Config, ContextCacheBackend, RouteOverride, validation};
use crate::context::GeoContext;
use crate::error::GuardResult;
use crate::filter::{FilterChain, FilterInput};
use crate::request::RequestInfo;
use crate::resolver::{
    ContextCache, GeoContextResolver, MemoryContextCache, ResolveOptions, StorageContextCache,
};
use crate::security::{BanManager, ExclusionMatcher, ExclusionReason, RateLimiter};
use crate::storage::{self, Storage, StorageDsn};
use crate::telemetry::spans;
use geoguard_rules::Decision;
use std::borrow::Cow;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{Instrument, debug, info};

/// Reason recorded when no provider could resolve a context and the request
/// is refused because of it.
pub const PROVIDER_ERROR_REASON: &str = "Provider error";

/// Outcome of checking one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Skipped by an exclusion rule; forwarded without context.
    Excluded(ExclusionReason),
    /// Forward the request.
    Allowed {
        /// `None` when resolution failed and the chain ran on the address alone.
        context: Option<GeoContext>,
        /// The chain's explicit decision, if any. A denial here means the
        /// request would have been refused outside simulate mode.
        decision: Option<Decision>,
        simulated: bool,
    },
    Denied {
        decision: Decision,
        context: Option<GeoContext>,
    },
    Banned {
        bucket: String,
        /// Seconds until the ban lifts; `None` for permanent bans.
        retry_after: Option<u64>,
    },
    RateLimited {
        retry_after: u64,
    },
}

impl Verdict {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Excluded(_) => "excluded",
            Self::Allowed {
                simulated: true,
                decision: Some(d),
                ..
            } if d.is_deny() => "simulated",
            Self::Allowed { .. } => "allowed",
            Self::Denied { .. } => "denied",
            Self::Banned { .. } => "banned",
            Self::RateLimited { .. } => "rate_limited",
        }
    }

    /// Returns `true` if the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Excluded(_) | Self::Allowed { .. })
    }
}

/// The assembled access-control engine.
pub struct Guard {
    config: Config,
    storage: Arc<dyn Storage>,
    resolver: GeoContextResolver,
    bans: BanManager,
    chain: FilterChain,
    rate_limiter: Option<RateLimiter>,
    exclusions: ExclusionMatcher,
}

impl Guard {
    /// Validate `config`, open its storage backend and build the guard.
    pub async fn from_config(config: Config) -> GuardResult<Self> {
        if let Err(errors) = validation::validate(&config) {
            let messages = errors.iter().map(ToString::to_string).collect();
            return Err(crate::config::ConfigError::Invalid(messages).into());
        }

        let dsn = StorageDsn::parse(&config.storage.dsn)?;
        let storage = storage::connect(&dsn).await?;
        let cache: Arc<dyn ContextCache> = match config.resolver.cache_backend {
            ContextCacheBackend::Memory => {
                Arc::new(MemoryContextCache::new(config.resolver.cache_max_entries))
            }
            ContextCacheBackend::Storage => Arc::new(StorageContextCache::new(storage.clone())),
        };

        Self::new(config, storage, cache)
    }

    /// Build a guard over an already opened storage backend and cache.
    pub fn new(
        config: Config,
        storage: Arc<dyn Storage>,
        cache: Arc<dyn ContextCache>,
    ) -> GuardResult<Self> {
        let resolver =
            GeoContextResolver::new(config.resolver.clone(), &config.providers, cache)?;
        let bans = BanManager::new(storage.clone(), config.bans.clone());
        let chain = FilterChain::with_defaults(&config.filters.priority);
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimiter::new(&config.rate_limit));
        let exclusions = ExclusionMatcher::new(&config.exclusions);

        info!(
            storage = storage.storage_type(),
            filters = ?chain.order(),
            rate_limit = rate_limiter.is_some(),
            bans = config.bans.enabled,
            simulate = config.simulate.enabled,
            "Guard ready"
        );

        Ok(Self {
            config,
            storage,
            resolver,
            bans,
            chain,
            rate_limiter,
            exclusions,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn resolver(&self) -> &GeoContextResolver {
        &self.resolver
    }

    pub fn bans(&self) -> &BanManager {
        &self.bans
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    /// Check one request, optionally under a route override.
    pub async fn check(&self, request: &RequestInfo, route: Option<&RouteOverride>) -> Verdict {
        let client_ip = self.resolver.client_ip(request);
        let ip_text = client_ip.map(|ip| ip.to_string()).unwrap_or_default();
        let span = spans::request(&request.path, &ip_text);

        let verdict = self
            .evaluate(request, route, client_ip, &ip_text)
            .instrument(span)
            .await;

        crate::metrics::record_verdict(verdict.label());
        verdict
    }

    /// Simulate mode for this request: globally, or by query parameter when
    /// allowed.
    pub fn is_simulated(&self, request: &RequestInfo) -> bool {
        let simulate = &self.config.simulate;
        simulate.enabled
            || (simulate.allow_query
                && request
                    .query_param(&simulate.query_param)
                    .is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes" | "on")))
    }

    fn bucket_for(&self, request: &RequestInfo, client_ip: Option<IpAddr>, ip: &str) -> Option<String> {
        if !self.config.bans.enabled {
            return None;
        }
        let session = request
            .session(&self.config.resolver.session_cookie)
            .filter(|sid| !sid.is_empty());
        let by_session =
            self.config.bans.key_strategy == BanKeyStrategy::Session && session.is_some();
        if client_ip.is_none() && !by_session {
            return None;
        }
        Some(self.bans.bucket_for(ip, session.as_deref()))
    }

    async fn evaluate(
        &self,
        request: &RequestInfo,
        route: Option<&RouteOverride>,
        client_ip: Option<IpAddr>,
        ip: &str,
    ) -> Verdict {
        let user_agent = request.user_agent().ok().flatten();
        if let Some(reason) = self.exclusions.check(&request.path, client_ip, user_agent) {
            debug!(reason = ?reason, "Request excluded");
            return Verdict::Excluded(reason);
        }

        let simulated = self.is_simulated(request);

        if let (Some(limiter), Some(addr)) = (&self.rate_limiter, client_ip)
            && let Err(wait) = limiter.check(addr)
        {
            crate::metrics::record_rate_limited(simulated);
            if !simulated {
                info!(retry_after_ms = wait.as_millis() as u64, "Rate limited");
                return Verdict::RateLimited {
                    retry_after: wait.as_secs().max(1),
                };
            }
            info!(mode = "simulated", "Rate limit exceeded");
        }

        let bucket = self.bucket_for(request, client_ip, ip);
        if let Some(bucket) = &bucket
            && self.bans.is_banned(bucket).await
        {
            if !simulated {
                let retry_after = self.bans.retry_after(bucket).await;
                info!(bucket = %bucket, "Banned client refused");
                return Verdict::Banned {
                    bucket: bucket.clone(),
                    retry_after,
                };
            }
            info!(bucket = %bucket, mode = "simulated", "Banned client let through");
        }

        let options = ResolveOptions {
            force_provider: route.and_then(|r| r.force_provider.as_deref()),
            provider: route.and_then(|r| r.provider.as_deref()),
            cache_ttl: route.and_then(|r| r.cache_ttl),
        };
        let resolved = self.resolver.resolve(request, &options).await;

        if resolved.is_none() {
            let block_on_error = route
                .and_then(|r| r.block_on_error)
                .unwrap_or(self.config.resolver.block_on_error);
            if block_on_error {
                let decision = Decision::deny_unattributed(PROVIDER_ERROR_REASON);
                crate::metrics::record_blocked("provider");
                return self.refuse(decision, None, None, simulated).await;
            }
        }

        let filters = match route {
            Some(r) => r.merge_filters(&self.config.filters),
            None => Cow::Borrowed(&self.config.filters),
        };
        let fallback_context;
        let context = match &resolved {
            Some(ctx) => ctx,
            None => {
                fallback_context = GeoContext::unresolved(ip);
                &fallback_context
            }
        };
        let input = FilterInput {
            request,
            client_ip: client_ip.map(|_| ip),
            context,
            filters: &filters,
        };

        match self.chain.decide(&input) {
            Some(decision) if decision.is_deny() => {
                let filter = decision
                    .blocking_filter
                    .map(|c| c.as_str())
                    .unwrap_or("unattributed");
                crate::metrics::record_blocked(filter);
                self.refuse(decision, resolved, bucket.as_deref(), simulated).await
            }
            decision => Verdict::Allowed {
                context: resolved,
                decision,
                simulated,
            },
        }
    }

    /// Deny, or let through in simulate mode. Real denials count against the
    /// bucket when one is given.
    async fn refuse(
        &self,
        decision: Decision,
        context: Option<GeoContext>,
        bucket: Option<&str>,
        simulated: bool,
    ) -> Verdict {
        let reason = decision.reason.as_deref().unwrap_or("denied");

        if simulated {
            info!(reason = %reason, mode = "simulated", "Request would be denied");
            return Verdict::Allowed {
                context,
                decision: Some(decision),
                simulated: true,
            };
        }

        info!(reason = %reason, "Request denied");
        if let Some(bucket) = bucket {
            let attempts = self.bans.increment(bucket, reason).await;
            debug!(bucket = %bucket, attempts, "Denial counted");
        }

        Verdict::Denied { decision, context }
    }
}
