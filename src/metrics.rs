//! Prometheus metrics for the guard.
//!
//! Metrics live in `OnceLock` statics registered by [`init`]. Every recording
//! helper is a no-op until then, so library users who never call `init` pay
//! nothing.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Requests checked, by verdict.
pub static REQUESTS_CHECKED: OnceLock<IntCounterVec> = OnceLock::new();
/// Requests denied, by blocking filter.
pub static REQUESTS_BLOCKED: OnceLock<IntCounterVec> = OnceLock::new();
/// Bans issued by threshold escalation.
pub static BANS_ISSUED: OnceLock<IntCounter> = OnceLock::new();
/// Rate limit hits, `real` or `simulated`.
pub static RATE_LIMITED: OnceLock<IntCounterVec> = OnceLock::new();
/// Provider calls by provider and outcome.
pub static PROVIDER_CALLS: OnceLock<IntCounterVec> = OnceLock::new();
/// Provider call latency.
pub static PROVIDER_LATENCY: OnceLock<HistogramVec> = OnceLock::new();
/// Context cache lookups, `hit` or `miss`.
pub static CONTEXT_CACHE: OnceLock<IntCounterVec> = OnceLock::new();
/// Circuit breaker transitions to open, by provider.
pub static CIRCUIT_OPENS: OnceLock<IntCounterVec> = OnceLock::new();
/// Storage failures absorbed by callers, by operation and error.
pub static STORAGE_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize and register all metrics. Safe to call more than once.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                let m = $init.expect(concat!(stringify!($metric), " creation failed"));
                if let Err(e) = r.register(Box::new(m.clone())) {
                    tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                }
                let _ = $metric.set(m);
            }
        };
    }

    register!(REQUESTS_CHECKED, IntCounterVec::new(Opts::new("geoguard_requests_total", "Requests checked by verdict"), &["verdict"]));
    register!(REQUESTS_BLOCKED, IntCounterVec::new(Opts::new("geoguard_requests_blocked_total", "Requests denied by blocking filter"), &["filter"]));
    register!(BANS_ISSUED, IntCounter::new("geoguard_bans_issued_total", "Bans issued after reaching the attempt threshold"));
    register!(RATE_LIMITED, IntCounterVec::new(Opts::new("geoguard_rate_limited_total", "Rate limit hits"), &["mode"]));
    register!(PROVIDER_CALLS, IntCounterVec::new(Opts::new("geoguard_provider_calls_total", "Geolocation provider calls by outcome"), &["provider", "outcome"]));
    register!(PROVIDER_LATENCY, HistogramVec::new(
        HistogramOpts::new("geoguard_provider_duration_seconds", "Geolocation provider latency")
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["provider"]));
    register!(CONTEXT_CACHE, IntCounterVec::new(Opts::new("geoguard_context_cache_total", "Geo context cache lookups"), &["result"]));
    register!(CIRCUIT_OPENS, IntCounterVec::new(Opts::new("geoguard_circuit_opens_total", "Provider circuit breaker openings"), &["provider"]));
    register!(STORAGE_ERRORS, IntCounterVec::new(Opts::new("geoguard_storage_errors_total", "Storage failures absorbed by callers"), &["operation", "error"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn inc(metric: &OnceLock<IntCounterVec>, labels: &[&str]) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc();
    }
}

#[inline]
pub fn record_verdict(verdict: &str) {
    inc(&REQUESTS_CHECKED, &[verdict]);
}

#[inline]
pub fn record_blocked(filter: &str) {
    inc(&REQUESTS_BLOCKED, &[filter]);
}

#[inline]
pub fn record_ban() {
    if let Some(c) = BANS_ISSUED.get() {
        c.inc();
    }
}

/// `simulated` is true when the limit was hit in simulate mode.
#[inline]
pub fn record_rate_limited(simulated: bool) {
    inc(&RATE_LIMITED, &[if simulated { "simulated" } else { "real" }]);
}

/// Record a provider call with latency.
#[inline]
pub fn record_provider_call(provider: &str, outcome: &str, duration_secs: f64) {
    inc(&PROVIDER_CALLS, &[provider, outcome]);
    if let Some(h) = PROVIDER_LATENCY.get() {
        h.with_label_values(&[provider]).observe(duration_secs);
    }
}

#[inline]
pub fn record_cache(hit: bool) {
    inc(&CONTEXT_CACHE, &[if hit { "hit" } else { "miss" }]);
}

#[inline]
pub fn record_circuit_open(provider: &str) {
    inc(&CIRCUIT_OPENS, &[provider]);
}

#[inline]
pub fn record_storage_error(operation: &str, error: &str) {
    inc(&STORAGE_ERRORS, &[operation, error]);
}
