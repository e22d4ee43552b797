//! Telemetry utilities for provider timing and request correlation.

use std::borrow::Cow;
use std::time::Instant;

/// Guard for timing a provider call and recording metrics.
///
/// Records latency when dropped. The outcome defaults to `abandoned` so a
/// call cancelled mid-flight is still counted.
pub struct ProviderTimer {
    provider: String,
    outcome: Cow<'static, str>,
    start: Instant,
}

impl ProviderTimer {
    /// Start timing a call to `provider`.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            outcome: Cow::Borrowed("abandoned"),
            start: Instant::now(),
        }
    }

    /// Set the outcome label recorded on drop (`ok` or an error code).
    pub fn finish(mut self, outcome: impl Into<Cow<'static, str>>) {
        self.outcome = outcome.into();
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Drop for ProviderTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_provider_call(&self.provider, &self.outcome, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for one guarded request.
    pub fn request(path: &str, ip: &str) -> Span {
        info_span!("request", path = %path, ip = %ip)
    }

    /// Span for a context resolution against one provider.
    pub fn resolve(provider: &str, cache_key: &str) -> Span {
        info_span!("resolve", provider = %provider, cache_key = %cache_key)
    }
}
