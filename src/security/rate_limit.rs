//! Per-IP request rate limiting.
//!
//! Uses the `governor` crate's token bucket algorithm: each client IP gets
//! its own direct limiter refilling at `requests_per_second` with room for
//! `burst` requests.

use crate::config::RateLimitConfig;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Entries kept before the limiter map is reset.
const MAX_ENTRIES: usize = 10_000;

/// Thread-safe per-IP rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    limiters: DashMap<IpAddr, DirectRateLimiter>,
    quota: Quota,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(nonzero!(10u32));
        let burst = NonZeroU32::new(config.burst).unwrap_or(rate);
        Self {
            limiters: DashMap::new(),
            quota: Quota::per_second(rate).allow_burst(burst),
            clock: DefaultClock::default(),
        }
    }

    /// Take one token for `ip`.
    ///
    /// `Err` carries how long the client should wait before retrying.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        if self.limiters.len() > MAX_ENTRIES && !self.limiters.contains_key(&ip) {
            self.cleanup();
        }

        let limiter = self
            .limiters
            .entry(ip)
            .or_insert_with(|| GovRateLimiter::direct(self.quota));

        match limiter.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                debug!(ip = %ip, wait_ms = wait.as_millis() as u64, "request rate limit exceeded");
                Err(wait)
            }
        }
    }

    /// Drop every limiter once the map grows past its bound.
    pub fn cleanup(&self) {
        if self.limiters.len() > MAX_ENTRIES {
            self.limiters.clear();
            debug!("cleared request rate limiters (exceeded {} entries)", MAX_ENTRIES);
        }
    }

    pub fn tracked(&self) -> usize {
        self.limiters.len()
    }
}
