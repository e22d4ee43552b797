//! Per-provider circuit breaker.
//!
//! closed -> open after `threshold` consecutive failures; open rejects calls
//! until `cooldown` elapses; the first call after that is a half-open probe
//! that closes the circuit on success or reopens it on failure.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker state for one provider alias.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerState {
    pub failures: u32,
    pub opened_until: Option<Instant>,
    pub half_open: bool,
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Closed,
    /// Cooldown elapsed; this call decides whether the circuit closes.
    Probe,
    Rejected,
}

/// Circuit breakers keyed by provider alias. Process-local, never persisted.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn admit(&self, alias: &str) -> Admission {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(alias) else {
            return Admission::Closed;
        };
        match state.opened_until {
            Some(until) if Instant::now() < until => Admission::Rejected,
            Some(_) => {
                state.opened_until = None;
                state.half_open = true;
                info!(provider = %alias, "Circuit half-open, probing provider");
                Admission::Probe
            }
            None if state.half_open => Admission::Probe,
            None => Admission::Closed,
        }
    }

    pub fn record_success(&self, alias: &str) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(alias) {
            if state.half_open {
                info!(provider = %alias, "Circuit closed after successful probe");
            }
            *state = BreakerState::default();
        }
    }

    pub fn record_failure(&self, alias: &str) {
        let mut states = self.states.lock();
        let state = states.entry(alias.to_string()).or_default();
        state.failures = state.failures.saturating_add(1);

        if state.half_open || state.failures >= self.threshold {
            state.half_open = false;
            state.opened_until = Some(Instant::now() + self.cooldown);
            warn!(
                provider = %alias,
                failures = state.failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            );
            crate::metrics::record_circuit_open(alias);
        }
    }

    /// Snapshot of `alias`'s state.
    pub fn state(&self, alias: &str) -> BreakerState {
        self.states.lock().get(alias).copied().unwrap_or_default()
    }
}
