//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Resolver Defaults
// =============================================================================

pub fn default_cache_ttl() -> u64 {
    300
}

pub fn default_cache_max_entries() -> usize {
    10_000
}

pub fn default_session_cookie() -> String {
    "session".to_string()
}

pub fn default_public_ip_url() -> Option<String> {
    Some("https://api.ipify.org".to_string())
}

pub fn default_retries() -> u32 {
    1
}

pub fn default_breaker_threshold() -> u32 {
    3
}

pub fn default_breaker_cooldown() -> u64 {
    30
}

pub fn default_request_timeout() -> u64 {
    8
}

pub fn default_read_timeout() -> u64 {
    5
}

pub fn default_public_ip_timeout() -> u64 {
    3
}

// =============================================================================
// Storage & Ban Defaults
// =============================================================================

pub fn default_storage_dsn() -> String {
    "memory://".to_string()
}

pub fn default_max_attempts() -> u64 {
    10
}

pub fn default_attempts_ttl() -> u64 {
    3600
}

pub fn default_ban_duration() -> String {
    "1 hour".to_string()
}

// =============================================================================
// Rate Limit & Simulate Defaults
// =============================================================================

pub fn default_requests_per_second() -> u32 {
    10
}

pub fn default_burst() -> u32 {
    20
}

pub fn default_simulate_param() -> String {
    "geo_simulate".to_string()
}
