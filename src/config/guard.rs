//! Storage, ban escalation, rate limiting, simulate mode and exclusions.

use serde::Deserialize;

use super::defaults::*;

/// Storage configuration (`[storage]`).
///
/// The DSN scheme picks the backend: `file://`, `json://`, `memory://`,
/// `sqlite://`, `sqlite::memory:`, `doctrine://` or `redis://`.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dsn")]
    pub dsn: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: default_storage_dsn(),
        }
    }
}

/// How a ban bucket is derived from a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanKeyStrategy {
    /// `ip-<ip>`
    #[default]
    Ip,
    /// `sess-<hash>` when a session id is present, else by IP.
    Session,
}

/// Ban escalation (`[bans]`).
#[derive(Debug, Clone, Deserialize)]
pub struct BanConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Denials within the attempt window before a ban.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,
    /// Attempt window in seconds; also the ban length when `duration`
    /// cannot be parsed.
    #[serde(default = "default_attempts_ttl")]
    pub ttl: u64,
    /// Human readable ban length, e.g. `"1 hour"`, `"30 minutes"`, `"2d"`.
    #[serde(default = "default_ban_duration")]
    pub duration: String,
    #[serde(default)]
    pub key_strategy: BanKeyStrategy,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            ttl: default_attempts_ttl(),
            duration: default_ban_duration(),
            key_strategy: BanKeyStrategy::default(),
        }
    }
}

/// Rate limiting configuration (`[rate_limit]`).
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sustained requests per second per client IP.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Bucket size.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

/// Simulate (dry-run) mode (`[simulate]`).
///
/// In simulate mode nothing is blocked: denials and rate limit hits are
/// logged and counted instead.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulateConfig {
    /// Simulate every request.
    #[serde(default)]
    pub enabled: bool,
    /// Honor `?<query_param>=1` on individual requests. Off by default, so
    /// the query parameter is ignored until an operator opts in.
    #[serde(default)]
    pub allow_query: bool,
    #[serde(default = "default_simulate_param")]
    pub query_param: String,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_query: false,
            query_param: default_simulate_param(),
        }
    }
}

/// Requests that skip the guard (`[exclusions]`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExclusionConfig {
    /// Path prefixes, or `~<regex>` for a regular expression.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Exact addresses or CIDR ranges.
    #[serde(default)]
    pub ips: Vec<String>,
    /// User-agent patterns (word, substring or `/regex/flags`).
    #[serde(default)]
    pub user_agents: Vec<String>,
}
