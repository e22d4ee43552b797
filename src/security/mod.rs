//! Request-level protection around the filter chain.
//!
//! - [`ban`]: attempt counting and ban escalation over [`crate::storage`]
//! - [`rate_limit`]: per-IP token buckets
//! - [`exclusions`]: requests that bypass the guard

pub mod ban;
pub mod exclusions;
pub mod rate_limit;

pub use ban::{BanManager, parse_ban_duration};
pub use exclusions::{ExclusionMatcher, ExclusionReason};
pub use rate_limit::RateLimiter;
