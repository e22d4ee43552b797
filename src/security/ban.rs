//! Ban escalation.
//!
//! Every denial counts as an attempt against the request's bucket. Once the
//! attempts inside the window reach `max_attempts`, the bucket is banned and
//! its counter is reset.
//!
//! Storage failures never surface to the request path: they are logged and
//! read as "not banned" / zero attempts.

use crate::config::{BanConfig, BanKeyStrategy};
use crate::storage::{BanInfo, BanRecord, Storage};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// Shortest ban ever issued, in seconds.
pub const MIN_BAN_SECS: u64 = 60;

/// Source recorded on bans issued by request handling.
pub const BAN_SOURCE: &str = "geoguard";

/// Parse a human readable duration: `"1 hour"`, `"30 minutes"`, `"2d"`,
/// `"15m"`, `"+1 day"`, `"1h 30m"`. A bare number is seconds.
///
/// Returns `None` for zero, negative or malformed input.
pub fn parse_ban_duration(s: &str) -> Option<chrono::Duration> {
    let s = s.trim().trim_start_matches('+').trim().to_ascii_lowercase();
    if s.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    let mut rest = s.as_str();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let n: i64 = rest[..digits].parse().ok()?;
        rest = rest[digits..].trim_start();

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit_secs = match &rest[..unit_len] {
            "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hr" | "hrs" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            "w" | "week" | "weeks" => 604_800,
            _ => return None,
        };
        rest = &rest[unit_len..];

        total = total.checked_add(n.checked_mul(unit_secs)?)?;
    }

    (total > 0).then(|| chrono::Duration::seconds(total))
}

/// Ban length in seconds for `duration`, falling back to `fallback_secs`
/// and never shorter than [`MIN_BAN_SECS`].
pub fn ban_ttl(duration: &str, fallback_secs: u64) -> u64 {
    let secs = parse_ban_duration(duration)
        .and_then(|d| u64::try_from(d.num_seconds()).ok())
        .unwrap_or(fallback_secs);
    secs.max(MIN_BAN_SECS)
}

/// Attempt counting and ban escalation.
pub struct BanManager {
    storage: Arc<dyn Storage>,
    config: BanConfig,
}

impl BanManager {
    pub fn new(storage: Arc<dyn Storage>, config: BanConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &BanConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Bucket for a client IP.
    pub fn ip_bucket(ip: &str) -> String {
        format!("ip-{ip}")
    }

    /// Bucket for a session id: the first 16 hex digits of its SHA-256.
    pub fn session_bucket(session_id: &str) -> String {
        let digest = Sha256::digest(session_id.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("sess-{hex}")
    }

    /// Bucket for a request under the configured key strategy.
    pub fn bucket_for(&self, ip: &str, session_id: Option<&str>) -> String {
        match (self.config.key_strategy, session_id) {
            (BanKeyStrategy::Session, Some(sid)) if !sid.is_empty() => Self::session_bucket(sid),
            _ => Self::ip_bucket(ip),
        }
    }

    /// Count one denial against `bucket`, banning it once the threshold is
    /// reached. Returns the attempt count that was recorded.
    pub async fn increment(&self, bucket: &str, reason: &str) -> u64 {
        let count = match self.storage.increment_attempts(bucket, self.config.ttl).await {
            Ok(count) => count,
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Failed to record attempt");
                crate::metrics::record_storage_error("increment_attempts", e.error_code());
                return 0;
            }
        };

        if count < self.config.max_attempts {
            return count;
        }

        let ttl = ban_ttl(&self.config.duration, self.config.ttl);
        let info = BanInfo::new(reason, BAN_SOURCE);
        if let Err(e) = self.storage.ban_ip(bucket, &info, Some(ttl)).await {
            warn!(bucket = %bucket, error = %e, "Failed to ban bucket");
            crate::metrics::record_storage_error("ban_ip", e.error_code());
            return count;
        }

        info!(bucket = %bucket, attempts = count, ttl_secs = ttl, reason = %reason, "Bucket banned");
        crate::metrics::record_ban();

        if let Err(e) = self.storage.reset_attempts(bucket).await {
            warn!(bucket = %bucket, error = %e, "Failed to reset attempts after ban");
        }
        count
    }

    pub async fn is_banned(&self, bucket: &str) -> bool {
        match self.storage.is_banned(bucket).await {
            Ok(banned) => banned,
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Ban lookup failed, treating as not banned");
                crate::metrics::record_storage_error("is_banned", e.error_code());
                false
            }
        }
    }

    /// Seconds until the ban on `bucket` lifts; `None` if permanent or unknown.
    pub async fn retry_after(&self, bucket: &str) -> Option<u64> {
        self.storage.get_ban_ttl(bucket).await.unwrap_or_else(|e| {
            warn!(bucket = %bucket, error = %e, "Ban TTL lookup failed");
            None
        })
    }

    pub async fn attempts(&self, bucket: &str) -> u64 {
        self.storage.get_attempts(bucket).await.unwrap_or_else(|e| {
            warn!(bucket = %bucket, error = %e, "Attempt lookup failed");
            0
        })
    }

    pub async fn ban_info(&self, bucket: &str) -> Option<BanRecord> {
        self.storage.get_ban_info(bucket).await.unwrap_or_else(|e| {
            warn!(bucket = %bucket, error = %e, "Ban info lookup failed");
            None
        })
    }

    /// Lift any ban on `bucket` and forget its attempts.
    /// Returns `true` if a ban was removed.
    pub async fn clear(&self, bucket: &str) -> bool {
        let removed = self.storage.remove_ban(bucket).await.unwrap_or_else(|e| {
            warn!(bucket = %bucket, error = %e, "Failed to remove ban");
            false
        });
        if let Err(e) = self.storage.reset_attempts(bucket).await {
            warn!(bucket = %bucket, error = %e, "Failed to reset attempts");
        }
        removed
    }
}
