//! Ban, attempt and key-value storage.
//!
//! Three backends share one [`Storage`] trait and the same TTL semantics:
//!
//! - [`FileStorage`]: in-process maps, optionally persisted to a JSON file
//! - [`SqliteStorage`]: SQLite via sqlx with embedded migrations
//! - [`RedisStorage`]: Redis with native key expiry
//!
//! Expiry rules shared by every backend:
//! - a `None` TTL is permanent, `Some(n)` with `n > 0` expires at `now + n`
//! - an expired record reads as absent
//! - incrementing an expired attempt window starts a fresh window, otherwise
//!   the original expiry is kept
//! - TTL queries return `None` for missing or permanent records

mod file;
mod redis;
mod sql;

pub use self::file::FileStorage;
pub use self::redis::RedisStorage;
pub use self::sql::SqliteStorage;

use crate::config::ConfigError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Stable label for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Sqlx(_) => "sqlx",
            Self::Migration(_) => "migration",
            Self::Redis(_) => "redis",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Current unix time in seconds.
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `now + ttl`, or `None` for a zero TTL.
pub(crate) fn expiry_from(now: i64, ttl: u64) -> Option<i64> {
    (ttl > 0).then(|| now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)))
}

/// Seconds left until `expires_at`, `None` when permanent or already past.
pub(crate) fn remaining(now: i64, expires_at: Option<i64>) -> Option<u64> {
    expires_at
        .map(|at| at - now)
        .filter(|left| *left > 0)
        .map(|left| left as u64)
}

/// Metadata attached to a ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanInfo {
    pub reason: String,
    /// Who issued the ban (`geoguard`, `cli`, ...).
    pub source: String,
}

impl BanInfo {
    pub fn new(reason: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            source: source.into(),
        }
    }
}

/// A stored ban.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub bucket: String,
    pub reason: String,
    pub source: String,
    /// Times the bucket was banned while a ban was active.
    pub hits: u32,
    pub created_at: i64,
    /// `None` for a permanent ban.
    pub expires_at: Option<i64>,
}

impl BanRecord {
    pub(crate) fn new(bucket: &str, info: &BanInfo, now: i64, ttl: Option<u64>) -> Self {
        Self {
            bucket: bucket.to_string(),
            reason: info.reason.clone(),
            source: info.source.clone(),
            hits: 1,
            created_at: now,
            expires_at: ttl.and_then(|t| expiry_from(now, t)),
        }
    }

    /// Ban over `previous`: hits accumulate while the previous ban is active.
    pub(crate) fn renew(mut self, previous: Option<&BanRecord>, now: i64) -> Self {
        if let Some(prev) = previous.filter(|p| p.is_active(now)) {
            self.hits = prev.hits.saturating_add(1);
            self.created_at = prev.created_at;
        }
        self
    }

    pub fn is_active(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }
}

/// A counted attempt window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub count: u64,
    pub first_attempt: i64,
    pub last_attempt: i64,
    pub expires_at: Option<i64>,
}

impl AttemptRecord {
    pub fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    /// Count one attempt, starting a fresh window if this one expired.
    pub(crate) fn bump(existing: Option<&AttemptRecord>, now: i64, ttl: u64) -> Self {
        match existing.filter(|r| r.is_live(now)) {
            Some(r) => Self {
                count: r.count.saturating_add(1),
                first_attempt: r.first_attempt,
                last_attempt: now,
                expires_at: r.expires_at,
            },
            None => Self {
                count: 1,
                first_attempt: now,
                last_attempt: now,
                expires_at: expiry_from(now, ttl),
            },
        }
    }
}

/// Backend statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub storage_type: String,
    pub active_bans: usize,
    pub permanent_bans: usize,
    pub active_attempts: usize,
    /// Live entries in the generic key-value namespace.
    pub entries: usize,
}

/// Ban, attempt and key-value storage.
///
/// Every method returns a [`StorageError`] instead of panicking; callers pick
/// the policy (the guard logs and falls back to "not banned" / zero attempts).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name reported in stats.
    fn storage_type(&self) -> &'static str;

    // Generic key-value namespace.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    /// Store with a TTL in seconds; `0` never expires.
    async fn set_with_ttl(&self, key: &str, value: Value, ttl: u64) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
    /// Wipe keys, bans and attempts.
    async fn clear(&self) -> Result<(), StorageError>;
    async fn get_all(&self) -> Result<HashMap<String, Value>, StorageError>;
    async fn count(&self) -> Result<usize, StorageError>;

    // Bans.
    async fn is_banned(&self, bucket: &str) -> Result<bool, StorageError>;
    async fn get_ban_info(&self, bucket: &str) -> Result<Option<BanRecord>, StorageError>;
    /// Ban `bucket` for `ttl` seconds, or permanently for `None`/`Some(0)`.
    async fn ban_ip(&self, bucket: &str, info: &BanInfo, ttl: Option<u64>) -> Result<(), StorageError>;
    async fn remove_ban(&self, bucket: &str) -> Result<bool, StorageError>;
    async fn get_all_banned(&self) -> Result<Vec<BanRecord>, StorageError>;
    /// Delete expired bans, returning how many were removed.
    async fn clean_expired_bans(&self) -> Result<usize, StorageError>;
    async fn get_ban_ttl(&self, bucket: &str) -> Result<Option<u64>, StorageError>;

    // Attempts.
    /// Count one attempt and return the new total. The window expires `ttl`
    /// seconds after its first attempt; `0` never expires.
    async fn increment_attempts(&self, bucket: &str, ttl: u64) -> Result<u64, StorageError>;
    async fn get_attempts(&self, bucket: &str) -> Result<u64, StorageError>;
    async fn reset_attempts(&self, bucket: &str) -> Result<(), StorageError>;
    async fn get_attempts_ttl(&self, bucket: &str) -> Result<Option<u64>, StorageError>;

    async fn get_stats(&self) -> Result<StorageStats, StorageError>;
}

/// A parsed storage DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageDsn {
    /// In-process maps without persistence.
    Memory,
    /// In-process maps persisted to a JSON file.
    File(PathBuf),
    /// SQLite database file, or `:memory:`.
    Sqlite(String),
    Redis(String),
}

impl StorageDsn {
    /// Parse a DSN such as `file:///var/lib/geoguard/bans.json`,
    /// `sqlite://data/geoguard.db`, `sqlite::memory:` or `redis://127.0.0.1/0`.
    pub fn parse(dsn: &str) -> Result<Self, ConfigError> {
        let dsn = dsn.trim();
        if dsn == "memory://" || dsn == "memory" {
            return Ok(Self::Memory);
        }
        if dsn == "sqlite::memory:" || dsn == "sqlite://:memory:" {
            return Ok(Self::Sqlite(":memory:".to_string()));
        }

        let (scheme, rest) = dsn
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidStorageDsn(dsn.to_string()))?;
        let scheme = scheme.to_ascii_lowercase();

        let require_path = |rest: &str| {
            if rest.is_empty() {
                Err(ConfigError::InvalidStorageDsn(dsn.to_string()))
            } else {
                Ok(rest.to_string())
            }
        };

        match scheme.as_str() {
            "memory" => Ok(Self::Memory),
            "file" | "json" => Ok(Self::File(PathBuf::from(require_path(rest)?))),
            "sqlite" | "doctrine" => Ok(Self::Sqlite(require_path(rest)?)),
            "redis" | "rediss" => Ok(Self::Redis(dsn.to_string())),
            "mysql" | "mariadb" | "postgres" | "postgresql" | "pgsql" => {
                Err(ConfigError::UnsupportedDriver(scheme))
            }
            _ => Err(ConfigError::UnsupportedScheme(scheme)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File(_) => "file",
            Self::Sqlite(_) => "sqlite",
            Self::Redis(_) => "redis",
        }
    }
}

/// Open the backend a DSN names.
pub async fn connect(dsn: &StorageDsn) -> Result<Arc<dyn Storage>, StorageError> {
    let storage: Arc<dyn Storage> = match dsn {
        StorageDsn::Memory => Arc::new(FileStorage::memory()),
        StorageDsn::File(path) => Arc::new(FileStorage::open(path)?),
        StorageDsn::Sqlite(path) => Arc::new(SqliteStorage::new(path).await?),
        StorageDsn::Redis(url) => Arc::new(RedisStorage::connect(url).await?),
    };
    tracing::info!(backend = dsn.kind(), "Storage backend ready");
    Ok(storage)
}
