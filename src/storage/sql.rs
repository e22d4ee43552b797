//! SQLite storage backend.
//!
//! Upserts are single statements, so concurrent increments of the same bucket
//! never lose updates. Expired rows are filtered on read and deleted lazily.

use super::{
    AttemptRecord, BanInfo, BanRecord, Storage, StorageError, StorageStats, expiry_from, now,
    remaining,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

type BanRow = (String, String, String, i64, i64, Option<i64>);

fn ban_from_row((bucket, reason, source, hits, created_at, expires_at): BanRow) -> BanRecord {
    BanRecord {
        bucket,
        reason,
        source,
        hits: u32::try_from(hits).unwrap_or(u32::MAX),
        created_at,
        expires_at,
    }
}

/// Relational backend (`sqlite://`, `sqlite::memory:`, `doctrine://`).
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open the database at `path` (or `:memory:`) and apply migrations.
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let pool = if path == ":memory:" {
            // One uniquely named shared-cache database per call; a plain
            // `:memory:` would give every pooled connection its own database.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:geoguard-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5));

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path = %path, "SQLite storage ready");

        Ok(Self { pool })
    }

    async fn purge_expired_attempt(&self, bucket: &str, now: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM geo_attempts WHERE bucket = ? AND expires_at IS NOT NULL AND expires_at <= ?")
            .bind(bucket)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn live_attempt(&self, bucket: &str) -> Result<Option<AttemptRecord>, StorageError> {
        let now = now();
        let row = sqlx::query_as::<_, (i64, i64, i64, Option<i64>)>(
            "SELECT count, first_attempt, last_attempt, expires_at FROM geo_attempts WHERE bucket = ?",
        )
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await?;

        let Some((count, first_attempt, last_attempt, expires_at)) = row else {
            return Ok(None);
        };
        let record = AttemptRecord {
            count: u64::try_from(count).unwrap_or(0),
            first_attempt,
            last_attempt,
            expires_at,
        };
        if record.is_live(now) {
            Ok(Some(record))
        } else {
            self.purge_expired_attempt(bucket, now).await?;
            Ok(None)
        }
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn storage_type(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let now = now();
        let row = sqlx::query_as::<_, (String, Option<i64>)>(
            "SELECT value, expires_at FROM geo_kv WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value, expires_at)) if expires_at.is_none_or(|at| at > now) => {
                Ok(Some(serde_json::from_str(&value)?))
            }
            Some(_) => {
                sqlx::query("DELETE FROM geo_kv WHERE key = ? AND expires_at <= ?")
                    .bind(key)
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.set_with_ttl(key, value, 0).await
    }

    async fn set_with_ttl(&self, key: &str, value: Value, ttl: u64) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(&value)?;
        sqlx::query("INSERT OR REPLACE INTO geo_kv (key, value, expires_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(encoded)
            .bind(expiry_from(now(), ttl))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM geo_kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)")
            .bind(key)
            .bind(now())
            .execute(&self.pool)
            .await?;
        // Drop an expired leftover too, without reporting it as deleted.
        sqlx::query("DELETE FROM geo_kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM geo_kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM geo_kv").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM geo_bans").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM geo_attempts").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>, StorageError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM geo_kv WHERE expires_at IS NULL OR expires_at > ?",
        )
        .bind(now())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(k, v)| -> Result<(String, Value), StorageError> {
                Ok((k, serde_json::from_str(&v)?))
            })
            .collect()
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM geo_kv WHERE expires_at IS NULL OR expires_at > ?",
        )
        .bind(now())
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn is_banned(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(self.get_ban_info(bucket).await?.is_some())
    }

    async fn get_ban_info(&self, bucket: &str) -> Result<Option<BanRecord>, StorageError> {
        let now = now();
        let row = sqlx::query_as::<_, BanRow>(
            "SELECT bucket, reason, source, hits, created_at, expires_at FROM geo_bans WHERE bucket = ?",
        )
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await?;

        match row.map(ban_from_row) {
            Some(ban) if ban.is_active(now) => Ok(Some(ban)),
            Some(_) => {
                sqlx::query("DELETE FROM geo_bans WHERE bucket = ? AND expires_at <= ?")
                    .bind(bucket)
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn ban_ip(&self, bucket: &str, info: &BanInfo, ttl: Option<u64>) -> Result<(), StorageError> {
        let now = now();
        let expires_at = ttl.and_then(|t| expiry_from(now, t));

        sqlx::query(
            r#"
            INSERT INTO geo_bans (bucket, reason, source, hits, created_at, expires_at)
            VALUES (?1, ?2, ?3, 1, ?4, ?5)
            ON CONFLICT(bucket) DO UPDATE SET
                reason = excluded.reason,
                source = excluded.source,
                hits = CASE WHEN geo_bans.expires_at IS NULL OR geo_bans.expires_at > ?4
                            THEN geo_bans.hits + 1 ELSE 1 END,
                created_at = CASE WHEN geo_bans.expires_at IS NULL OR geo_bans.expires_at > ?4
                                  THEN geo_bans.created_at ELSE excluded.created_at END,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(bucket)
        .bind(&info.reason)
        .bind(&info.source)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_ban(&self, bucket: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM geo_bans WHERE bucket = ?")
            .bind(bucket)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_all_banned(&self) -> Result<Vec<BanRecord>, StorageError> {
        let rows = sqlx::query_as::<_, BanRow>(
            r#"
            SELECT bucket, reason, source, hits, created_at, expires_at
            FROM geo_bans
            WHERE expires_at IS NULL OR expires_at > ?
            ORDER BY bucket
            "#,
        )
        .bind(now())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ban_from_row).collect())
    }

    async fn clean_expired_bans(&self) -> Result<usize, StorageError> {
        let now = now();
        let result = sqlx::query("DELETE FROM geo_bans WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM geo_attempts WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM geo_kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn get_ban_ttl(&self, bucket: &str) -> Result<Option<u64>, StorageError> {
        let info = self.get_ban_info(bucket).await?;
        Ok(info.and_then(|b| remaining(now(), b.expires_at)))
    }

    async fn increment_attempts(&self, bucket: &str, ttl: u64) -> Result<u64, StorageError> {
        let now = now();
        let expires_at = expiry_from(now, ttl);

        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO geo_attempts (bucket, count, first_attempt, last_attempt, expires_at)
            VALUES (?1, 1, ?2, ?2, ?3)
            ON CONFLICT(bucket) DO UPDATE SET
                count = CASE WHEN geo_attempts.expires_at IS NOT NULL AND geo_attempts.expires_at <= ?2
                             THEN 1 ELSE geo_attempts.count + 1 END,
                first_attempt = CASE WHEN geo_attempts.expires_at IS NOT NULL AND geo_attempts.expires_at <= ?2
                                     THEN ?2 ELSE geo_attempts.first_attempt END,
                expires_at = CASE WHEN geo_attempts.expires_at IS NOT NULL AND geo_attempts.expires_at <= ?2
                                  THEN ?3 ELSE geo_attempts.expires_at END,
                last_attempt = ?2
            RETURNING count
            "#,
        )
        .bind(bucket)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn get_attempts(&self, bucket: &str) -> Result<u64, StorageError> {
        Ok(self.live_attempt(bucket).await?.map_or(0, |a| a.count))
    }

    async fn reset_attempts(&self, bucket: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM geo_attempts WHERE bucket = ?")
            .bind(bucket)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_attempts_ttl(&self, bucket: &str) -> Result<Option<u64>, StorageError> {
        let attempt = self.live_attempt(bucket).await?;
        Ok(attempt.and_then(|a| remaining(now(), a.expires_at)))
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let now = now();
        let (active_bans, permanent_bans): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN expires_at IS NULL THEN 1 ELSE 0 END), 0)
            FROM geo_bans
            WHERE expires_at IS NULL OR expires_at > ?
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let active_attempts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM geo_attempts WHERE expires_at IS NULL OR expires_at > ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(StorageStats {
            storage_type: self.storage_type().to_string(),
            active_bans: usize::try_from(active_bans).unwrap_or(0),
            permanent_bans: usize::try_from(permanent_bans).unwrap_or(0),
            active_attempts: usize::try_from(active_attempts).unwrap_or(0),
            entries: self.count().await?,
        })
    }
}
