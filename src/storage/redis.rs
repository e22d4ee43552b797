//! Redis storage backend.
//!
//! Keys are namespaced under `geoguard:` (`kv:`, `ban:`, `attempts:`).
//! Expiry is delegated to Redis itself; attempt counters use a small Lua
//! script so `INCR` and the first `EXPIRE` happen atomically.

use super::{BanInfo, BanRecord, Storage, StorageError, StorageStats, now};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

const PREFIX: &str = "geoguard:";
const KV: &str = "geoguard:kv:";
const BAN: &str = "geoguard:ban:";
const ATTEMPTS: &str = "geoguard:attempts:";

/// Increment and set the window expiry on the first attempt only.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = tonumber(ARGV[1])
if count == 1 and ttl > 0 then
    redis.call('EXPIRE', KEYS[1], ttl)
end
return count
"#;

/// Key-value backend (`redis://`, `rediss://`).
#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
    increment: Script,
}

impl RedisStorage {
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis storage connected");
        Ok(Self {
            conn,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    /// Remaining TTL for `key`; `None` when missing (-2) or permanent (-1).
    async fn key_ttl(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let mut conn = self.conn();
        let ttl: i64 = conn.ttl(key).await?;
        Ok((ttl > 0).then_some(ttl as u64))
    }

    async fn read_ban(&self, key: &str) -> Result<Option<BanRecord>, StorageError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, payload: String, ttl: Option<u64>) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(payload);
        if let Some(ttl) = ttl.filter(|t| *t > 0) {
            cmd.arg("EX").arg(ttl);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for RedisStorage {
    fn storage_type(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(format!("{KV}{key}")).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.set_with_ttl(key, value, 0).await
    }

    async fn set_with_ttl(&self, key: &str, value: Value, ttl: u64) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&value)?;
        self.write(&format!("{KV}{key}"), payload, Some(ttl)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn();
        let removed: u64 = conn.del(format!("{KV}{key}")).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn();
        let found: bool = conn.exists(format!("{KV}{key}")).await?;
        Ok(found)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let keys = self.scan_keys(&format!("{PREFIX}*")).await?;
        let mut conn = self.conn();
        for chunk in keys.chunks(500) {
            let _: u64 = conn.del(chunk.to_vec()).await?;
        }
        debug!(keys = keys.len(), "Redis storage cleared");
        Ok(())
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>, StorageError> {
        let keys = self.scan_keys(&format!("{KV}*")).await?;
        let mut out = HashMap::with_capacity(keys.len());
        let mut conn = self.conn();
        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            // A key may expire between SCAN and GET.
            if let Some(raw) = raw {
                let name = key.strip_prefix(KV).unwrap_or(&key).to_string();
                out.insert(name, serde_json::from_str(&raw)?);
            }
        }
        Ok(out)
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.scan_keys(&format!("{KV}*")).await?.len())
    }

    async fn is_banned(&self, bucket: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn();
        let found: bool = conn.exists(format!("{BAN}{bucket}")).await?;
        Ok(found)
    }

    async fn get_ban_info(&self, bucket: &str) -> Result<Option<BanRecord>, StorageError> {
        self.read_ban(&format!("{BAN}{bucket}")).await
    }

    async fn ban_ip(&self, bucket: &str, info: &BanInfo, ttl: Option<u64>) -> Result<(), StorageError> {
        let key = format!("{BAN}{bucket}");
        let now = now();
        let previous = self.read_ban(&key).await?;
        let record = BanRecord::new(bucket, info, now, ttl).renew(previous.as_ref(), now);
        let payload = serde_json::to_string(&record)?;
        self.write(&key, payload, ttl).await
    }

    async fn remove_ban(&self, bucket: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn();
        let removed: u64 = conn.del(format!("{BAN}{bucket}")).await?;
        Ok(removed > 0)
    }

    async fn get_all_banned(&self) -> Result<Vec<BanRecord>, StorageError> {
        let keys = self.scan_keys(&format!("{BAN}*")).await?;
        let now = now();
        let mut bans = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(ban) = self.read_ban(&key).await?
                && ban.is_active(now)
            {
                bans.push(ban);
            }
        }
        bans.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(bans)
    }

    /// Redis expires keys itself; this only removes records whose stored
    /// expiry has passed while the key lingers (clock skew between hosts).
    async fn clean_expired_bans(&self) -> Result<usize, StorageError> {
        let keys = self.scan_keys(&format!("{BAN}*")).await?;
        let now = now();
        let mut conn = self.conn();
        let mut removed = 0;
        for key in keys {
            if let Some(ban) = self.read_ban(&key).await?
                && !ban.is_active(now)
            {
                let n: u64 = conn.del(&key).await?;
                removed += n as usize;
            }
        }
        Ok(removed)
    }

    async fn get_ban_ttl(&self, bucket: &str) -> Result<Option<u64>, StorageError> {
        self.key_ttl(&format!("{BAN}{bucket}")).await
    }

    async fn increment_attempts(&self, bucket: &str, ttl: u64) -> Result<u64, StorageError> {
        let mut conn = self.conn();
        let count: u64 = self
            .increment
            .key(format!("{ATTEMPTS}{bucket}"))
            .arg(ttl)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get_attempts(&self, bucket: &str) -> Result<u64, StorageError> {
        let mut conn = self.conn();
        let count: Option<u64> = conn.get(format!("{ATTEMPTS}{bucket}")).await?;
        Ok(count.unwrap_or(0))
    }

    async fn reset_attempts(&self, bucket: &str) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let _: u64 = conn.del(format!("{ATTEMPTS}{bucket}")).await?;
        Ok(())
    }

    async fn get_attempts_ttl(&self, bucket: &str) -> Result<Option<u64>, StorageError> {
        self.key_ttl(&format!("{ATTEMPTS}{bucket}")).await
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut conn = self.conn();
        let ban_keys = self.scan_keys(&format!("{BAN}*")).await?;
        let mut permanent_bans = 0;
        for key in &ban_keys {
            let ttl: i64 = conn.ttl(key).await?;
            if ttl == -1 {
                permanent_bans += 1;
            }
        }

        Ok(StorageStats {
            storage_type: self.storage_type().to_string(),
            active_bans: ban_keys.len(),
            permanent_bans,
            active_attempts: self.scan_keys(&format!("{ATTEMPTS}*")).await?.len(),
            entries: self.count().await?,
        })
    }
}
