//! In-process storage with optional JSON file persistence.
//!
//! All state lives behind one mutex. Every mutation rewrites the file while
//! the lock is held, using a temp file and an atomic rename so a crash never
//! leaves a truncated file behind. A mutation only becomes visible once its
//! file write succeeds. Expired records read as absent and are dropped by
//! `clean_expired_bans`.

use super::{
    AttemptRecord, BanInfo, BanRecord, Storage, StorageError, StorageStats, expiry_from, now,
    remaining,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvEntry {
    value: Value,
    expires_at: Option<i64>,
}

impl KvEntry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Serialized file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileState {
    #[serde(default)]
    entries: HashMap<String, KvEntry>,
    #[serde(default)]
    bans: HashMap<String, BanRecord>,
    #[serde(default)]
    attempts: HashMap<String, AttemptRecord>,
}

/// Map-backed storage (`file://`, `json://`, `memory://`).
pub struct FileStorage {
    state: Mutex<FileState>,
    path: Option<PathBuf>,
}

impl FileStorage {
    /// Storage that lives only as long as the process.
    pub fn memory() -> Self {
        Self {
            state: Mutex::new(FileState::default()),
            path: None,
        }
    }

    /// Open (or create on first write) the JSON file at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and replaced on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let state = if path.exists() {
            match load(&path) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load storage file, starting empty");
                    FileState::default()
                }
            }
        } else {
            FileState::default()
        };

        debug!(
            path = %path.display(),
            bans = state.bans.len(),
            attempts = state.attempts.len(),
            entries = state.entries.len(),
            "File storage opened"
        );

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    /// Run `f` under the lock and persist if it reports a change.
    ///
    /// With a backing file, `f` works on a copy that replaces the live state
    /// only after the write succeeds.
    fn mutate<T>(&self, f: impl FnOnce(&mut FileState, i64) -> (T, bool)) -> Result<T, StorageError> {
        let mut state = self.state.lock();
        let Some(ref path) = self.path else {
            return Ok(f(&mut *state, now()).0);
        };

        let mut next = state.clone();
        let (out, changed) = f(&mut next, now());
        if changed {
            save(&next, path)?;
            *state = next;
        }
        Ok(out)
    }
}

fn load(path: &Path) -> Result<FileState, StorageError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn save(state: &FileState, path: &Path) -> Result<(), StorageError> {
    let temp_path = path.with_extension("json.tmp");
    let mut writer = BufWriter::new(File::create(&temp_path)?);
    serde_json::to_writer(&mut writer, state)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, path)?;
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    fn storage_type(&self) -> &'static str {
        if self.path.is_some() { "file" } else { "memory" }
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let now = now();
        Ok(self
            .state
            .lock()
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.set_with_ttl(key, value, 0).await
    }

    async fn set_with_ttl(&self, key: &str, value: Value, ttl: u64) -> Result<(), StorageError> {
        self.mutate(|s, now| {
            let expires_at = expiry_from(now, ttl);
            s.entries.insert(key.to_string(), KvEntry { value, expires_at });
            ((), true)
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.mutate(|s, now| match s.entries.remove(key) {
            Some(e) => (e.is_live(now), true),
            None => (false, false),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.mutate(|s, _| {
            *s = FileState::default();
            ((), true)
        })
    }

    async fn get_all(&self) -> Result<HashMap<String, Value>, StorageError> {
        let now = now();
        let state = self.state.lock();
        Ok(state
            .entries
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let now = now();
        Ok(self.state.lock().entries.values().filter(|e| e.is_live(now)).count())
    }

    async fn is_banned(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(self.get_ban_info(bucket).await?.is_some())
    }

    async fn get_ban_info(&self, bucket: &str) -> Result<Option<BanRecord>, StorageError> {
        let now = now();
        Ok(self
            .state
            .lock()
            .bans
            .get(bucket)
            .filter(|b| b.is_active(now))
            .cloned())
    }

    async fn ban_ip(&self, bucket: &str, info: &BanInfo, ttl: Option<u64>) -> Result<(), StorageError> {
        self.mutate(|s, now| {
            let record = BanRecord::new(bucket, info, now, ttl).renew(s.bans.get(bucket), now);
            s.bans.insert(bucket.to_string(), record);
            ((), true)
        })
    }

    async fn remove_ban(&self, bucket: &str) -> Result<bool, StorageError> {
        self.mutate(|s, _| {
            let removed = s.bans.remove(bucket).is_some();
            (removed, removed)
        })
    }

    async fn get_all_banned(&self) -> Result<Vec<BanRecord>, StorageError> {
        let now = now();
        let state = self.state.lock();
        let mut bans: Vec<BanRecord> = state
            .bans
            .values()
            .filter(|b| b.is_active(now))
            .cloned()
            .collect();
        bans.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(bans)
    }

    async fn clean_expired_bans(&self) -> Result<usize, StorageError> {
        self.mutate(|s, now| {
            let before = s.bans.len();
            s.bans.retain(|_, b| b.is_active(now));
            s.attempts.retain(|_, a| a.is_live(now));
            s.entries.retain(|_, e| e.is_live(now));
            let removed = before - s.bans.len();
            (removed, removed > 0)
        })
    }

    async fn get_ban_ttl(&self, bucket: &str) -> Result<Option<u64>, StorageError> {
        let info = self.get_ban_info(bucket).await?;
        Ok(info.and_then(|b| remaining(now(), b.expires_at)))
    }

    async fn increment_attempts(&self, bucket: &str, ttl: u64) -> Result<u64, StorageError> {
        self.mutate(|s, now| {
            let record = AttemptRecord::bump(s.attempts.get(bucket), now, ttl);
            let count = record.count;
            s.attempts.insert(bucket.to_string(), record);
            (count, true)
        })
    }

    async fn get_attempts(&self, bucket: &str) -> Result<u64, StorageError> {
        let now = now();
        Ok(self
            .state
            .lock()
            .attempts
            .get(bucket)
            .filter(|a| a.is_live(now))
            .map_or(0, |a| a.count))
    }

    async fn reset_attempts(&self, bucket: &str) -> Result<(), StorageError> {
        self.mutate(|s, _| {
            let removed = s.attempts.remove(bucket).is_some();
            ((), removed)
        })
    }

    async fn get_attempts_ttl(&self, bucket: &str) -> Result<Option<u64>, StorageError> {
        let now = now();
        let state = self.state.lock();
        Ok(state
            .attempts
            .get(bucket)
            .and_then(|a| remaining(now, a.expires_at)))
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let now = now();
        let state = self.state.lock();
        let active: Vec<&BanRecord> = state.bans.values().filter(|b| b.is_active(now)).collect();
        Ok(StorageStats {
            storage_type: self.storage_type().to_string(),
            active_bans: active.len(),
            permanent_bans: active.iter().filter(|b| b.is_permanent()).count(),
            active_attempts: state.attempts.values().filter(|a| a.is_live(now)).count(),
            entries: state.entries.values().filter(|e| e.is_live(now)).count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("geoguard.json");

        {
            let storage = FileStorage::open(&path).unwrap();
            storage.set("greeting", json!({"hello": "world"})).await.unwrap();
            storage
                .ban_ip("ip-1.2.3.4", &BanInfo::new("country:FR", "test"), Some(3600))
                .await
                .unwrap();
            storage.increment_attempts("ip-5.6.7.8", 600).await.unwrap();
            assert_eq!(storage.storage_type(), "file");
        }

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("greeting").await.unwrap(), Some(json!({"hello": "world"})));
        assert!(reopened.is_banned("ip-1.2.3.4").await.unwrap());
        assert_eq!(reopened.get_attempts("ip-5.6.7.8").await.unwrap(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geoguard.json");
        fs::write(&path, b"{not json").unwrap();

        let storage = FileStorage::open(&path).unwrap();
        assert_eq!(storage.count().await.unwrap(), 0);
        storage.set("k", json!(1)).await.unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geoguard.json");
        let storage = FileStorage::open(&path).unwrap();
        storage.increment_attempts("ip-1.1.1.1", 600).await.unwrap();

        // A directory where the temp file goes makes every save fail.
        fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let info = BanInfo::new("country:FR", "test");
        assert!(storage.ban_ip("ip-1.2.3.4", &info, Some(600)).await.is_err());
        assert!(!storage.is_banned("ip-1.2.3.4").await.unwrap());
        assert!(storage.increment_attempts("ip-1.1.1.1", 600).await.is_err());
        assert_eq!(storage.get_attempts("ip-1.1.1.1").await.unwrap(), 1);
        assert!(storage.set("k", json!(1)).await.is_err());
        assert_eq!(storage.count().await.unwrap(), 0);

        // Once writes work again, the rejected changes do not resurface.
        fs::remove_dir(path.with_extension("json.tmp")).unwrap();
        storage.set("k", json!(2)).await.unwrap();
        let reopened = FileStorage::open(&path).unwrap();
        assert!(!reopened.is_banned("ip-1.2.3.4").await.unwrap());
        assert_eq!(reopened.get_attempts("ip-1.1.1.1").await.unwrap(), 1);
        assert_eq!(reopened.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_memory_has_no_file() {
        let storage = FileStorage::memory();
        assert_eq!(storage.storage_type(), "memory");
        storage.set("k", json!("v")).await.unwrap();
        assert_eq!(storage.get_stats().await.unwrap().entries, 1);
    }
}
