//! Behavior every storage backend must share.
//!
//! The same suite runs against the in-memory, JSON file and SQLite backends,
//! and against Redis when `GEOGUARD_TEST_REDIS_URL` points at a server.

use geoguard::storage::{BanInfo, FileStorage, SqliteStorage, Storage, StorageDsn, connect};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn key_value(storage: &dyn Storage) {
    assert_eq!(storage.get("missing").await.unwrap(), None);
    assert!(!storage.exists("missing").await.unwrap());

    storage.set("a", json!({"n": 1})).await.unwrap();
    storage.set("b", json!("two")).await.unwrap();
    assert_eq!(storage.get("a").await.unwrap(), Some(json!({"n": 1})));
    assert!(storage.exists("b").await.unwrap());
    assert_eq!(storage.count().await.unwrap(), 2);

    let all = storage.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["b"], json!("two"));

    storage.set("a", json!(3)).await.unwrap();
    assert_eq!(storage.get("a").await.unwrap(), Some(json!(3)));

    assert!(storage.delete("a").await.unwrap());
    assert!(!storage.delete("a").await.unwrap());
    assert_eq!(storage.count().await.unwrap(), 1);
}

async fn bans(storage: &dyn Storage) {
    let info = BanInfo::new("country:FR", "geoguard");

    assert!(!storage.is_banned("ip-1.1.1.1").await.unwrap());
    assert_eq!(storage.get_ban_ttl("ip-1.1.1.1").await.unwrap(), None);

    storage.ban_ip("ip-1.1.1.1", &info, Some(600)).await.unwrap();
    assert!(storage.is_banned("ip-1.1.1.1").await.unwrap());
    // Idempotent reads.
    assert!(storage.is_banned("ip-1.1.1.1").await.unwrap());

    let ttl = storage.get_ban_ttl("ip-1.1.1.1").await.unwrap().unwrap();
    assert!(ttl > 590 && ttl <= 600, "ttl was {ttl}");

    let record = storage.get_ban_info("ip-1.1.1.1").await.unwrap().unwrap();
    assert_eq!(record.reason, "country:FR");
    assert_eq!(record.source, "geoguard");
    assert_eq!(record.hits, 1);

    // Re-banning an active bucket accumulates hits and keeps created_at.
    storage.ban_ip("ip-1.1.1.1", &info, Some(600)).await.unwrap();
    let again = storage.get_ban_info("ip-1.1.1.1").await.unwrap().unwrap();
    assert_eq!(again.hits, 2);
    assert_eq!(again.created_at, record.created_at);

    storage.ban_ip("ip-2.2.2.2", &info, None).await.unwrap();
    assert!(storage.is_banned("ip-2.2.2.2").await.unwrap());
    assert_eq!(storage.get_ban_ttl("ip-2.2.2.2").await.unwrap(), None);
    assert!(storage.get_ban_info("ip-2.2.2.2").await.unwrap().unwrap().is_permanent());

    let mut banned: Vec<String> = storage
        .get_all_banned()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.bucket)
        .collect();
    banned.sort();
    assert_eq!(banned, vec!["ip-1.1.1.1", "ip-2.2.2.2"]);

    assert!(storage.remove_ban("ip-2.2.2.2").await.unwrap());
    assert!(!storage.remove_ban("ip-2.2.2.2").await.unwrap());
    assert!(!storage.is_banned("ip-2.2.2.2").await.unwrap());
}

async fn attempts(storage: &dyn Storage) {
    assert_eq!(storage.get_attempts("ip-3.3.3.3").await.unwrap(), 0);
    assert_eq!(storage.get_attempts_ttl("ip-3.3.3.3").await.unwrap(), None);

    for expected in 1..=3 {
        assert_eq!(storage.increment_attempts("ip-3.3.3.3", 3600).await.unwrap(), expected);
    }
    assert_eq!(storage.get_attempts("ip-3.3.3.3").await.unwrap(), 3);
    let ttl = storage.get_attempts_ttl("ip-3.3.3.3").await.unwrap().unwrap();
    assert!(ttl > 3590 && ttl <= 3600, "ttl was {ttl}");

    storage.reset_attempts("ip-3.3.3.3").await.unwrap();
    assert_eq!(storage.get_attempts("ip-3.3.3.3").await.unwrap(), 0);

    // ttl 0: a window that never expires.
    assert_eq!(storage.increment_attempts("ip-4.4.4.4", 0).await.unwrap(), 1);
    assert_eq!(storage.get_attempts_ttl("ip-4.4.4.4").await.unwrap(), None);
}

async fn expiry(storage: &dyn Storage) {
    let info = BanInfo::new("ip:default", "geoguard");
    storage.set_with_ttl("short", json!(1), 1).await.unwrap();
    storage.ban_ip("ip-5.5.5.5", &info, Some(1)).await.unwrap();
    assert_eq!(storage.increment_attempts("ip-6.6.6.6", 1).await.unwrap(), 1);
    assert_eq!(storage.increment_attempts("ip-6.6.6.6", 1).await.unwrap(), 2);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(storage.get("short").await.unwrap(), None);
    assert!(!storage.exists("short").await.unwrap());
    assert!(!storage.is_banned("ip-5.5.5.5").await.unwrap());
    assert_eq!(storage.get_ban_info("ip-5.5.5.5").await.unwrap(), None);
    assert_eq!(storage.get_attempts("ip-6.6.6.6").await.unwrap(), 0);

    // An expired window starts over.
    assert_eq!(storage.increment_attempts("ip-6.6.6.6", 60).await.unwrap(), 1);

    storage.clean_expired_bans().await.unwrap();
    assert!(
        storage
            .get_all_banned()
            .await
            .unwrap()
            .iter()
            .all(|b| b.bucket != "ip-5.5.5.5")
    );
}

async fn stats_and_clear(storage: &dyn Storage, expected_type: &str) {
    let stats = storage.get_stats().await.unwrap();
    assert_eq!(stats.storage_type, expected_type);
    assert_eq!(stats.active_bans, 1);
    assert_eq!(stats.permanent_bans, 0);
    assert_eq!(stats.active_attempts, 2);
    assert_eq!(stats.entries, 1);

    storage.clear().await.unwrap();
    assert_eq!(storage.count().await.unwrap(), 0);
    assert!(storage.get_all_banned().await.unwrap().is_empty());
    assert_eq!(storage.get_attempts("ip-6.6.6.6").await.unwrap(), 0);
    assert_eq!(storage.get_stats().await.unwrap().active_attempts, 0);
}

async fn conformance(storage: Arc<dyn Storage>, expected_type: &str) {
    storage.clear().await.unwrap();
    key_value(storage.as_ref()).await;
    bans(storage.as_ref()).await;
    attempts(storage.as_ref()).await;
    expiry(storage.as_ref()).await;
    stats_and_clear(storage.as_ref(), expected_type).await;
}

#[tokio::test]
async fn memory_backend_conforms() {
    conformance(Arc::new(FileStorage::memory()), "memory").await;
}

#[tokio::test]
async fn file_backend_conforms() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::open(dir.path().join("geoguard.json")).unwrap();
    conformance(Arc::new(storage), "file").await;
}

#[tokio::test]
async fn sqlite_backend_conforms() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    conformance(Arc::new(storage), "sqlite").await;
}

#[tokio::test]
async fn redis_backend_conforms() {
    let Ok(url) = std::env::var("GEOGUARD_TEST_REDIS_URL") else {
        eprintln!("GEOGUARD_TEST_REDIS_URL not set, skipping");
        return;
    };
    let storage = connect(&StorageDsn::parse(&url).unwrap()).await.unwrap();
    conformance(storage, "redis").await;
}

#[tokio::test]
async fn file_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bans.json");

    {
        let storage = FileStorage::open(&path).unwrap();
        storage
            .ban_ip("ip-7.7.7.7", &BanInfo::new("manual", "cli"), None)
            .await
            .unwrap();
        storage.increment_attempts("ip-8.8.8.8", 3600).await.unwrap();
        storage.set("k", json!([1, 2])).await.unwrap();
    }

    let reopened = FileStorage::open(&path).unwrap();
    assert!(reopened.is_banned("ip-7.7.7.7").await.unwrap());
    assert_eq!(reopened.get_attempts("ip-8.8.8.8").await.unwrap(), 1);
    assert_eq!(reopened.get("k").await.unwrap(), Some(json!([1, 2])));
}

#[tokio::test]
async fn sqlite_file_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("geoguard.db");
    let path = path.to_str().unwrap();

    {
        let storage = SqliteStorage::new(path).await.unwrap();
        storage
            .ban_ip("ip-7.7.7.7", &BanInfo::new("manual", "cli"), Some(600))
            .await
            .unwrap();
    }

    let reopened = SqliteStorage::new(path).await.unwrap();
    assert!(reopened.is_banned("ip-7.7.7.7").await.unwrap());
}
