//! Resolved-context cache.

use crate::context::GeoContext;
use crate::storage::Storage;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where resolved contexts are kept between requests.
///
/// Failures are absorbed: a broken cache behaves like an empty one.
#[async_trait]
pub trait ContextCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<GeoContext>;
    /// Store `context` for `ttl` seconds. A TTL of `0` skips caching.
    async fn set(&self, key: &str, context: &GeoContext, ttl: u64);
}

#[derive(Debug, Clone)]
struct CachedContext {
    context: GeoContext,
    expires_at: Instant,
}

/// Process-local cache with lazy expiry, pruned once it grows past
/// `max_entries`.
#[derive(Debug)]
pub struct MemoryContextCache {
    entries: DashMap<String, CachedContext>,
    max_entries: usize,
}

impl MemoryContextCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&self) {
        let now = Instant::now();
        self.entries.retain(|_, v| v.expires_at > now);

        // Still full of live entries: drop the ones closest to expiry.
        let excess = self.entries.len().saturating_sub(self.max_entries);
        if excess > 0 {
            let mut by_expiry: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, at)| *at);
            for (key, _) in by_expiry.into_iter().take(excess) {
                self.entries.remove(&key);
            }
        }
        debug!(size = self.entries.len(), "Context cache pruned");
    }
}

#[async_trait]
impl ContextCache for MemoryContextCache {
    async fn get(&self, key: &str) -> Option<GeoContext> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.context.clone());
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    async fn set(&self, key: &str, context: &GeoContext, ttl: u64) {
        if ttl == 0 {
            return;
        }
        self.entries.insert(
            key.to_string(),
            CachedContext {
                context: context.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl),
            },
        );
        if self.entries.len() > self.max_entries {
            self.prune();
        }
    }
}

/// Cache backed by the storage key-value namespace, shared across processes
/// when the backend is.
pub struct StorageContextCache {
    storage: Arc<dyn Storage>,
}

impl StorageContextCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ContextCache for StorageContextCache {
    async fn get(&self, key: &str) -> Option<GeoContext> {
        match self.storage.get(key).await {
            Ok(Some(value)) => {
                let context = GeoContext::hydrate(&value);
                if context.is_none() {
                    warn!(key = %key, "Discarding unreadable cached context");
                }
                context
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Context cache read failed");
                crate::metrics::record_storage_error("cache_get", e.error_code());
                None
            }
        }
    }

    async fn set(&self, key: &str, context: &GeoContext, ttl: u64) {
        if ttl == 0 {
            return;
        }
        let value = match serde_json::to_value(context) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %key, error = %e, "Context not serializable");
                return;
            }
        };
        if let Err(e) = self.storage.set_with_ttl(key, value, ttl).await {
            warn!(key = %key, error = %e, "Context cache write failed");
            crate::metrics::record_storage_error("cache_set", e.error_code());
        }
    }
}
