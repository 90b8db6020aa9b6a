use crate::{CacheResult, Cacher, DEFAULT_DELIMITER, scoped_key};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Process-local cache with optional TTL expiry.
///
/// Suitable for single-instance deployments and tests. Multiple processes
/// each see their own copy, so a change signal written here is not visible to
/// other instances.
///
/// ```
/// use gatehouse_cache::{Cacher, MemoryCache};
///
/// let cache = MemoryCache::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     cache.set("role", "k", "v", None).await.expect("set");
///     assert_eq!(cache.get("role", "k").await.expect("get"), Some("v".to_string()));
///     assert_eq!(cache.get("user", "k").await.expect("get"), None);
/// });
/// ```
#[derive(Debug)]
pub struct MemoryCache {
    // RwLock allows concurrent readers while updates take exclusive access.
    inner: RwLock<HashMap<String, CacheEntry>>,
    delimiter: String,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    fn key(&self, ns: &str, key: &str) -> String {
        scoped_key(&self.delimiter, ns, key)
    }
}

#[async_trait]
impl Cacher for MemoryCache {
    async fn set(
        &self,
        ns: &str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let now = Instant::now();
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| now + ttl),
        };
        let mut guard = self.inner.write().await;
        // Expired entries are swept here as well as on read, so keys that are
        // never read again do not pile up.
        guard.retain(|_, entry| !entry.is_expired(now));
        guard.insert(self.key(ns, key), entry);
        Ok(())
    }

    async fn get(&self, ns: &str, key: &str) -> CacheResult<Option<String>> {
        let scoped = self.key(ns, key);
        {
            let guard = self.inner.read().await;
            match guard.get(&scoped) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }
        // Lazy-expire on read to avoid a background sweeper.
        let mut guard = self.inner.write().await;
        if guard
            .get(&scoped)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            guard.remove(&scoped);
        }
        Ok(None)
    }

    async fn delete(&self, ns: &str, key: &str) -> CacheResult<()> {
        self.inner.write().await.remove(&self.key(ns, key));
        Ok(())
    }

    async fn get_and_delete(&self, ns: &str, key: &str) -> CacheResult<Option<String>> {
        let entry = self.inner.write().await.remove(&self.key(ns, key));
        Ok(entry
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value))
    }

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
