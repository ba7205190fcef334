//! Cache-aside client over a remote key-value store.
//!
//! Values are JSON-encoded by the caller's type; the client itself never
//! inspects them. Every remote round trip is bounded by a timeout, and a
//! timed-out call is abandoned rather than awaited.

pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, warn};

use self::store::KvStore;

/// Bound on a single get/set/delete round trip.
pub const OP_TIMEOUT: Duration = Duration::from_secs(3);
/// Bound on a whole `get_all` bulk scan.
pub const BULK_TIMEOUT: Duration = Duration::from_secs(10);

const SCAN_COUNT: usize = 100;
const BULK_WORKERS: usize = 10;
const KEY_QUEUE_CAPACITY: usize = 1000;
const WILDCARD_GLYPHS: &[char] = &['*', '?', '[', '\\'];

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("key not found")]
    NotFound,

    #[error("failed to decode cached value: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("cache operation timed out")]
    Timeout,

    #[error("redis error: {0}")]
    Backend(#[from] redis::RedisError),
}

/// A bulk scan that stopped early. `entries` holds everything decoded before
/// the failure.
pub struct PartialScan<T> {
    pub error: CacheError,
    pub entries: HashMap<String, T>,
}

impl<T> fmt::Debug for PartialScan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialScan")
            .field("error", &self.error)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<T> fmt::Display for PartialScan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} entries collected)", self.error, self.entries.len())
    }
}

impl<T> std::error::Error for PartialScan<T> {}

#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KvStore>,
    op_timeout: Duration,
    bulk_timeout: Duration,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("op_timeout", &self.op_timeout)
            .field("bulk_timeout", &self.bulk_timeout)
            .finish_non_exhaustive()
    }
}

impl Cache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            op_timeout: OP_TIMEOUT,
            bulk_timeout: BULK_TIMEOUT,
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn with_timeouts(mut self, op_timeout: Duration, bulk_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self.bulk_timeout = bulk_timeout;
        self
    }

    /// Fetches and decodes `key`. Absent or expired keys yield `NotFound`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let raw = timeout(self.op_timeout, self.store.get(key))
            .await
            .map_err(|_| CacheError::Timeout)??
            .ok_or(CacheError::NotFound)?;

        serde_json::from_slice(&raw).map_err(CacheError::Decode)
    }

    /// Encodes `value` the way `set` stores it.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(value).map_err(CacheError::Encode)
    }

    /// Best-effort write: failures are logged, never returned.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        match Self::encode(value) {
            Ok(payload) => self.set_encoded(key, payload, ttl).await,
            Err(e) => error!(key, ttl_secs = ttl.as_secs(), error = %e, "Failed to encode cache value"),
        }
    }

    /// Best-effort write of an already-encoded payload.
    pub async fn set_encoded(&self, key: &str, payload: Vec<u8>, ttl: Duration) {
        match timeout(self.op_timeout, self.store.set_ex(key, payload, ttl)).await {
            Ok(Ok(())) => debug!(key, ttl_secs = ttl.as_secs(), "Cache SET"),
            Ok(Err(e)) => error!(key, ttl_secs = ttl.as_secs(), error = %e, "Failed to set key"),
            Err(_) => error!(key, ttl_secs = ttl.as_secs(), "Timed out setting key"),
        }
    }

    /// Deletes every argument. Arguments containing a wildcard glyph are
    /// expanded with a full SCAN first; all resolved keys go out in one DEL.
    pub async fn delete(&self, keys: &[&str]) -> Result<u64, CacheError> {
        let mut resolved = Vec::new();
        for &key in keys {
            if key.contains(WILDCARD_GLYPHS) {
                match timeout(self.bulk_timeout, self.scan_all(key)).await {
                    Ok(Ok(found)) => resolved.extend(found),
                    Ok(Err(e)) => error!(pattern = key, error = %e, "SCAN failed"),
                    Err(_) => error!(pattern = key, "SCAN timed out"),
                }
            } else {
                resolved.push(key.to_string());
            }
        }

        if resolved.is_empty() {
            return Ok(0);
        }

        let removed = timeout(self.op_timeout, self.store.del(&resolved))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(|e| {
                error!(keys = ?resolved, error = %e, "Failed to delete keys");
                e
            })?;
        debug!(requested = resolved.len(), removed, "Cache DEL");
        Ok(removed)
    }

    async fn scan_all(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut found = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, keys) = self.store.scan(cursor, pattern, SCAN_COUNT).await?;
            found.extend(keys);
            if next == 0 {
                return Ok(found);
            }
            cursor = next;
        }
    }

    /// Scans every key matching `pattern` and fetches the values concurrently.
    ///
    /// A single producer walks the SCAN cursor into a bounded queue drained by
    /// a fixed worker pool. The whole call shares one deadline: once it passes
    /// the producer stops, in-flight fetches are dropped, the workers drain
    /// what is left in the queue without fetching, and the call fails with
    /// `Timeout` carrying the entries collected so far. Per-key decode or
    /// fetch failures are logged and skipped.
    pub async fn get_all<T>(&self, pattern: &str) -> Result<HashMap<String, T>, PartialScan<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let deadline = Instant::now() + self.bulk_timeout;
        let (tx, rx) = mpsc::channel::<String>(KEY_QUEUE_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let results: Arc<Mutex<HashMap<String, T>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut workers = JoinSet::new();
        for _ in 0..BULK_WORKERS {
            let cache = self.clone();
            let rx = Arc::clone(&rx);
            let results = Arc::clone(&results);
            workers.spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(key) = next else { break };
                    if Instant::now() >= deadline {
                        continue;
                    }
                    match timeout_at(deadline, cache.get::<T>(&key)).await {
                        Ok(Ok(value)) => {
                            if let Ok(mut map) = results.lock() {
                                map.insert(key, value);
                            }
                        }
                        Ok(Err(CacheError::NotFound)) | Err(_) => {}
                        Ok(Err(e)) => error!(key = %key, error = %e, "Failed to get key"),
                    }
                }
            });
        }

        let mut failure = None;
        let mut cursor = 0;
        'scan: loop {
            let (next, keys) =
                match timeout_at(deadline, self.store.scan(cursor, pattern, SCAN_COUNT)).await {
                    Ok(Ok(page)) => page,
                    Ok(Err(e)) => {
                        error!(pattern, error = %e, "Redis SCAN failed");
                        failure = Some(e);
                        break;
                    }
                    Err(_) => break,
                };

            for key in keys {
                if timeout_at(deadline, tx.send(key)).await.is_err() {
                    break 'scan;
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Bulk fetch worker aborted");
            }
        }

        let entries = match Arc::try_unwrap(results) {
            Ok(map) => map.into_inner().unwrap_or_else(|p| p.into_inner()),
            Err(shared) => std::mem::take(&mut *shared.lock().unwrap_or_else(|p| p.into_inner())),
        };

        if Instant::now() >= deadline {
            warn!(pattern, collected = entries.len(), "Bulk scan deadline exceeded");
            return Err(PartialScan {
                error: CacheError::Timeout,
                entries,
            });
        }
        if let Some(error) = failure {
            return Err(PartialScan { error, entries });
        }

        debug!(pattern, collected = entries.len(), "Bulk scan complete");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::store::MemoryStore;
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_cache() -> (Arc<MemoryStore>, Cache) {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(store.clone());
        (store, cache)
    }

    /// Store whose keys `slow-*` take far longer than the bulk deadline.
    struct SlowKeyStore {
        inner: MemoryStore,
        fetched: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for SlowKeyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            if key.starts_with("slow-") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            let value = self.inner.get(key).await;
            self.fetched.fetch_add(1, Ordering::SeqCst);
            value
        }

        async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
            self.inner.set_ex(key, value, ttl).await
        }

        async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
            self.inner.del(keys).await
        }

        async fn scan(
            &self,
            cursor: u64,
            pattern: &str,
            count: usize,
        ) -> Result<(u64, Vec<String>), CacheError> {
            self.inner.scan(cursor, pattern, count).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_round_trips_until_ttl_expires() {
        let (_, cache) = memory_cache();
        let value = vec!["newest".to_string(), "older".to_string()];
        cache.set("videos:a", &value, Duration::from_secs(300)).await;

        let read: Vec<String> = cache.get("videos:a").await.unwrap();
        assert_eq!(read, value);

        tokio::time::advance(Duration::from_secs(301)).await;
        let expired = cache.get::<Vec<String>>("videos:a").await;
        assert!(matches!(expired, Err(CacheError::NotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_get_times_out() {
        let store = SlowKeyStore {
            inner: MemoryStore::new(),
            fetched: AtomicUsize::new(0),
        };
        store.inner.put_raw("slow-key", b"[]");
        let cache = Cache::new(Arc::new(store));

        let started = Instant::now();
        let result = cache.get::<Vec<String>>("slow-key").await;

        assert!(matches!(result, Err(CacheError::Timeout)));
        assert!(started.elapsed() >= OP_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let (_, cache) = memory_cache();
        let result = cache.get::<Vec<String>>("videos:none").await;
        assert!(matches!(result, Err(CacheError::NotFound)));
    }

    #[tokio::test]
    async fn test_get_wrong_shape_is_decode_error() {
        let (store, cache) = memory_cache();
        store.put_raw("videos:bad", b"{\"not\":\"a list\"}");
        let result = cache.get::<Vec<String>>("videos:bad").await;
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[tokio::test]
    async fn test_delete_expands_patterns_and_literal_keys() {
        let (store, cache) = memory_cache();
        for key in ["videos:a", "videos:b", "videos:c", "channels:x", "keep"] {
            store.put_raw(key, b"1");
        }

        let removed = cache.delete(&["videos:*", "channels:x"]).await.unwrap();
        assert_eq!(removed, 4);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_no_arguments_is_noop() {
        let (_, cache) = memory_cache();
        assert_eq!(cache.delete(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_all_collects_matching_keys() {
        let (store, cache) = memory_cache();
        for i in 0..250 {
            store.put_raw(&format!("videos:{i:03}"), format!("{i}").as_bytes());
        }
        store.put_raw("other:1", b"1");

        let all: HashMap<String, u32> = cache.get_all("videos:*").await.unwrap();
        assert_eq!(all.len(), 250);
        assert_eq!(all["videos:042"], 42);
    }

    #[tokio::test]
    async fn test_get_all_skips_undecodable_values() {
        let (store, cache) = memory_cache();
        store.put_raw("videos:good", b"7");
        store.put_raw("videos:bad", b"not json");

        let all: HashMap<String, u32> = cache.get_all("videos:*").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["videos:good"], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_all_returns_partial_result_on_deadline() {
        let store = Arc::new(SlowKeyStore {
            inner: MemoryStore::new(),
            fetched: AtomicUsize::new(0),
        });
        // "fast-" sorts before "slow-", so the scan yields the fast keys first.
        for i in 0..12 {
            store.inner.put_raw(&format!("fast-{i:02}"), b"1");
        }
        for i in 0..13 {
            store.inner.put_raw(&format!("slow-{i:02}"), b"1");
        }
        let cache = Cache::new(store.clone())
            .with_timeouts(Duration::from_secs(120), Duration::from_secs(10));

        let err = cache.get_all::<u32>("*").await.unwrap_err();

        assert!(matches!(err.error, CacheError::Timeout));
        let keys: HashSet<&str> = err.entries.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 12);
        assert!(keys.iter().all(|k| k.starts_with("fast-")));
        assert_eq!(store.fetched.load(Ordering::SeqCst), 12);
        // Every worker has exited and released its handle on the store.
        assert_eq!(Arc::strong_count(&store), 2);
    }
}
