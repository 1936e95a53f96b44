//! Stampede-safe fetch-or-compute over a shared cache backend
//!
//! Mutual exclusion between clients is encoded in the cache slots themselves:
//! a missing slot is claimed by adding a [`FillLock`], the owner computes the
//! value and swaps the lock for it with CAS. Invalidation writes a DELETED
//! marker, which changes the slot's CAS token, so a fill that started before
//! the delete can no longer land.
//!
//! Backend failures never reach the caller. A failed read is a miss that
//! still computes, a failed write is dropped. Errors from the compute
//! function always propagate unchanged.

use crate::cache::{
    backend::{CacheBackend, CasWrite, Versioned},
    config::{CacheConfig, FetchOptions},
    context::CacheContext,
    entry::{CacheEntry, FillLock},
    types::{CacheKey, CacheValue, CasToken},
};
use crate::error::{BackendResult, CacheError, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Slot state seen while trying to take a fill lock
enum LockState {
    /// A value is present
    Hit(CacheValue),

    /// This client now owns the slot
    Acquired { lock: FillLock, token: CasToken },

    /// Another client holds a lock
    Held(FillLock),

    /// Lost a race against a delete or an expiring lock; try again
    Contended,

    /// The backend could not be reached
    Unavailable,
}

/// Read-through fetcher with fill locks
pub struct CacheFetcher {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    client_id: String,
}

impl CacheFetcher {
    /// Create a fetcher over `backend`
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(
            "Initializing cache fetcher (namespace: {}, client: {})",
            config.namespace, client_id
        );

        Ok(Self {
            backend,
            config,
            client_id,
        })
    }

    /// Client id recorded on the fill locks this fetcher takes
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Fetch `key` with the configured fetch options
    pub async fn fetch<F, Fut>(&self, ctx: &CacheContext, key: &str, compute: F) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<CacheValue>> + Send,
    {
        let options = self.config.fetch_options();
        self.fetch_with_options(ctx, key, &options, compute).await
    }

    /// Fetch `key`, computing and filling it on a miss
    ///
    /// With a fill lock duration, at most one client computes a missing key
    /// at a time; the others wait for its value, up to
    /// `options.lock_wait_limit` waits.
    pub async fn fetch_with_options<F, Fut>(
        &self,
        ctx: &CacheContext,
        key: &str,
        options: &FetchOptions,
        compute: F,
    ) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<CacheValue>> + Send,
    {
        if !ctx.use_cache {
            return compute().await;
        }

        if let Some(value) = ctx.memo_get(key) {
            debug!("Memo hit: {}", key);
            return Ok(value);
        }

        let value = match options.fill_lock_duration {
            Some(duration) if ctx.fill_cache => {
                if duration.is_zero() {
                    return Err(CacheError::InvalidArgument(
                        "fill_lock_duration must be greater than 0".to_string(),
                    ));
                }
                if options.lock_wait_limit == 0 {
                    return Err(CacheError::InvalidArgument(
                        "lock_wait_limit must be greater than 0".to_string(),
                    ));
                }
                self.fetch_with_fill_lock(ctx, key, duration, options, compute)
                    .await?
            }
            _ => self.fetch_without_fill_lock(ctx, key, compute).await?,
        };

        ctx.memo_put(key, &value);
        Ok(value)
    }

    async fn fetch_without_fill_lock<F, Fut>(
        &self,
        ctx: &CacheContext,
        key: &str,
        compute: F,
    ) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<CacheValue>> + Send,
    {
        let current = match self.backend.gets(key).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Cache read of {} failed, loading from source: {}", key, e);
                return compute().await;
            }
        };

        match current {
            Some(Versioned {
                entry: CacheEntry::Value(value),
                ..
            }) => {
                debug!("Cache hit: {}", key);
                Ok(value)
            }
            // DELETED or someone else's lock: compute, and only replace
            // the slot if nobody wrote to it meanwhile
            Some(Versioned { token, .. }) => {
                debug!("Cache miss on invalidated or locked slot: {}", key);
                let value = compute().await?;
                if ctx.fill_cache {
                    let ttl = self.config.ttl_with_jitter();
                    let filled = self
                        .backend
                        .cas(key, CacheEntry::Value(value.clone()), token, ttl)
                        .await;
                    if let Some(None) = absorb(filled, key, "fill") {
                        debug!("Fill of {} dropped: slot changed while computing", key);
                    }
                }
                Ok(value)
            }
            None => {
                debug!("Cache miss: {}", key);
                let value = compute().await?;
                if ctx.fill_cache {
                    let ttl = self.config.ttl_with_jitter();
                    let added = self
                        .backend
                        .add(key, CacheEntry::Value(value.clone()), ttl)
                        .await;
                    absorb(added, key, "fill");
                }
                Ok(value)
            }
        }
    }

    async fn fetch_with_fill_lock<F, Fut>(
        &self,
        ctx: &CacheContext,
        key: &str,
        duration: Duration,
        options: &FetchOptions,
        compute: F,
    ) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<CacheValue>> + Send,
    {
        let lock_wait_limit = options.lock_wait_limit;
        let lock_ttl = Some(options.lock_ttl(self.config.lock_ttl));
        let mut waits = 0u32;
        let mut races = 0u32;

        loop {
            match self.fetch_or_take_lock(key, lock_ttl).await {
                LockState::Hit(value) => return Ok(value),
                LockState::Unavailable => return compute().await,
                LockState::Acquired { lock, token } => {
                    debug!("Took fill lock on {} ({})", key, lock.data_version);
                    let value = match compute().await {
                        Ok(value) => value,
                        Err(e) => {
                            self.mark_fill_failed(key, &lock, token, lock_ttl).await;
                            return Err(e);
                        }
                    };
                    self.fill_locked(key, &value, token).await;
                    return Ok(value);
                }
                LockState::Held(lock) => {
                    if lock.fill_failed() {
                        debug!("Fill lock on {} was abandoned, computing without it", key);
                        return self.fetch_without_fill_lock(ctx, key, compute).await;
                    }
                    if waits >= lock_wait_limit {
                        warn!(
                            "Giving up on fill lock for {} held by {} after {} waits",
                            key, lock.client_id, waits
                        );
                        return Err(CacheError::LockWaitTimeout {
                            key: key.to_string(),
                            waits,
                        });
                    }
                    waits += 1;
                    debug!(
                        "Waiting on fill lock for {} held by {} ({}/{})",
                        key, lock.client_id, waits, lock_wait_limit
                    );
                    tokio::time::sleep(duration).await;
                }
                LockState::Contended => {
                    races += 1;
                    if races > lock_wait_limit {
                        debug!("Slot {} keeps changing, computing without filling", key);
                        return compute().await;
                    }
                }
            }
        }
    }

    /// Read the slot and claim it when it is absent or DELETED
    async fn fetch_or_take_lock(&self, key: &str, lock_ttl: Option<Duration>) -> LockState {
        let current = match self.backend.gets(key).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Cache read of {} failed, loading from source: {}", key, e);
                return LockState::Unavailable;
            }
        };

        let lock = FillLock::new(&self.client_id);
        let claimed = match current {
            Some(Versioned {
                entry: CacheEntry::Value(value),
                ..
            }) => return LockState::Hit(value),
            Some(Versioned {
                entry: CacheEntry::FillLock(held),
                ..
            }) => return LockState::Held(held),
            Some(Versioned {
                entry: CacheEntry::Deleted,
                token,
            }) => {
                self.backend
                    .cas(key, CacheEntry::FillLock(lock.clone()), token, lock_ttl)
                    .await
            }
            None => {
                self.backend
                    .add(key, CacheEntry::FillLock(lock.clone()), lock_ttl)
                    .await
            }
        };

        match claimed {
            Ok(Some(token)) => LockState::Acquired { lock, token },
            Ok(None) => self.reread(key).await,
            Err(e) => {
                warn!("Taking fill lock on {} failed: {}", key, e);
                LockState::Unavailable
            }
        }
    }

    /// Classify the slot after losing the race to claim it
    async fn reread(&self, key: &str) -> LockState {
        match self.backend.gets(key).await {
            Ok(Some(Versioned {
                entry: CacheEntry::Value(value),
                ..
            })) => LockState::Hit(value),
            Ok(Some(Versioned {
                entry: CacheEntry::FillLock(held),
                ..
            })) => LockState::Held(held),
            Ok(_) => LockState::Contended,
            Err(e) => {
                warn!("Cache read of {} failed, loading from source: {}", key, e);
                LockState::Unavailable
            }
        }
    }

    async fn fill_locked(&self, key: &str, value: &CacheValue, token: CasToken) {
        let ttl = self.config.ttl_with_jitter();
        let filled = self
            .backend
            .cas(key, CacheEntry::Value(value.clone()), token, ttl)
            .await;
        match absorb(filled, key, "fill") {
            Some(Some(_)) => debug!("Filled {}", key),
            Some(None) => debug!("Fill of {} dropped: lock lost while computing", key),
            None => {}
        }
    }

    async fn mark_fill_failed(
        &self,
        key: &str,
        lock: &FillLock,
        token: CasToken,
        lock_ttl: Option<Duration>,
    ) {
        debug!("Compute for {} failed, marking lock {} abandoned", key, lock.data_version);
        let marked = self
            .backend
            .cas(key, CacheEntry::FillLock(lock.failed()), token, lock_ttl)
            .await;
        absorb(marked, key, "fill failure marking");
    }

    /// Fetch several keys with one read, one lock write, one compute and one fill
    ///
    /// Results follow the order of `keys`. `compute` receives every key that
    /// missed and returns the values it could produce; keys it leaves out are
    /// missing from the result as well.
    pub async fn fetch_multi<F, Fut>(
        &self,
        ctx: &CacheContext,
        keys: &[CacheKey],
        compute: F,
    ) -> Result<IndexMap<CacheKey, CacheValue>>
    where
        F: FnOnce(Vec<CacheKey>) -> Fut + Send,
        Fut: Future<Output = Result<IndexMap<CacheKey, CacheValue>>> + Send,
    {
        let mut found: HashMap<CacheKey, CacheValue> = HashMap::with_capacity(keys.len());
        let mut pending = Vec::new();
        let mut seen = HashSet::new();

        for key in keys {
            if !seen.insert(key.as_str()) {
                continue;
            }
            match ctx.memo_get(key) {
                Some(value) => {
                    found.insert(key.clone(), value);
                }
                None => pending.push(key.clone()),
            }
        }

        if !pending.is_empty() {
            let loaded: HashMap<CacheKey, CacheValue> = if ctx.use_cache {
                self.fetch_multi_cached(ctx, pending, compute).await?
            } else {
                compute(pending).await?.into_iter().collect()
            };
            for (key, value) in loaded {
                ctx.memo_put(&key, &value);
                found.insert(key, value);
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| found.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }

    async fn fetch_multi_cached<F, Fut>(
        &self,
        ctx: &CacheContext,
        keys: Vec<CacheKey>,
        compute: F,
    ) -> Result<HashMap<CacheKey, CacheValue>>
    where
        F: FnOnce(Vec<CacheKey>) -> Fut + Send,
        Fut: Future<Output = Result<IndexMap<CacheKey, CacheValue>>> + Send,
    {
        let slots = match self.backend.gets_multi(&keys).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!(
                    "Cache read of {} keys failed, loading from source: {}",
                    keys.len(),
                    e
                );
                return Ok(compute(keys).await?.into_iter().collect());
            }
        };

        let mut results = HashMap::with_capacity(keys.len());
        let mut misses = Vec::new();
        let mut absent = Vec::new();
        let mut deleted: HashMap<CacheKey, CasToken> = HashMap::new();

        for key in keys {
            match slots.get(&key) {
                Some(Versioned {
                    entry: CacheEntry::Value(value),
                    ..
                }) => {
                    results.insert(key, value.clone());
                }
                Some(Versioned {
                    entry: CacheEntry::Deleted,
                    token,
                }) => {
                    deleted.insert(key.clone(), *token);
                    misses.push(key);
                }
                // Locked by someone else: compute without waiting, never fill
                Some(Versioned {
                    entry: CacheEntry::FillLock(_),
                    ..
                }) => misses.push(key),
                None => {
                    absent.push(key.clone());
                    misses.push(key);
                }
            }
        }

        debug!(
            "fetch_multi: {} hits, {} misses ({} deleted)",
            results.len(),
            misses.len(),
            deleted.len()
        );
        if misses.is_empty() {
            return Ok(results);
        }

        let lock = FillLock::new(&self.client_id);
        let lock_ttl = Some(self.config.fetch_options().lock_ttl(self.config.lock_ttl));
        let mut owned: HashMap<CacheKey, CasToken> = HashMap::new();
        if ctx.fill_cache && !absent.is_empty() {
            let locks = absent
                .into_iter()
                .map(|key| (key, CacheEntry::FillLock(lock.clone())))
                .collect();
            if let Some(added) = absorb(self.backend.add_multi(locks, lock_ttl).await, "<multi>", "lock") {
                owned = added;
            }
        }

        let computed = match compute(misses.clone()).await {
            Ok(computed) => computed,
            Err(e) => {
                self.release_locks(&lock, &owned, lock_ttl).await;
                return Err(e);
            }
        };

        if ctx.fill_cache {
            let writes: Vec<CasWrite> = computed
                .iter()
                .filter_map(|(key, value)| {
                    owned
                        .get(key)
                        .or_else(|| deleted.get(key))
                        .map(|token| CasWrite {
                            key: key.clone(),
                            entry: CacheEntry::Value(value.clone()),
                            token: *token,
                        })
                })
                .collect();

            if !writes.is_empty() {
                let attempted = writes.len();
                let ttl = self.config.ttl_with_jitter();
                if let Some(stored) = absorb(self.backend.cas_multi(writes, ttl).await, "<multi>", "fill") {
                    if stored.len() < attempted {
                        debug!(
                            "fetch_multi dropped {} of {} fills lost to concurrent writes",
                            attempted - stored.len(),
                            attempted
                        );
                    }
                }
            }

            // Locks on keys the compute produced nothing for would otherwise
            // stall waiters until they expire
            let unfilled: HashMap<CacheKey, CasToken> = owned
                .into_iter()
                .filter(|(key, _)| !computed.contains_key(key))
                .collect();
            self.release_locks(&lock, &unfilled, lock_ttl).await;
        }

        for key in misses {
            if let Some(value) = computed.get(&key) {
                results.insert(key, value.clone());
            }
        }
        Ok(results)
    }

    /// Mark locks this client still owns as abandoned
    async fn release_locks(
        &self,
        lock: &FillLock,
        owned: &HashMap<CacheKey, CasToken>,
        lock_ttl: Option<Duration>,
    ) {
        if owned.is_empty() {
            return;
        }
        let writes = owned
            .iter()
            .map(|(key, token)| CasWrite {
                key: key.clone(),
                entry: CacheEntry::FillLock(lock.failed()),
                token: *token,
            })
            .collect();
        absorb(
            self.backend.cas_multi(writes, lock_ttl).await,
            "<multi>",
            "fill failure marking",
        );
    }

    /// Unconditionally store a value
    ///
    /// Returns whether the backend accepted the write.
    pub async fn write(&self, ctx: &CacheContext, key: &str, value: CacheValue) -> bool {
        ctx.memo_forget(key);
        if !ctx.fill_cache {
            return false;
        }
        let ttl = self.config.ttl_with_jitter();
        absorb(
            self.backend.write(key, CacheEntry::Value(value), ttl).await,
            key,
            "write",
        )
        .is_some()
    }

    /// Invalidate `key` by writing a DELETED marker
    ///
    /// The marker outlives any fill in flight for the old value, so that
    /// fill's CAS fails instead of resurrecting stale data.
    pub async fn delete(&self, ctx: &CacheContext, key: &str) -> bool {
        ctx.memo_forget(key);
        debug!("Invalidating {}", key);
        absorb(
            self.backend
                .write(key, CacheEntry::Deleted, Some(self.config.deleted_ttl))
                .await,
            key,
            "delete",
        )
        .is_some()
    }

    /// Invalidate several keys in one round trip
    pub async fn delete_multi(&self, ctx: &CacheContext, keys: &[CacheKey]) -> bool {
        if keys.is_empty() {
            return true;
        }
        for key in keys {
            ctx.memo_forget(key);
        }
        debug!("Invalidating {} keys", keys.len());
        let markers = keys
            .iter()
            .map(|key| (key.clone(), CacheEntry::Deleted))
            .collect();
        absorb(
            self.backend
                .write_multi(markers, Some(self.config.deleted_ttl))
                .await,
            "<multi>",
            "delete",
        )
        .is_some()
    }

    /// Drop every slot in the backend
    pub async fn clear(&self) -> bool {
        absorb(self.backend.clear().await, "*", "clear").is_some()
    }
}

/// Log and swallow a backend failure
fn absorb<T>(result: BackendResult<T>, key: &str, operation: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Cache {} of {} failed, continuing without cache: {}", operation, key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fetcher(backend: &MemoryBackend, config: CacheConfig) -> CacheFetcher {
        CacheFetcher::new(Arc::new(backend.clone()), config).unwrap()
    }

    fn locking() -> FetchOptions {
        FetchOptions::with_fill_lock(Duration::from_millis(900), 3)
    }

    #[tokio::test]
    async fn test_cold_fetch_fills_and_warm_fetch_hits() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());
        let ctx = CacheContext::default();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..2 {
            let value = fetcher
                .fetch(&ctx, "k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("data".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "data");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.peek("k").await, Some(CacheEntry::Value("data".to_string())));
    }

    #[tokio::test]
    async fn test_fill_lock_fetch_on_empty_backend() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());

        let value = fetcher
            .fetch_with_options(&CacheContext::default(), "k", &locking(), || async {
                Ok("data".to_string())
            })
            .await
            .unwrap();

        assert_eq!(value, "data");
        let stats = backend.stats().await;
        // miss read, lock add, fill cas: claiming the slot with its own add
        // costs one write more than an unlocked fill, so waiters can see the lock
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.writes, 2);
        assert_eq!(backend.read("k").await.unwrap(), Some(CacheEntry::Value("data".to_string())));
    }

    #[tokio::test]
    async fn test_huge_value_ttl_still_fills() {
        let backend = MemoryBackend::new();
        let config = CacheConfig::builder()
            .value_ttl(Duration::from_secs(1_000_000_000_000_000))
            .build();
        assert!(config.validate().is_ok());
        let fetcher = fetcher(&backend, config);
        let ctx = CacheContext::default();

        let value = fetcher
            .fetch_with_options(&ctx, "k", &locking(), || async { Ok("data".to_string()) })
            .await
            .unwrap();

        assert_eq!(value, "data");
        assert_eq!(backend.peek("k").await, Some(CacheEntry::Value("data".to_string())));
    }

    #[tokio::test]
    async fn test_foreign_lock_times_out() {
        let backend = MemoryBackend::new();
        backend
            .write("k", CacheEntry::FillLock(FillLock::new("other")), None)
            .await
            .unwrap();
        let fetcher = fetcher(&backend, CacheConfig::default());
        let options = FetchOptions::with_fill_lock(Duration::from_millis(10), 2);

        let err = fetcher
            .fetch_with_options(&CacheContext::default(), "k", &options, || async {
                Ok("never".to_string())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::LockWaitTimeout { waits: 2, .. }));
        assert_eq!(backend.stats().await.reads, 3);
    }

    #[tokio::test]
    async fn test_failed_lock_is_not_waited_on() {
        let backend = MemoryBackend::new();
        let lock = FillLock::new("other").failed();
        backend.write("k", CacheEntry::FillLock(lock), None).await.unwrap();
        let fetcher = fetcher(&backend, CacheConfig::default());

        let value = fetcher
            .fetch_with_options(&CacheContext::default(), "k", &locking(), || async {
                Ok("fresh".to_string())
            })
            .await
            .unwrap();

        assert_eq!(value, "fresh");
        assert_eq!(backend.peek("k").await, Some(CacheEntry::Value("fresh".to_string())));
    }

    #[tokio::test]
    async fn test_compute_error_marks_lock_failed() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());

        let err = fetcher
            .fetch_with_options(&CacheContext::default(), "k", &locking(), || async {
                Err(anyhow::anyhow!("db down").into())
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "db down");
        let slot = backend.peek("k").await.unwrap();
        assert!(slot.fill_lock().is_some_and(FillLock::fill_failed));
    }

    #[tokio::test]
    async fn test_invalid_fetch_options() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());
        let options = FetchOptions::with_fill_lock(Duration::from_millis(10), 0);

        let err = fetcher
            .fetch_with_options(&CacheContext::default(), "k", &options, || async {
                Ok("v".to_string())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_delete_writes_marker_and_refetch_replaces_it() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());
        let ctx = CacheContext::default();

        assert!(fetcher.write(&ctx, "k", "old".to_string()).await);
        assert!(fetcher.delete(&ctx, "k").await);
        assert_eq!(backend.peek("k").await, Some(CacheEntry::Deleted));

        let value = fetcher
            .fetch(&ctx, "k", || async { Ok("new".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "new");
        assert_eq!(backend.peek("k").await, Some(CacheEntry::Value("new".to_string())));
    }

    #[tokio::test]
    async fn test_read_only_context_never_writes() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());

        let value = fetcher
            .fetch_with_options(&CacheContext::read_only(), "k", &locking(), || async {
                Ok("v".to_string())
            })
            .await
            .unwrap();

        assert_eq!(value, "v");
        assert!(backend.is_empty().await);
        assert_eq!(backend.stats().await.writes, 0);
    }

    #[tokio::test]
    async fn test_uncached_context_skips_backend() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());

        fetcher
            .fetch(&CacheContext::uncached(), "k", || async { Ok("v".to_string()) })
            .await
            .unwrap();

        assert_eq!(backend.stats().await.reads, 0);
    }

    #[tokio::test]
    async fn test_memo_serves_repeated_fetches() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());
        let ctx = CacheContext::default().memoized();

        for _ in 0..3 {
            fetcher
                .fetch(&ctx, "k", || async { Ok("v".to_string()) })
                .await
                .unwrap();
        }

        assert_eq!(backend.stats().await.reads, 1);
    }

    #[tokio::test]
    async fn test_fetch_multi_partitions_hits_and_misses() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());
        let ctx = CacheContext::default();
        fetcher.write(&ctx, "a", "cached-a".to_string()).await;
        fetcher.delete(&ctx, "b").await;
        backend.reset_stats().await;

        let keys: Vec<CacheKey> = vec!["c".into(), "a".into(), "b".into()];
        let results = fetcher
            .fetch_multi(&ctx, &keys, |missing| async move {
                assert_eq!(missing, vec!["c".to_string(), "b".to_string()]);
                Ok(missing
                    .into_iter()
                    .map(|key| {
                        let value = format!("computed-{}", key);
                        (key, value)
                    })
                    .collect())
            })
            .await
            .unwrap();

        let ordered: Vec<_> = results.keys().cloned().collect();
        assert_eq!(ordered, keys);
        assert_eq!(results["a"], "cached-a");
        assert_eq!(results["b"], "computed-b");
        assert_eq!(backend.peek("b").await, Some(CacheEntry::Value("computed-b".to_string())));
        assert_eq!(backend.peek("c").await, Some(CacheEntry::Value("computed-c".to_string())));

        let stats = backend.stats().await;
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.writes, 2);
    }

    #[tokio::test]
    async fn test_fetch_multi_releases_unfilled_locks() {
        let backend = MemoryBackend::new();
        let fetcher = fetcher(&backend, CacheConfig::default());

        let results = fetcher
            .fetch_multi(&CacheContext::default(), &["gone".to_string()], |_| async {
                Ok(IndexMap::new())
            })
            .await
            .unwrap();

        assert!(results.is_empty());
        let slot = backend.peek("gone").await.unwrap();
        assert!(slot.fill_lock().is_some_and(FillLock::fill_failed));
    }

    #[tokio::test]
    async fn test_backend_outage_degrades_to_read_around() {
        let backend = MemoryBackend::new();
        backend.set_available(false);
        let fetcher = fetcher(&backend, CacheConfig::default());
        let ctx = CacheContext::default();

        let value = fetcher
            .fetch_with_options(&ctx, "k", &locking(), || async { Ok("v".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "v");

        let results = fetcher
            .fetch_multi(&ctx, &["a".to_string()], |keys| async move {
                Ok(keys.into_iter().map(|k| (k, "x".to_string())).collect())
            })
            .await
            .unwrap();
        assert_eq!(results["a"], "x");

        assert!(!fetcher.delete(&ctx, "k").await);
    }
}
