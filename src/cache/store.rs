//! In-process cache backend with TTL, LRU eviction and CAS tokens

use crate::cache::{
    backend::{CacheBackend, CasWrite, Versioned},
    entry::{CacheEntry, StoredEntry},
    types::{CacheKey, CacheStats, CasToken},
};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default maximum number of slots
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Memory-backed [`CacheBackend`]
///
/// This implementation provides:
/// - Thread-safe async access via RwLock
/// - Per-slot TTL expiration
/// - LRU eviction when the entry limit is reached
/// - Monotonic CAS tokens, one per write
/// - Round-trip statistics
/// - An availability switch to simulate outages
///
/// Clones share the same storage, which makes one instance usable as the
/// shared backend of several fetchers.
#[derive(Clone)]
pub struct MemoryBackend {
    max_entries: usize,
    store: Arc<RwLock<SlotStore>>,
    available: Arc<AtomicBool>,
}

/// Internal slot storage
struct SlotStore {
    /// Main storage: key -> slot
    slots: HashMap<CacheKey, StoredEntry>,

    /// LRU tracking: maintains access order
    lru_queue: VecDeque<CacheKey>,

    /// Current statistics
    stats: CacheStats,

    /// Last issued CAS token
    last_token: u64,
}

impl SlotStore {
    fn next_token(&mut self) -> CasToken {
        self.last_token += 1;
        CasToken(self.last_token)
    }

    /// Fetch a live slot, dropping it first if its TTL elapsed
    fn live(&mut self, key: &str) -> Option<&mut StoredEntry> {
        if self.slots.get(key).is_some_and(StoredEntry::is_expired) {
            debug!("Slot expired: {}", key);
            self.remove(key);
            self.stats.expirations += 1;
            return None;
        }
        self.slots.get_mut(key)
    }

    fn read(&mut self, key: &str) -> Option<Versioned> {
        let versioned = self.live(key).map(|slot| {
            slot.mark_accessed();
            Versioned {
                entry: slot.entry.clone(),
                token: slot.token,
            }
        });

        match &versioned {
            Some(Versioned {
                entry: CacheEntry::Value(_),
                ..
            }) => {
                self.stats.hits += 1;
                self.touch(key);
            }
            _ => self.stats.misses += 1,
        }

        versioned
    }

    fn store(
        &mut self,
        key: &str,
        entry: CacheEntry,
        ttl: Option<Duration>,
        max_entries: usize,
    ) -> CasToken {
        let token = self.next_token();
        if self.slots.contains_key(key) {
            self.lru_queue.retain(|k| k != key);
        } else {
            self.evict_if_needed(max_entries);
        }
        self.slots
            .insert(key.to_string(), StoredEntry::new(entry, token, ttl));
        self.lru_queue.push_back(key.to_string());
        self.stats.entries = self.slots.len();
        token
    }

    fn remove(&mut self, key: &str) {
        if self.slots.remove(key).is_some() {
            self.lru_queue.retain(|k| k != key);
            self.stats.entries = self.slots.len();
        }
    }

    /// Move to end of LRU queue (most recently used)
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn evict_if_needed(&mut self, max_entries: usize) {
        while self.slots.len() >= max_entries {
            match self.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting slot due to max_entries limit: {}", key);
                    self.slots.remove(&key);
                    self.stats.evictions += 1;
                }
                None => break,
            }
        }
        self.stats.entries = self.slots.len();
    }

    fn cas(
        &mut self,
        key: &str,
        entry: CacheEntry,
        token: CasToken,
        ttl: Option<Duration>,
        max_entries: usize,
    ) -> Option<CasToken> {
        if self.live(key).is_some_and(|slot| slot.token == token) {
            Some(self.store(key, entry, ttl, max_entries))
        } else {
            debug!("CAS rejected for {} ({})", key, token);
            self.stats.cas_conflicts += 1;
            None
        }
    }

    fn add(
        &mut self,
        key: &str,
        entry: CacheEntry,
        ttl: Option<Duration>,
        max_entries: usize,
    ) -> Option<CasToken> {
        if self.live(key).is_some() {
            None
        } else {
            Some(self.store(key, entry, ttl, max_entries))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new backend with the default entry limit
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    /// Create a backend holding at most `max_entries` slots
    pub fn with_max_entries(max_entries: usize) -> Self {
        info!("Initializing memory cache backend (max_entries: {})", max_entries);

        let store = SlotStore {
            slots: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: CacheStats::default(),
            last_token: 0,
        };

        Self {
            max_entries: max_entries.max(1),
            store: Arc::new(RwLock::new(store)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Get backend statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        store.stats.clone()
    }

    /// Reset the round-trip counters, keeping the stored slots
    pub async fn reset_stats(&self) {
        let mut store = self.store.write().await;
        let entries = store.slots.len();
        store.stats = CacheStats {
            entries,
            ..Default::default()
        };
    }

    /// Inspect a slot without touching statistics or LRU order
    pub async fn peek(&self, key: &str) -> Option<CacheEntry> {
        let store = self.store.read().await;
        store
            .slots
            .get(key)
            .filter(|slot| !slot.is_expired())
            .map(|slot| slot.entry.clone())
    }

    /// Get number of live slots
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.slots.values().filter(|slot| !slot.is_expired()).count()
    }

    /// Check if the backend holds no live slots
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable(
                "memory backend switched off".to_string(),
            ))
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn gets(&self, key: &str) -> BackendResult<Option<Versioned>> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.reads += 1;
        Ok(store.read(key))
    }

    async fn gets_multi(&self, keys: &[CacheKey]) -> BackendResult<HashMap<CacheKey, Versioned>> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.reads += 1;

        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(versioned) = store.read(key) {
                found.insert(key.clone(), versioned);
            }
        }
        Ok(found)
    }

    async fn write(&self, key: &str, entry: CacheEntry, ttl: Option<Duration>) -> BackendResult<()> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;
        store.store(key, entry, ttl, self.max_entries);
        Ok(())
    }

    async fn add(
        &self,
        key: &str,
        entry: CacheEntry,
        ttl: Option<Duration>,
    ) -> BackendResult<Option<CasToken>> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;
        Ok(store.add(key, entry, ttl, self.max_entries))
    }

    async fn cas(
        &self,
        key: &str,
        entry: CacheEntry,
        token: CasToken,
        ttl: Option<Duration>,
    ) -> BackendResult<Option<CasToken>> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;
        Ok(store.cas(key, entry, token, ttl, self.max_entries))
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;
        store.remove(key);
        Ok(())
    }

    async fn clear(&self) -> BackendResult<()> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;
        let count = store.slots.len();
        store.slots.clear();
        store.lru_queue.clear();
        store.stats.entries = 0;
        info!("Cleared {} slots from memory backend", count);
        Ok(())
    }

    async fn write_multi(
        &self,
        entries: Vec<(CacheKey, CacheEntry)>,
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;
        for (key, entry) in entries {
            store.store(&key, entry, ttl, self.max_entries);
        }
        Ok(())
    }

    async fn add_multi(
        &self,
        entries: Vec<(CacheKey, CacheEntry)>,
        ttl: Option<Duration>,
    ) -> BackendResult<HashMap<CacheKey, CasToken>> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;

        let mut added = HashMap::new();
        for (key, entry) in entries {
            if let Some(token) = store.add(&key, entry, ttl, self.max_entries) {
                added.insert(key, token);
            }
        }
        Ok(added)
    }

    async fn cas_multi(
        &self,
        writes: Vec<CasWrite>,
        ttl: Option<Duration>,
    ) -> BackendResult<Vec<CacheKey>> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;

        let mut stored = Vec::new();
        for write in writes {
            if store
                .cas(&write.key, write.entry, write.token, ttl, self.max_entries)
                .is_some()
            {
                stored.push(write.key);
            }
        }
        Ok(stored)
    }

    async fn delete_multi(&self, keys: &[CacheKey]) -> BackendResult<()> {
        self.check_available()?;
        let mut store = self.store.write().await;
        store.stats.writes += 1;
        for key in keys {
            store.remove(key);
        }
        Ok(())
    }
}
