//! Cache backend trait
//!
//! Backends are memcached-like key/value stores. Optimistic concurrency is
//! exposed the way memcached exposes it: `gets` returns a CAS token with the
//! slot, and `cas` only stores while the slot still carries that token.
//! Multi-key variants default to sequential single-key calls, so a backend
//! without native batching stays correct and only loses parallelism.

use crate::cache::entry::CacheEntry;
use crate::cache::types::{CacheKey, CasToken};
use crate::error::BackendResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A slot read together with its CAS token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub entry: CacheEntry,
    pub token: CasToken,
}

/// One token-guarded write of a `cas_multi` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasWrite {
    pub key: CacheKey,
    pub entry: CacheEntry,
    pub token: CasToken,
}

/// Outcome of a read-modify-write through [`CacheBackend::cas_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The new entry was stored
    Stored,
    /// The update function declined to write
    Skipped,
    /// The slot was absent; the update function was not called
    Missing,
    /// The slot changed between read and write
    Conflict,
}

/// Key-value store shared by every client of the cache
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a slot together with its CAS token
    async fn gets(&self, key: &str) -> BackendResult<Option<Versioned>>;

    /// Read several slots in one round trip; absent keys are left out
    async fn gets_multi(&self, keys: &[CacheKey]) -> BackendResult<HashMap<CacheKey, Versioned>>;

    /// Unconditionally store an entry
    async fn write(&self, key: &str, entry: CacheEntry, ttl: Option<Duration>) -> BackendResult<()>;

    /// Store only if the slot is absent; returns the new token on success
    async fn add(
        &self,
        key: &str,
        entry: CacheEntry,
        ttl: Option<Duration>,
    ) -> BackendResult<Option<CasToken>>;

    /// Store only if the slot still carries `token`; returns the new token on success
    async fn cas(
        &self,
        key: &str,
        entry: CacheEntry,
        token: CasToken,
        ttl: Option<Duration>,
    ) -> BackendResult<Option<CasToken>>;

    /// Remove a slot
    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Remove every slot
    async fn clear(&self) -> BackendResult<()>;

    /// Plain read without the CAS token
    async fn read(&self, key: &str) -> BackendResult<Option<CacheEntry>> {
        Ok(self.gets(key).await?.map(|versioned| versioned.entry))
    }

    /// Store several entries
    async fn write_multi(
        &self,
        entries: Vec<(CacheKey, CacheEntry)>,
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        for (key, entry) in entries {
            self.write(&key, entry, ttl).await?;
        }
        Ok(())
    }

    /// Add several entries; returns the tokens of those that were stored
    async fn add_multi(
        &self,
        entries: Vec<(CacheKey, CacheEntry)>,
        ttl: Option<Duration>,
    ) -> BackendResult<HashMap<CacheKey, CasToken>> {
        let mut added = HashMap::new();
        for (key, entry) in entries {
            if let Some(token) = self.add(&key, entry, ttl).await? {
                added.insert(key, token);
            }
        }
        Ok(added)
    }

    /// Apply several token-guarded writes, each independently
    ///
    /// Returns the keys that were stored. A rejected write leaves its slot
    /// untouched and does not affect the others.
    async fn cas_multi(
        &self,
        writes: Vec<CasWrite>,
        ttl: Option<Duration>,
    ) -> BackendResult<Vec<CacheKey>> {
        let mut stored = Vec::new();
        for write in writes {
            if self.cas(&write.key, write.entry, write.token, ttl).await?.is_some() {
                stored.push(write.key);
            }
        }
        Ok(stored)
    }

    /// Remove several slots
    async fn delete_multi(&self, keys: &[CacheKey]) -> BackendResult<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Read-modify-write of one slot
    ///
    /// `update` sees the current entry and returns the replacement, or `None`
    /// to leave the slot alone.
    async fn cas_with(
        &self,
        key: &str,
        ttl: Option<Duration>,
        update: &mut (dyn for<'e> FnMut(&'e CacheEntry) -> Option<CacheEntry> + Send),
    ) -> BackendResult<CasOutcome> {
        let Some(current) = self.gets(key).await? else {
            return Ok(CasOutcome::Missing);
        };
        let Some(replacement) = update(&current.entry) else {
            return Ok(CasOutcome::Skipped);
        };
        if self.cas(key, replacement, current.token, ttl).await?.is_some() {
            Ok(CasOutcome::Stored)
        } else {
            Ok(CasOutcome::Conflict)
        }
    }
}
