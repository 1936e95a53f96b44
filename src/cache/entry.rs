//! Cache slot contents: values, fill locks and deletion markers

use crate::cache::types::{CacheValue, CasToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Client id recorded on a lock whose owner failed to compute the value
pub const FILL_FAILED_CLIENT_ID: &str = "fill_failed";

/// What a cache slot holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum CacheEntry {
    /// A concrete encoded value
    Value(CacheValue),

    /// A value is being computed by the lock owner
    FillLock(FillLock),

    /// The slot was invalidated; stale fills must not overwrite it
    Deleted,
}

impl CacheEntry {
    /// The concrete value, if the slot holds one
    pub fn value(&self) -> Option<&CacheValue> {
        match self {
            CacheEntry::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, CacheEntry::Deleted)
    }

    pub fn fill_lock(&self) -> Option<&FillLock> {
        match self {
            CacheEntry::FillLock(lock) => Some(lock),
            _ => None,
        }
    }
}

/// Sentinel written into a slot while its value is being computed
///
/// `data_version` distinguishes lock generations: two locks are the same lock
/// only when both the client id and the data version match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FillLock {
    pub client_id: String,
    pub data_version: Uuid,
}

impl FillLock {
    /// Take a fresh lock generation for `client_id`
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            data_version: Uuid::new_v4(),
        }
    }

    /// Same generation, marked as abandoned after a failed compute
    pub fn failed(&self) -> Self {
        Self {
            client_id: FILL_FAILED_CLIENT_ID.to_string(),
            data_version: self.data_version,
        }
    }

    pub fn fill_failed(&self) -> bool {
        self.client_id == FILL_FAILED_CLIENT_ID
    }

    pub fn is_owned_by(&self, client_id: &str) -> bool {
        self.client_id == client_id
    }
}

/// A slot as held by a backend, with CAS token and TTL metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    /// The slot contents
    pub entry: CacheEntry,

    /// Token of the last write to this slot
    pub token: CasToken,

    /// Entry metadata
    pub metadata: EntryMetadata,
}

impl StoredEntry {
    /// Create a new stored entry, expiring after `ttl` when given
    ///
    /// A TTL reaching past the last representable timestamp never expires.
    pub fn new(entry: CacheEntry, token: CasToken, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
        });

        Self {
            entry,
            token,
            metadata: EntryMetadata {
                created_at: now,
                accessed_at: now,
                expires_at,
                access_count: 0,
            },
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        match self.metadata.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    /// Get time until expiration, `None` for entries without a TTL or already expired
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let expires_at = self.metadata.expires_at?;
        let now = Utc::now();
        if now > expires_at {
            None
        } else {
            (expires_at - now).to_std().ok()
        }
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    /// Get the age of the entry
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Metadata associated with a stored entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the slot was last written
    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub accessed_at: DateTime<Utc>,

    /// When the entry expires, if ever
    pub expires_at: Option<DateTime<Utc>>,

    /// Number of times this entry has been read
    pub access_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_fill_lock_identity() {
        let lock = FillLock::new("client-a");
        let same = FillLock {
            client_id: "client-a".to_string(),
            data_version: lock.data_version,
        };
        let other_generation = FillLock::new("client-a");

        assert_eq!(lock, same);
        assert_ne!(lock, other_generation);
        assert!(lock.is_owned_by("client-a"));
        assert!(!lock.is_owned_by("client-b"));
    }

    #[test]
    fn test_failed_lock_keeps_generation() {
        let lock = FillLock::new("client-a");
        let failed = lock.failed();

        assert!(failed.fill_failed());
        assert!(!lock.fill_failed());
        assert_eq!(failed.data_version, lock.data_version);
    }

    #[test]
    fn test_entry_accessors() {
        let value = CacheEntry::Value("v".to_string());
        assert_eq!(value.value(), Some(&"v".to_string()));
        assert!(!value.is_deleted());

        assert!(CacheEntry::Deleted.is_deleted());
        assert!(CacheEntry::Deleted.value().is_none());

        let locked = CacheEntry::FillLock(FillLock::new("c"));
        assert!(locked.fill_lock().is_some());
    }

    #[test]
    fn test_entry_serialization_is_tagged() {
        let json = serde_json::to_string(&CacheEntry::Deleted).unwrap();
        assert_eq!(json, r#"{"state":"deleted"}"#);

        let lock = CacheEntry::FillLock(FillLock::new("c"));
        let back: CacheEntry = serde_json::from_str(&serde_json::to_string(&lock).unwrap()).unwrap();
        assert_eq!(back, lock);
    }

    #[test]
    fn test_stored_entry_expiration() {
        let entry = StoredEntry::new(
            CacheEntry::Deleted,
            CasToken(1),
            Some(Duration::from_millis(100)),
        );

        assert!(!entry.is_expired());
        assert!(entry.time_until_expiration().is_some());
        sleep(Duration::from_millis(150));
        assert!(entry.is_expired());
        assert!(entry.time_until_expiration().is_none());
    }

    #[test]
    fn test_huge_ttl_saturates_to_no_expiry() {
        for secs in [1_000_000_000_000_000, u64::MAX] {
            let entry = StoredEntry::new(CacheEntry::Value("v".to_string()), CasToken(1), Some(Duration::from_secs(secs)));
            assert!(!entry.is_expired());
            assert!(entry.metadata.expires_at.is_none());
        }
    }

    #[test]
    fn test_stored_entry_without_ttl_never_expires() {
        let mut entry = StoredEntry::new(CacheEntry::Value("v".to_string()), CasToken(1), None);
        assert!(!entry.is_expired());
        assert!(entry.time_until_expiration().is_none());

        entry.mark_accessed();
        assert_eq!(entry.metadata.access_count, 1);
    }
}
