//! Loaders: key translation, codec and batch load-from-source
//!
//! A [`Loader`] knows how one kind of cached value maps domain keys to cache
//! keys, how it is encoded into a cache slot, and how to load it from the
//! backing store. [`CacheKeyLoader`] puts the fetcher in front of any number
//! of loaders and resolves a whole batch of their keys with one cache read.
//!
//! ## Loader kinds
//!
//! - [`PrimaryIndexLoader`] - record blobs by primary key
//! - [`AttributeLoader`] - one attribute by an indexed key
//! - [`AssociationIdsLoader`] - ids of associated records by parent id
//! - [`EmbeddedAssociationLoader`] - associated records stored with the parent id

pub mod key_loader;
pub mod loaders;
pub mod record;
pub mod source;

pub use key_loader::{BatchEntry, BatchRequest, BatchResults, CacheKeyLoader};
pub use loaders::{
    AssociationIdsLoader, AttributeLoader, EmbeddedAssociationLoader, KeySpace, PrimaryIndexLoader,
};
pub use record::{Cached, DomainKey, Loaded, Record};
pub use source::{MemorySource, RecordSource};

use crate::cache::types::{CacheKey, CacheValue};
use crate::error::Result;
use async_trait::async_trait;
use indexmap::IndexMap;

/// Results of a batch load, one entry per requested key in request order
///
/// Keys without a value map to `None`; keys that were not requested are
/// not present at all.
pub type LoadResults = IndexMap<DomainKey, Loaded>;

/// Capability to translate, encode and load one kind of cached value
///
/// Loaders hold configuration only and are shared between callers.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Name used to group requests per loader
    ///
    /// Pending loads and batch requests merge on this name, so two distinct
    /// loaders must never share one. [`RelationshipRegistry`] rejects such
    /// registrations.
    ///
    /// [`RelationshipRegistry`]: crate::prefetch::RelationshipRegistry
    fn name(&self) -> &str;

    /// Cache key of `key`
    fn cache_key(&self, key: &DomainKey) -> CacheKey;

    /// Domain key under which this loader caches data about `record`
    fn record_key(&self, record: &Record) -> Option<DomainKey> {
        Some(record.id.clone())
    }

    /// Encode a loaded value for storage in a cache slot
    fn encode(&self, value: &Loaded) -> Result<CacheValue> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode a cache slot written by [`Loader::encode`]
    fn decode(&self, raw: &str) -> Result<Loaded> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load one key from the source
    async fn load_one(&self, key: &DomainKey) -> Result<Loaded> {
        let mut results = self.load_multi(std::slice::from_ref(key)).await?;
        Ok(results.shift_remove(key).flatten())
    }

    /// Load several keys from the source
    async fn load_multi(&self, keys: &[DomainKey]) -> Result<LoadResults>;
}
