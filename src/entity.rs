//! Per-entity cache facade
//!
//! [`CacheEngine`] wires a backend, its fetcher and a relationship registry
//! together; [`EntityCache`] exposes the read, prefetch and expiry entry
//! points of one registered entity.

use crate::cache::{backend::CacheBackend, config::CacheConfig, context::CacheContext, fetcher::CacheFetcher};
use crate::cache::types::CacheKey;
use crate::error::{CacheError, Result};
use crate::loader::{Cached, CacheKeyLoader, DomainKey, Loader, Record};
use crate::prefetch::{Operation, PrefetchResult, RelationSpec, RelationshipRegistry};
use crate::strategy::{Eager, Lazy, LoadStrategy};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Cache engine shared by every entity of one registry
pub struct CacheEngine {
    fetcher: Arc<CacheFetcher>,
    key_loader: Arc<CacheKeyLoader>,
    registry: Arc<RelationshipRegistry>,
}

impl CacheEngine {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig, registry: RelationshipRegistry) -> Result<Self> {
        let fetcher = Arc::new(CacheFetcher::new(backend, config)?);
        info!(
            "Cache engine ready for {} entities (client {})",
            registry.entity_names().count(),
            fetcher.client_id()
        );
        Ok(Self {
            key_loader: Arc::new(CacheKeyLoader::new(fetcher.clone())),
            fetcher,
            registry: Arc::new(registry),
        })
    }

    /// Facade of a registered entity
    pub fn entity(&self, name: &str) -> Result<EntityCache> {
        let definition = self
            .registry
            .entity(name)
            .ok_or_else(|| CacheError::InvalidArgument(format!("unknown entity {}", name)))?;

        Ok(EntityCache {
            name: definition.name.clone(),
            blob: definition.blob.clone(),
            attributes: definition.attributes.clone(),
            parent_keyed: definition
                .relationships
                .values()
                .filter_map(|relationship| relationship.parent_keyed_loader().cloned())
                .collect(),
            key_loader: self.key_loader.clone(),
            registry: self.registry.clone(),
        })
    }

    pub fn fetcher(&self) -> &Arc<CacheFetcher> {
        &self.fetcher
    }

    pub fn key_loader(&self) -> &Arc<CacheKeyLoader> {
        &self.key_loader
    }

    pub fn registry(&self) -> &RelationshipRegistry {
        &self.registry
    }

    /// Strategy that loads every request as it is made
    pub fn eager(&self, ctx: CacheContext) -> Eager {
        Eager::new(self.key_loader.clone(), ctx)
    }

    /// Strategy that batches requests per round
    pub fn lazy(&self, ctx: CacheContext) -> Lazy {
        Lazy::new(self.key_loader.clone(), ctx)
    }
}

/// Cached reads and invalidation for one entity class
pub struct EntityCache {
    name: String,
    blob: Arc<dyn Loader>,
    attributes: IndexMap<String, Arc<dyn Loader>>,
    parent_keyed: Vec<Arc<dyn Loader>>,
    key_loader: Arc<CacheKeyLoader>,
    registry: Arc<RelationshipRegistry>,
}

impl EntityCache {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record with primary key `id`
    pub async fn fetch(&self, ctx: &CacheContext, id: impl Into<DomainKey>) -> Result<Option<Record>> {
        let id = id.into();
        let loaded = self.key_loader.load(ctx, &*self.blob, &id).await?;
        Ok(loaded.and_then(Cached::into_record))
    }

    /// Records of `ids` in input order; ids without a record are skipped
    pub async fn fetch_multi(&self, ctx: &CacheContext, ids: &[DomainKey]) -> Result<Vec<Record>> {
        let results = self.key_loader.load_multi(ctx, &self.blob, ids).await?;
        Ok(results
            .into_values()
            .flatten()
            .filter_map(Cached::into_record)
            .collect())
    }

    /// Value of `attribute` looked up by its index key
    ///
    /// `Ok(None)` means no row matched; a row whose attribute is null gives
    /// `Some(Value::Null)`.
    pub async fn fetch_attribute(&self, ctx: &CacheContext, attribute: &str, key: &DomainKey) -> Result<Option<Value>> {
        let loader = self.attribute_loader(attribute)?;
        match self.key_loader.load(ctx, &**loader, key).await? {
            Some(Cached::Attribute(value)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Materialize `spec` for `records`, batching each level
    pub async fn prefetch(&self, ctx: &CacheContext, spec: &RelationSpec, records: Vec<Record>) -> Result<PrefetchResult> {
        let mut strategy = Lazy::new(self.key_loader.clone(), ctx.clone());
        self.prefetch_with(spec, records, &mut strategy).await
    }

    /// Materialize `spec` for `records` through a caller-provided strategy
    pub async fn prefetch_with(
        &self,
        spec: &RelationSpec,
        records: Vec<Record>,
        strategy: &mut dyn LoadStrategy,
    ) -> Result<PrefetchResult> {
        let operation = Operation::build(&self.registry, &self.name, spec, records)?;
        operation.execute(strategy).await
    }

    /// Invalidate everything cached about `record`
    ///
    /// Covers the record blob, its attribute index slots and the slots of
    /// relationships keyed by its id. Returns whether every delete reached
    /// the backend.
    pub async fn expire(&self, ctx: &CacheContext, record: &Record) -> bool {
        let mut keys: Vec<CacheKey> = vec![self.blob.cache_key(&record.id)];
        keys.extend(
            self.attributes
                .values()
                .filter_map(|loader| loader.record_key(record).map(|key| loader.cache_key(&key))),
        );
        keys.extend(self.parent_keyed.iter().map(|loader| loader.cache_key(&record.id)));

        debug!("Expiring {} {} ({} slots)", self.name, record.id, keys.len());
        self.key_loader.fetcher().delete_multi(ctx, &keys).await
    }

    /// Invalidate one attribute slot
    pub async fn expire_attribute(&self, ctx: &CacheContext, attribute: &str, key: &DomainKey) -> Result<bool> {
        let loader = self.attribute_loader(attribute)?;
        Ok(self.key_loader.fetcher().delete(ctx, &loader.cache_key(key)).await)
    }

    fn attribute_loader(&self, attribute: &str) -> Result<&Arc<dyn Loader>> {
        self.attributes
            .get(attribute)
            .ok_or_else(|| CacheError::InvalidArgument(format!("{} has no cached attribute {}", self.name, attribute)))
    }
}
