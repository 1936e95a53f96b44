//! Batched key resolution across loaders
//!
//! Cache keys are opaque to the backend, so one `fetch_multi` serves the
//! keys of every loader in a batch. Only the misses are split back by loader
//! for their `load_multi` calls.

use crate::cache::{context::CacheContext, fetcher::CacheFetcher, types::CacheKey};
use crate::error::Result;
use crate::loader::{record::DomainKey, LoadResults, Loaded, Loader};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Keys requested from one loader
#[derive(Clone)]
pub struct BatchEntry {
    pub loader: Arc<dyn Loader>,
    pub keys: Vec<DomainKey>,
}

impl std::fmt::Debug for BatchEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEntry")
            .field("loader", &self.loader.name())
            .field("keys", &self.keys)
            .finish()
    }
}

/// Keys to resolve, grouped by loader name
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    entries: IndexMap<String, BatchEntry>,
}

/// Per-loader results of a [`BatchRequest`], keyed by loader name
pub type BatchResults = IndexMap<String, LoadResults>;

impl BatchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request `keys` from `loader`, merging with keys already requested from it
    ///
    /// Duplicate keys are kept once, at their first position.
    pub fn add(&mut self, loader: &Arc<dyn Loader>, keys: impl IntoIterator<Item = DomainKey>) {
        let entry = self
            .entries
            .entry(loader.name().to_string())
            .or_insert_with(|| BatchEntry {
                loader: loader.clone(),
                keys: Vec::new(),
            });

        let mut seen: IndexSet<DomainKey> = entry.keys.drain(..).collect();
        seen.extend(keys);
        entry.keys = seen.into_iter().collect();
    }

    /// Builder form of [`BatchRequest::add`]
    pub fn with(mut self, loader: &Arc<dyn Loader>, keys: impl IntoIterator<Item = DomainKey>) -> Self {
        self.add(loader, keys);
        self
    }

    pub fn get(&self, loader_name: &str) -> Option<&BatchEntry> {
        self.entries.get(loader_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BatchEntry)> {
        self.entries.iter()
    }

    /// Number of loaders in the batch
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of requested keys over every loader
    pub fn key_count(&self) -> usize {
        self.entries.values().map(|entry| entry.keys.len()).sum()
    }
}

/// Resolves domain keys through the cache, loading misses from their loaders
pub struct CacheKeyLoader {
    fetcher: Arc<CacheFetcher>,
}

impl CacheKeyLoader {
    pub fn new(fetcher: Arc<CacheFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Arc<CacheFetcher> {
        &self.fetcher
    }

    /// Resolve one key
    ///
    /// A value computed by this call is returned as loaded, without decoding
    /// the encoded form that went into the cache.
    pub async fn load(&self, ctx: &CacheContext, loader: &dyn Loader, key: &DomainKey) -> Result<Loaded> {
        let cache_key = loader.cache_key(key);
        let mut fresh: Option<Loaded> = None;
        let slot = &mut fresh;

        let raw = self
            .fetcher
            .fetch(ctx, &cache_key, move || async move {
                let value = loader.load_one(key).await?;
                let encoded = loader.encode(&value)?;
                *slot = Some(value);
                Ok(encoded)
            })
            .await?;

        match fresh {
            Some(value) => Ok(value),
            None => loader.decode(&raw),
        }
    }

    /// Resolve several keys of one loader, in request order
    pub async fn load_multi(
        &self,
        ctx: &CacheContext,
        loader: &Arc<dyn Loader>,
        keys: &[DomainKey],
    ) -> Result<LoadResults> {
        let request = BatchRequest::new().with(loader, keys.iter().cloned());
        let mut results = self.load_batch(ctx, &request).await?;
        Ok(results.shift_remove(loader.name()).unwrap_or_default())
    }

    /// Resolve the keys of several loaders with a single cache round trip
    ///
    /// Every requested key has an entry in the results, `None` when the source
    /// has no value for it. Loaders requested with no keys get an empty result
    /// and cost nothing.
    pub async fn load_batch(&self, ctx: &CacheContext, request: &BatchRequest) -> Result<BatchResults> {
        let mut results = BatchResults::with_capacity(request.len());
        let mut reverse: HashMap<CacheKey, (usize, DomainKey)> = HashMap::new();
        let mut cache_keys = Vec::new();

        for (index, (name, entry)) in request.entries.iter().enumerate() {
            results.insert(name.clone(), LoadResults::new());
            for key in &entry.keys {
                let cache_key = entry.loader.cache_key(key);
                if !reverse.contains_key(&cache_key) {
                    reverse.insert(cache_key.clone(), (index, key.clone()));
                    cache_keys.push(cache_key);
                }
            }
        }

        if cache_keys.is_empty() {
            return Ok(results);
        }

        debug!(
            "load_batch: {} keys across {} loaders",
            cache_keys.len(),
            request.len()
        );

        let mut fresh: HashMap<CacheKey, Loaded> = HashMap::new();
        let fresh_slot = &mut fresh;
        let reverse = &reverse;

        let raw = self
            .fetcher
            .fetch_multi(ctx, &cache_keys, move |missing| async move {
                let mut by_loader: IndexMap<usize, Vec<(CacheKey, DomainKey)>> = IndexMap::new();
                for cache_key in missing {
                    if let Some((index, key)) = reverse.get(&cache_key) {
                        by_loader
                            .entry(*index)
                            .or_default()
                            .push((cache_key, key.clone()));
                    }
                }

                let mut encoded = IndexMap::new();
                for (index, pairs) in by_loader {
                    let Some((name, entry)) = request.entries.get_index(index) else {
                        continue;
                    };
                    let keys: Vec<DomainKey> = pairs.iter().map(|(_, key)| key.clone()).collect();
                    debug!("Loading {} missing keys from {}", keys.len(), name);

                    let mut loaded = entry.loader.load_multi(&keys).await?;
                    for (cache_key, key) in pairs {
                        let value = loaded.shift_remove(&key).flatten();
                        encoded.insert(cache_key.clone(), entry.loader.encode(&value)?);
                        fresh_slot.insert(cache_key, value);
                    }
                }
                Ok(encoded)
            })
            .await?;

        for (name, entry) in request.entries.iter() {
            let mut loaded = LoadResults::with_capacity(entry.keys.len());
            for key in &entry.keys {
                let cache_key = entry.loader.cache_key(key);
                let value = match fresh.get(&cache_key) {
                    Some(value) => value.clone(),
                    None => match raw.get(&cache_key) {
                        Some(encoded) => entry.loader.decode(encoded)?,
                        None => None,
                    },
                };
                loaded.insert(key.clone(), value);
            }
            results.insert(name.clone(), loaded);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{config::CacheConfig, store::MemoryBackend};
    use crate::loader::{
        loaders::{AttributeLoader, KeySpace, PrimaryIndexLoader},
        record::{Cached, Record},
        source::MemorySource,
    };

    struct Fixture {
        backend: MemoryBackend,
        source: Arc<MemorySource>,
        key_loader: CacheKeyLoader,
        posts: Arc<dyn Loader>,
        titles: Arc<dyn Loader>,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(MemorySource::new());
        for id in 1..=3 {
            source.insert(
                "posts",
                Record::new(id).with("title", format!("post {}", id)).with("slug", format!("p{}", id)),
            );
        }
        let backend = MemoryBackend::new();
        let fetcher = CacheFetcher::new(Arc::new(backend.clone()), CacheConfig::default()).unwrap();
        let space = KeySpace::new("IDC:1", "v1");
        let posts: Arc<dyn Loader> = Arc::new(PrimaryIndexLoader::new(source.clone(), space.clone(), "Post", "posts"));
        let titles: Arc<dyn Loader> = Arc::new(AttributeLoader::new(
            source.clone(),
            space,
            "Post",
            "posts",
            "title",
            vec!["slug".to_string()],
        ));

        Fixture {
            backend,
            source,
            key_loader: CacheKeyLoader::new(Arc::new(fetcher)),
            posts,
            titles,
        }
    }

    #[tokio::test]
    async fn test_load_fills_then_hits() {
        let f = fixture();
        let ctx = CacheContext::default();

        let first = f.key_loader.load(&ctx, &*f.posts, &1.into()).await.unwrap();
        let second = f.key_loader.load(&ctx, &*f.posts, &1.into()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.source.query_count(), 1);
    }

    #[tokio::test]
    async fn test_load_batch_is_one_cache_round_trip() {
        let f = fixture();
        let ctx = CacheContext::default();
        let request = BatchRequest::new()
            .with(&f.posts, vec![2.into(), 9.into(), 1.into()])
            .with(&f.titles, vec!["p3".into()]);

        let results = f.key_loader.load_batch(&ctx, &request).await.unwrap();

        let posts = &results["Post"];
        let order: Vec<_> = posts.keys().cloned().collect();
        assert_eq!(order, vec![DomainKey::Int(2), DomainKey::Int(9), DomainKey::Int(1)]);
        assert!(posts[&DomainKey::Int(9)].is_none());
        assert_eq!(
            results["Post.title_by_slug"][&DomainKey::from("p3")],
            Some(Cached::Attribute("post 3".into()))
        );

        assert_eq!(f.backend.stats().await.reads, 1);
        assert_eq!(f.source.query_count(), 2);
    }

    #[tokio::test]
    async fn test_absent_values_are_cached() {
        let f = fixture();
        let ctx = CacheContext::default();

        for _ in 0..2 {
            let results = f.key_loader.load_multi(&ctx, &f.posts, &[42.into()]).await.unwrap();
            assert_eq!(results[&DomainKey::Int(42)], None);
        }
        assert_eq!(f.source.query_count(), 1);
    }

    #[tokio::test]
    async fn test_string_key_does_not_shadow_int_key() {
        let f = fixture();
        let ctx = CacheContext::default();

        let missing = f.key_loader.load(&ctx, &*f.posts, &"1".into()).await.unwrap();
        assert!(missing.is_none());
        let found = f.key_loader.load(&ctx, &*f.posts, &1.into()).await.unwrap();
        assert_eq!(found.and_then(Cached::into_record).unwrap().id, DomainKey::Int(1));

        let request = BatchRequest::new().with(&f.posts, vec!["2".into(), 2.into()]);
        let results = f.key_loader.load_batch(&ctx, &request).await.unwrap();
        assert_eq!(results["Post"].len(), 2);
        assert!(results["Post"][&DomainKey::from("2")].is_none());
        assert!(results["Post"][&DomainKey::Int(2)].is_some());
    }

    #[tokio::test]
    async fn test_empty_request_short_circuits() {
        let f = fixture();
        let request = BatchRequest::new().with(&f.posts, Vec::new());

        let results = f.key_loader.load_batch(&CacheContext::default(), &request).await.unwrap();

        assert!(results["Post"].is_empty());
        assert_eq!(f.backend.stats().await.reads, 0);
    }

    #[test]
    fn test_batch_request_merges_keys_per_loader() {
        let f = fixture();
        let mut request = BatchRequest::new();
        request.add(&f.posts, vec![1.into(), 2.into()]);
        request.add(&f.posts, vec![2.into(), 3.into()]);

        assert_eq!(request.len(), 1);
        assert_eq!(
            request.get("Post").unwrap().keys,
            vec![DomainKey::Int(1), DomainKey::Int(2), DomainKey::Int(3)]
        );
        assert_eq!(request.key_count(), 3);
    }
}
