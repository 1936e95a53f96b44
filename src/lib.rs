//! # Ouroboros Cache (ouroboros-cache)
//!
//! A read-through cache engine for records, attributes and associations kept
//! in a slower source of truth, with stampede protection and batched
//! relationship prefetching.
//!
//! ## Features
//!
//! - Stampede-safe fetches: fill locks, delete markers and CAS fills
//! - Batched resolution of keys from many loaders with one cache read
//! - Eager and lazy load scheduling behind one strategy trait
//! - Relationship trees prefetched with one batched round trip per level
//! - Graceful degradation to source reads when the cache backend is down
//! - Async-first design using tokio
//!
//! ## Fetching Through the Cache
//!
//! ```no_run
//! use ouroboros_cache::cache::{CacheConfig, CacheContext, CacheFetcher, MemoryBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ouroboros_cache::Result<()> {
//!     let fetcher = CacheFetcher::new(Arc::new(MemoryBackend::new()), CacheConfig::contended())?;
//!     let ctx = CacheContext::default();
//!
//!     let value = fetcher
//!         .fetch(&ctx, "IDC:1:blob:User:v1:1", || async { Ok("{\"name\":\"ada\"}".to_string()) })
//!         .await?;
//!     println!("Cached value: {}", value);
//!     Ok(())
//! }
//! ```
//!
//! ## Prefetching Relationships
//!
//! Entities, attributes and relationships are registered once; each
//! [`EntityCache`] then fetches, prefetches and expires records.
//!
//! ```no_run
//! use ouroboros_cache::cache::{CacheConfig, CacheContext, MemoryBackend};
//! use ouroboros_cache::loader::{AssociationIdsLoader, KeySpace, Loader, MemorySource, PrimaryIndexLoader};
//! use ouroboros_cache::prefetch::{RelationSpec, Relationship, RelationshipRegistry};
//! use ouroboros_cache::CacheEngine;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(MemorySource::new());
//!     let space = KeySpace::new("IDC:1", "v1");
//!
//!     let posts: Arc<dyn Loader> = Arc::new(
//!         PrimaryIndexLoader::new(source.clone(), space.clone(), "Post", "posts")
//!             .with_child_ids("comment_ids", "comments", "post_id"),
//!     );
//!     let comments: Arc<dyn Loader> =
//!         Arc::new(PrimaryIndexLoader::new(source.clone(), space.clone(), "Comment", "comments"));
//!     let comment_ids: Arc<dyn Loader> = Arc::new(AssociationIdsLoader::new(
//!         source.clone(), space, "Post", "comments", "comments", "post_id",
//!     ));
//!
//!     let mut registry = RelationshipRegistry::new();
//!     registry.register_entity("Post", posts.clone())?;
//!     registry.register_entity("Comment", comments.clone())?;
//!     registry.register_relationship(
//!         "Post",
//!         Relationship::has_many_ids("comments", "Comment", comment_ids, comments).with_ids_field("comment_ids"),
//!     )?;
//!
//!     let engine = CacheEngine::new(Arc::new(MemoryBackend::new()), CacheConfig::default(), registry)?;
//!     let posts = engine.entity("Post")?;
//!     let ctx = CacheContext::default();
//!
//!     let roots = posts.fetch_multi(&ctx, &[1.into(), 2.into()]).await?;
//!     let spec = RelationSpec::from_json(&json!(["comments"]))?;
//!     let result = posts.prefetch(&ctx, &spec, roots).await?;
//!     println!("Loaded {} comments", result.records("comments").len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod entity;
pub mod error;
pub mod loader;
pub mod prefetch;
pub mod strategy;

// Re-export main types for convenience
pub use cache::{
    CacheBackend, CacheConfig, CacheConfigBuilder, CacheContext, CacheEntry, CacheFetcher, CacheKey,
    CacheKeyBuilder, CacheStats, CacheValue, CasToken, FetchOptions, FillLock, KeyKind, MemoryBackend,
};
pub use entity::{CacheEngine, EntityCache};
pub use error::{BackendError, CacheError, Result};
pub use loader::{
    BatchRequest, BatchResults, Cached, CacheKeyLoader, DomainKey, LoadResults, Loaded, Loader, Record,
    RecordSource,
};
pub use prefetch::{Operation, PrefetchResult, RelationSpec, Relationship, RelationshipRegistry};
pub use strategy::{Eager, Lazy, LoadScheduler, LoadStrategy};
