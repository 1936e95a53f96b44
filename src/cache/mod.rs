//! # Stampede-Safe Cache Layer
//!
//! This module implements the cache-consistency half of the engine: slot
//! contents, the backend abstraction and the fetcher that coordinates
//! clients sharing one backend.
//!
//! ## Features
//!
//! - **Fill Locks**: At most one client computes a missing key at a time
//! - **Delete Wins**: Invalidation markers defeat fills that started before them
//! - **Batched Fetches**: One read, one lock write and one fill for many keys
//! - **Read-Around on Outage**: Backend failures degrade to source reads
//! - **TTL-Based Expiration**: Per-slot expiry with optional jitter
//! - **LRU Eviction**: Bounded in-memory backend for tests and single processes
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_cache::cache::{CacheConfig, CacheContext, CacheFetcher, MemoryBackend};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> ouroboros_cache::Result<()> {
//! let config = CacheConfig::builder()
//!     .namespace("IDC:3")
//!     .fill_lock_duration(Duration::from_millis(100))
//!     .build();
//!
//! let fetcher = CacheFetcher::new(Arc::new(MemoryBackend::new()), config)?;
//! let ctx = CacheContext::default();
//!
//! let value = fetcher
//!     .fetch(&ctx, "IDC:3:blob:Item:1", || async { Ok("{\"id\":1}".to_string()) })
//!     .await?;
//! assert_eq!(value, "{\"id\":1}");
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod entry;
pub mod fetcher;
pub mod key;
pub mod store;
pub mod types;

pub use backend::{CacheBackend, CasOutcome, CasWrite, Versioned};
pub use config::{CacheConfig, CacheConfigBuilder, FetchOptions};
pub use context::{CacheContext, Memo};
pub use entry::{CacheEntry, FillLock, StoredEntry};
pub use fetcher::CacheFetcher;
pub use key::{CacheKeyBuilder, KeyKind};
pub use store::MemoryBackend;
pub use types::{CacheKey, CacheStats, CacheValue, CasToken};
