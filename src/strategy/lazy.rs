//! Lazy strategy: accumulate loads, flush them one batch per round

use crate::cache::context::CacheContext;
use crate::error::Result;
use crate::loader::{
    key_loader::{BatchRequest, BatchResults, CacheKeyLoader},
    record::DomainKey,
    LoadResults, Loaded, Loader,
};
use crate::strategy::{pending::PendingLoads, LazyBlock, LoadCallback, LoadScheduler, LoadStrategy};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Strategy that defers every load until [`LoadStrategy::load_now`]
///
/// Each round drains the pending loads into one `load_batch` call and then
/// runs their callbacks; loads those callbacks register form the next round.
/// A traversal therefore costs one round trip per level, independent of how
/// many records each level has.
///
/// One instance serves one traversal; its pending loads are never shared.
pub struct Lazy {
    key_loader: Arc<CacheKeyLoader>,
    ctx: CacheContext,
    pending: PendingLoads,
    rounds: usize,
}

impl Lazy {
    pub fn new(key_loader: Arc<CacheKeyLoader>, ctx: CacheContext) -> Self {
        Self {
            key_loader,
            ctx,
            pending: PendingLoads::new(),
            rounds: 0,
        }
    }

    /// Number of batches flushed so far
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[async_trait]
impl LoadStrategy for Lazy {
    async fn load(&mut self, loader: Arc<dyn Loader>, key: DomainKey, callback: LoadCallback<Loaded>) -> Result<()> {
        self.pending.load(loader, key, callback)
    }

    async fn load_multi(
        &mut self,
        loader: Arc<dyn Loader>,
        keys: Vec<DomainKey>,
        callback: LoadCallback<LoadResults>,
    ) -> Result<()> {
        self.pending.load_multi(loader, keys, callback)
    }

    async fn load_batch(&mut self, request: BatchRequest, callback: LoadCallback<BatchResults>) -> Result<()> {
        self.pending.load_batch(request, callback)
    }

    async fn lazy_load(&mut self, block: LazyBlock) -> Result<()> {
        block(&mut self.pending)
    }

    async fn load_now(&mut self) -> Result<()> {
        while !self.pending.is_empty() {
            let round = std::mem::take(&mut self.pending);
            let request = round.batch_request();
            self.rounds += 1;
            debug!(
                "Lazy round {}: {} keys across {} loaders",
                self.rounds,
                request.key_count(),
                request.len()
            );

            let results = self.key_loader.load_batch(&self.ctx, &request).await?;
            round.complete(&mut self.pending, results)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{config::CacheConfig, fetcher::CacheFetcher, store::MemoryBackend};
    use crate::loader::{
        loaders::{KeySpace, PrimaryIndexLoader},
        record::{Cached, Record},
        source::MemorySource,
    };
    use crate::strategy::eager::Eager;
    use parking_lot::Mutex;

    struct Fixture {
        backend: MemoryBackend,
        key_loader: Arc<CacheKeyLoader>,
        users: Arc<dyn Loader>,
    }

    fn fixture() -> Fixture {
        let source = Arc::new(MemorySource::new());
        for id in 1..=4 {
            source.insert("users", Record::new(id).with("manager_id", id + 10));
            source.insert("users", Record::new(id + 10));
        }
        let backend = MemoryBackend::new();
        let fetcher = CacheFetcher::new(Arc::new(backend.clone()), CacheConfig::default()).unwrap();
        Fixture {
            backend,
            key_loader: Arc::new(CacheKeyLoader::new(Arc::new(fetcher))),
            users: Arc::new(PrimaryIndexLoader::new(source, KeySpace::new("IDC:1", "v1"), "User", "users")),
        }
    }

    /// Load users, then each user's manager from inside the callback
    async fn load_managers(strategy: &mut dyn LoadStrategy, users: Arc<dyn Loader>) -> Vec<DomainKey> {
        let managers = Arc::new(Mutex::new(Vec::new()));
        let sink = managers.clone();
        let manager_loader = users.clone();

        strategy
            .load_multi(
                users,
                (1..=4).map(DomainKey::Int).collect(),
                Box::new(move |scheduler, results| {
                    for loaded in results.into_values().flatten() {
                        let Some(manager_id) = loaded.into_record().and_then(|r| r.field_key("manager_id")) else {
                            continue;
                        };
                        let sink = sink.clone();
                        scheduler.load(
                            manager_loader.clone(),
                            manager_id,
                            Box::new(move |_, manager| {
                                if let Some(Cached::Record(record)) = manager {
                                    sink.lock().push(record.id);
                                }
                                Ok(())
                            }),
                        )?;
                    }
                    Ok(())
                }),
            )
            .await
            .unwrap();
        strategy.load_now().await.unwrap();

        let mut found = managers.lock().clone();
        found.sort();
        found
    }

    #[tokio::test]
    async fn test_lazy_flushes_one_batch_per_level() {
        let f = fixture();
        let mut lazy = Lazy::new(f.key_loader.clone(), CacheContext::default());

        let managers = load_managers(&mut lazy, f.users.clone()).await;

        assert_eq!(managers, (11..=14).map(DomainKey::Int).collect::<Vec<_>>());
        assert_eq!(lazy.rounds(), 2);
        assert!(!lazy.has_pending());
        assert_eq!(f.backend.stats().await.reads, 2);
    }

    #[tokio::test]
    async fn test_eager_and_lazy_agree() {
        let f = fixture();
        let mut eager = Eager::new(f.key_loader.clone(), CacheContext::default());
        let eager_managers = load_managers(&mut eager, f.users.clone()).await;
        assert_eq!(eager.loads(), 5);

        let g = fixture();
        let mut lazy = Lazy::new(g.key_loader.clone(), CacheContext::default());
        let lazy_managers = load_managers(&mut lazy, g.users.clone()).await;

        assert_eq!(eager_managers, lazy_managers);
    }

    #[tokio::test]
    async fn test_registration_performs_no_io() {
        let f = fixture();
        let mut lazy = Lazy::new(f.key_loader.clone(), CacheContext::default());

        lazy.load(f.users.clone(), 1.into(), Box::new(|_, _| Ok(())))
            .await
            .unwrap();

        assert!(lazy.has_pending());
        assert_eq!(f.backend.stats().await.reads, 0);
        assert_eq!(lazy.rounds(), 0);
    }

    #[tokio::test]
    async fn test_lazy_load_block_is_deferred() {
        let f = fixture();
        let mut lazy = Lazy::new(f.key_loader.clone(), CacheContext::default());
        let users = f.users.clone();
        let hits = Arc::new(Mutex::new(0));
        let sink = hits.clone();

        lazy.lazy_load(Box::new(move |scheduler| {
            for id in 1..=3 {
                let sink = sink.clone();
                scheduler.load(
                    users.clone(),
                    DomainKey::Int(id),
                    Box::new(move |_, loaded| {
                        if loaded.is_some() {
                            *sink.lock() += 1;
                        }
                        Ok(())
                    }),
                )?;
            }
            Ok(())
        }))
        .await
        .unwrap();
        assert_eq!(*hits.lock(), 0);

        lazy.load_now().await.unwrap();
        assert_eq!(*hits.lock(), 3);
        assert_eq!(lazy.rounds(), 1);
    }

    #[tokio::test]
    async fn test_callback_error_stops_flush() {
        let f = fixture();
        let mut lazy = Lazy::new(f.key_loader.clone(), CacheContext::default());

        lazy.load(
            f.users.clone(),
            1.into(),
            Box::new(|_, _| Err(crate::error::CacheError::Other("callback failed".to_string()))),
        )
        .await
        .unwrap();

        let err = lazy.load_now().await.unwrap_err();
        assert!(err.to_string().contains("callback failed"));
    }
}
