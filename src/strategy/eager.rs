//! Eager strategy: every load runs as soon as it is requested

use crate::cache::context::CacheContext;
use crate::error::Result;
use crate::loader::{
    key_loader::{BatchRequest, BatchResults, CacheKeyLoader},
    record::DomainKey,
    LoadResults, Loaded, Loader,
};
use crate::strategy::{LazyBlock, LoadCallback, LoadScheduler, LoadStrategy};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

enum Scheduled {
    One {
        loader: Arc<dyn Loader>,
        key: DomainKey,
        callback: LoadCallback<Loaded>,
    },
    Multi {
        loader: Arc<dyn Loader>,
        keys: Vec<DomainKey>,
        callback: LoadCallback<LoadResults>,
    },
    Batch {
        request: BatchRequest,
        callback: LoadCallback<BatchResults>,
    },
}

/// Loads requested from inside a callback, run right after it returns
#[derive(Default)]
struct EagerQueue {
    scheduled: Vec<Scheduled>,
}

impl LoadScheduler for EagerQueue {
    fn load(&mut self, loader: Arc<dyn Loader>, key: DomainKey, callback: LoadCallback<Loaded>) -> Result<()> {
        self.scheduled.push(Scheduled::One { loader, key, callback });
        Ok(())
    }

    fn load_multi(
        &mut self,
        loader: Arc<dyn Loader>,
        keys: Vec<DomainKey>,
        callback: LoadCallback<LoadResults>,
    ) -> Result<()> {
        self.scheduled.push(Scheduled::Multi { loader, keys, callback });
        Ok(())
    }

    fn load_batch(&mut self, request: BatchRequest, callback: LoadCallback<BatchResults>) -> Result<()> {
        self.scheduled.push(Scheduled::Batch { request, callback });
        Ok(())
    }
}

/// Strategy that resolves every request immediately
///
/// Each request costs its own cache round trip. Loads requested by a
/// callback run depth-first before the call that triggered them returns.
pub struct Eager {
    key_loader: Arc<CacheKeyLoader>,
    ctx: CacheContext,
    loads: usize,
}

impl Eager {
    pub fn new(key_loader: Arc<CacheKeyLoader>, ctx: CacheContext) -> Self {
        Self {
            key_loader,
            ctx,
            loads: 0,
        }
    }

    /// Number of key loader calls issued so far
    pub fn loads(&self) -> usize {
        self.loads
    }

    async fn drain(&mut self, queue: EagerQueue) -> Result<()> {
        let mut stack: Vec<Scheduled> = queue.scheduled.into_iter().rev().collect();

        while let Some(next) = stack.pop() {
            let mut follow_up = EagerQueue::default();
            self.execute(next, &mut follow_up).await?;
            stack.extend(follow_up.scheduled.into_iter().rev());
        }
        Ok(())
    }

    async fn execute(&mut self, scheduled: Scheduled, queue: &mut EagerQueue) -> Result<()> {
        self.loads += 1;
        match scheduled {
            Scheduled::One { loader, key, callback } => {
                let loaded = self.key_loader.load(&self.ctx, &*loader, &key).await?;
                callback(queue, loaded)
            }
            Scheduled::Multi { loader, keys, callback } => {
                let loaded = self.key_loader.load_multi(&self.ctx, &loader, &keys).await?;
                callback(queue, loaded)
            }
            Scheduled::Batch { request, callback } => {
                debug!("Eager batch over {} loaders", request.len());
                let loaded = self.key_loader.load_batch(&self.ctx, &request).await?;
                callback(queue, loaded)
            }
        }
    }
}

#[async_trait]
impl LoadStrategy for Eager {
    async fn load(&mut self, loader: Arc<dyn Loader>, key: DomainKey, callback: LoadCallback<Loaded>) -> Result<()> {
        let mut queue = EagerQueue::default();
        queue.load(loader, key, callback)?;
        self.drain(queue).await
    }

    async fn load_multi(
        &mut self,
        loader: Arc<dyn Loader>,
        keys: Vec<DomainKey>,
        callback: LoadCallback<LoadResults>,
    ) -> Result<()> {
        let mut queue = EagerQueue::default();
        queue.load_multi(loader, keys, callback)?;
        self.drain(queue).await
    }

    async fn load_batch(&mut self, request: BatchRequest, callback: LoadCallback<BatchResults>) -> Result<()> {
        let mut queue = EagerQueue::default();
        queue.load_batch(request, callback)?;
        self.drain(queue).await
    }

    async fn lazy_load(&mut self, block: LazyBlock) -> Result<()> {
        let mut queue = EagerQueue::default();
        block(&mut queue)?;
        self.drain(queue).await
    }

    async fn load_now(&mut self) -> Result<()> {
        Ok(())
    }
}
