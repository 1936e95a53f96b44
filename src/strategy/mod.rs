//! Load scheduling: run loads now (Eager) or coalesce them per round (Lazy)
//!
//! Callers describe a traversal as loads with completion callbacks. A callback
//! receives a [`LoadScheduler`] through which it can request the next loads,
//! which is how a relationship tree is walked one level after another.
//! Both strategies honor the same contract; they differ only in how many
//! cache round trips a traversal costs.

pub mod eager;
pub mod lazy;
pub mod pending;

pub use eager::Eager;
pub use lazy::Lazy;
pub use pending::{LoadRequest, MultiLoadRequest, PendingLoad, PendingLoads};

use crate::error::Result;
use crate::loader::{
    key_loader::{BatchRequest, BatchResults},
    record::DomainKey,
    LoadResults, Loaded, Loader,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Completion callback of a scheduled load
pub type LoadCallback<T> = Box<dyn FnOnce(&mut dyn LoadScheduler, T) -> Result<()> + Send>;

/// Deferred block handed to [`LoadStrategy::lazy_load`]
pub type LazyBlock = Box<dyn FnOnce(&mut dyn LoadScheduler) -> Result<()> + Send>;

/// Registration side of a strategy, usable from inside callbacks
///
/// Registration never performs I/O; the owning strategy decides when the
/// registered loads run.
pub trait LoadScheduler: Send {
    fn load(&mut self, loader: Arc<dyn Loader>, key: DomainKey, callback: LoadCallback<Loaded>) -> Result<()>;

    fn load_multi(
        &mut self,
        loader: Arc<dyn Loader>,
        keys: Vec<DomainKey>,
        callback: LoadCallback<LoadResults>,
    ) -> Result<()>;

    fn load_batch(&mut self, request: BatchRequest, callback: LoadCallback<BatchResults>) -> Result<()>;
}

/// Scheduling strategy driving a traversal
#[async_trait]
pub trait LoadStrategy: Send {
    /// Load one key and pass its value to `callback`
    async fn load(&mut self, loader: Arc<dyn Loader>, key: DomainKey, callback: LoadCallback<Loaded>) -> Result<()>;

    /// Load several keys of one loader
    async fn load_multi(
        &mut self,
        loader: Arc<dyn Loader>,
        keys: Vec<DomainKey>,
        callback: LoadCallback<LoadResults>,
    ) -> Result<()>;

    /// Load keys of several loaders
    async fn load_batch(&mut self, request: BatchRequest, callback: LoadCallback<BatchResults>) -> Result<()>;

    /// Run `block` with this strategy's scheduler
    async fn lazy_load(&mut self, block: LazyBlock) -> Result<()>;

    /// Run everything still pending, including loads registered by callbacks
    async fn load_now(&mut self) -> Result<()>;
}

/// Register a single-key load as a one-key multi load
pub(crate) fn load_via_multi(
    scheduler: &mut dyn LoadScheduler,
    loader: Arc<dyn Loader>,
    key: DomainKey,
    callback: LoadCallback<Loaded>,
) -> Result<()> {
    let wanted = key.clone();
    scheduler.load_multi(
        loader,
        vec![key],
        Box::new(move |scheduler, mut results| callback(scheduler, results.shift_remove(&wanted).flatten())),
    )
}

struct BatchCollector {
    remaining: usize,
    results: BatchResults,
    callback: Option<LoadCallback<BatchResults>>,
}

/// Register a batch as one multi load per loader
///
/// `callback` runs once the last of them completes, with results in the
/// loader order of `request`.
pub(crate) fn split_batch(
    scheduler: &mut dyn LoadScheduler,
    request: BatchRequest,
    callback: LoadCallback<BatchResults>,
) -> Result<()> {
    if request.is_empty() {
        return callback(scheduler, BatchResults::new());
    }

    let results = request
        .iter()
        .map(|(name, _)| (name.clone(), LoadResults::new()))
        .collect();
    let collector = Arc::new(Mutex::new(BatchCollector {
        remaining: request.len(),
        results,
        callback: Some(callback),
    }));

    for (name, entry) in request.iter() {
        let collector = collector.clone();
        let name = name.clone();
        scheduler.load_multi(
            entry.loader.clone(),
            entry.keys.clone(),
            Box::new(move |scheduler, loaded| {
                let finished = {
                    let mut collector = collector.lock();
                    collector.results.insert(name, loaded);
                    collector.remaining -= 1;
                    if collector.remaining == 0 {
                        let results = std::mem::take(&mut collector.results);
                        collector.callback.take().map(|callback| (callback, results))
                    } else {
                        None
                    }
                };
                match finished {
                    Some((callback, results)) => callback(scheduler, results),
                    None => Ok(()),
                }
            }),
        )?;
    }
    Ok(())
}
