//! Pending loads of the lazy strategy
//!
//! Requests against the same loader are merged as they are registered, so a
//! scheduling round issues one batch with one key list per loader no matter
//! how many callers asked.

use crate::error::Result;
use crate::loader::{
    key_loader::{BatchRequest, BatchResults},
    record::DomainKey,
    LoadResults, Loaded, Loader,
};
use crate::strategy::{load_via_multi, split_batch, LoadCallback, LoadScheduler};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

/// Keys requested by one caller, with the callback awaiting them
pub struct LoadRequest {
    keys: Vec<DomainKey>,
    callback: LoadCallback<LoadResults>,
}

impl LoadRequest {
    pub fn new(keys: Vec<DomainKey>, callback: LoadCallback<LoadResults>) -> Self {
        Self { keys, callback }
    }

    pub fn keys(&self) -> &[DomainKey] {
        &self.keys
    }

    /// Hand this request its own keys, in its own order
    fn complete(self, scheduler: &mut dyn LoadScheduler, results: &LoadResults) -> Result<()> {
        let own: LoadResults = self
            .keys
            .iter()
            .map(|key| (key.clone(), results.get(key).cloned().flatten()))
            .collect();
        (self.callback)(scheduler, own)
    }
}

/// Several requests against one loader, loaded as the union of their keys
#[derive(Default)]
pub struct MultiLoadRequest {
    keys: IndexSet<DomainKey>,
    requests: Vec<LoadRequest>,
}

impl MultiLoadRequest {
    pub fn new(first: LoadRequest, second: LoadRequest) -> Self {
        let mut multi = Self::default();
        multi.push(first);
        multi.push(second);
        multi
    }

    pub fn push(&mut self, request: LoadRequest) {
        self.keys.extend(request.keys.iter().cloned());
        self.requests.push(request);
    }

    pub fn keys(&self) -> impl Iterator<Item = &DomainKey> {
        self.keys.iter()
    }

    /// Number of merged requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn complete(self, scheduler: &mut dyn LoadScheduler, results: &LoadResults) -> Result<()> {
        for request in self.requests {
            request.complete(scheduler, results)?;
        }
        Ok(())
    }
}

/// What is pending for one loader
pub enum PendingLoad {
    Single(LoadRequest),
    Multi(MultiLoadRequest),
}

impl PendingLoad {
    fn push(&mut self, request: LoadRequest) {
        let previous = std::mem::replace(self, PendingLoad::Multi(MultiLoadRequest::default()));
        *self = match previous {
            PendingLoad::Single(first) => PendingLoad::Multi(MultiLoadRequest::new(first, request)),
            PendingLoad::Multi(mut multi) => {
                multi.push(request);
                PendingLoad::Multi(multi)
            }
        };
    }

    /// Union of the requested keys, first occurrence first
    pub fn keys(&self) -> Vec<DomainKey> {
        match self {
            PendingLoad::Single(request) => request.keys.clone(),
            PendingLoad::Multi(multi) => multi.keys.iter().cloned().collect(),
        }
    }

    fn complete(self, scheduler: &mut dyn LoadScheduler, results: &LoadResults) -> Result<()> {
        match self {
            PendingLoad::Single(request) => request.complete(scheduler, results),
            PendingLoad::Multi(multi) => multi.complete(scheduler, results),
        }
    }
}

/// Loads registered since the last round, keyed by loader name
#[derive(Default)]
pub struct PendingLoads {
    loads: IndexMap<String, (Arc<dyn Loader>, PendingLoad)>,
}

impl PendingLoads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request, merging it with the one already pending for its loader
    pub fn register(&mut self, loader: Arc<dyn Loader>, request: LoadRequest) {
        match self.loads.get_mut(loader.name()) {
            Some((_, pending)) => pending.push(request),
            None => {
                self.loads
                    .insert(loader.name().to_string(), (loader, PendingLoad::Single(request)));
            }
        }
    }

    pub fn get(&self, loader_name: &str) -> Option<&PendingLoad> {
        self.loads.get(loader_name).map(|(_, pending)| pending)
    }

    /// Number of loaders with pending requests
    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// One batch covering every pending key
    pub fn batch_request(&self) -> BatchRequest {
        let mut request = BatchRequest::new();
        for (loader, pending) in self.loads.values() {
            request.add(loader, pending.keys());
        }
        request
    }

    /// Run every callback with its slice of `results`
    ///
    /// Loads the callbacks register land in `scheduler`, not in `self`.
    pub fn complete(self, scheduler: &mut dyn LoadScheduler, mut results: BatchResults) -> Result<()> {
        for (name, (_, pending)) in self.loads {
            let loaded = results.shift_remove(&name).unwrap_or_default();
            pending.complete(scheduler, &loaded)?;
        }
        Ok(())
    }
}

impl LoadScheduler for PendingLoads {
    fn load(&mut self, loader: Arc<dyn Loader>, key: DomainKey, callback: LoadCallback<Loaded>) -> Result<()> {
        load_via_multi(self, loader, key, callback)
    }

    fn load_multi(
        &mut self,
        loader: Arc<dyn Loader>,
        keys: Vec<DomainKey>,
        callback: LoadCallback<LoadResults>,
    ) -> Result<()> {
        self.register(loader, LoadRequest::new(keys, callback));
        Ok(())
    }

    fn load_batch(&mut self, request: BatchRequest, callback: LoadCallback<BatchResults>) -> Result<()> {
        split_batch(self, request, callback)
    }
}
