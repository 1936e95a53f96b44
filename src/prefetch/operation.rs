//! Depth-leveled execution plan for relationship prefetching
//!
//! An [`Operation`] places one [`Segment`] per requested relationship into
//! the [`Batch`] of its depth. Batches run in depth order; each one loads all
//! of its segments, then asks the strategy to flush, so under [`Lazy`] a
//! whole level costs one batched round trip no matter how many parents or
//! relationships feed into it.
//!
//! [`Lazy`]: crate::strategy::Lazy

use crate::error::{CacheError, Result};
use crate::loader::{Cached, DomainKey, Loader, Record};
use crate::prefetch::registry::{Relationship, RelationshipKind, RelationshipRegistry};
use crate::prefetch::spec::RelationSpec;
use crate::strategy::{LoadScheduler, LoadStrategy};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefetch plan for one set of root records
pub struct Operation {
    entity: String,
    roots: Arc<Vec<Record>>,
    batches: BTreeMap<usize, Batch>,
    segments: IndexMap<String, Arc<Segment>>,
}

impl Operation {
    /// Build the plan of `spec` for `roots` of `entity`
    ///
    /// Fails with [`CacheError::InvalidSpec`] on relationship names the
    /// registry does not know; nothing is loaded in that case.
    pub fn build(
        registry: &RelationshipRegistry,
        entity: &str,
        spec: &RelationSpec,
        roots: Vec<Record>,
    ) -> Result<Self> {
        if registry.entity(entity).is_none() {
            return Err(CacheError::InvalidArgument(format!("unknown entity {}", entity)));
        }

        let mut operation = Self {
            entity: entity.to_string(),
            roots: Arc::new(roots),
            batches: BTreeMap::new(),
            segments: IndexMap::new(),
        };
        let input = SegmentInput::Root(operation.roots.clone());
        operation.plan(registry, entity, spec, &input, None, 0)?;

        debug!(
            "Planned prefetch of {} for {} roots: {} segments over {} levels",
            entity,
            operation.roots.len(),
            operation.segments.len(),
            operation.batches.len()
        );
        Ok(operation)
    }

    fn plan(
        &mut self,
        registry: &RelationshipRegistry,
        entity: &str,
        spec: &RelationSpec,
        input: &SegmentInput,
        prefix: Option<&str>,
        depth: usize,
    ) -> Result<()> {
        match spec {
            RelationSpec::Name(name) => {
                self.add_segment(registry, entity, name, input, prefix, depth)?;
            }
            RelationSpec::List(items) => {
                for item in items {
                    self.plan(registry, entity, item, input, prefix, depth)?;
                }
            }
            RelationSpec::Nested(map) => {
                for (name, sub) in map {
                    let segment = self.add_segment(registry, entity, name, input, prefix, depth)?;
                    let child_input = SegmentInput::Parent(segment.state.clone());
                    self.plan(
                        registry,
                        &segment.relationship.target_entity,
                        sub,
                        &child_input,
                        Some(segment.path.as_str()),
                        depth + 1,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn add_segment(
        &mut self,
        registry: &RelationshipRegistry,
        entity: &str,
        name: &str,
        input: &SegmentInput,
        prefix: Option<&str>,
        depth: usize,
    ) -> Result<Arc<Segment>> {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        };
        if let Some(existing) = self.segments.get(&path) {
            return Ok(existing.clone());
        }

        let relationship = registry
            .relationship(entity, name)
            .ok_or_else(|| CacheError::InvalidSpec(format!("{} has no relationship named {}", entity, name)))?;

        let segment = Arc::new(Segment::new(path.clone(), relationship, input.clone()));
        self.batches.entry(depth).or_default().segments.push(segment.clone());
        self.segments.insert(path, segment.clone());
        Ok(segment)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn roots(&self) -> &[Record] {
        &self.roots
    }

    /// Number of depth levels
    pub fn depth(&self) -> usize {
        self.batches.len()
    }

    pub fn batch(&self, depth: usize) -> Option<&Batch> {
        self.batches.get(&depth)
    }

    pub fn segment(&self, path: &str) -> Option<&Arc<Segment>> {
        self.segments.get(path)
    }

    /// Run every batch in depth order
    pub async fn execute(self, strategy: &mut dyn LoadStrategy) -> Result<PrefetchResult> {
        info!(
            "Prefetching {} levels for {} {} records",
            self.batches.len(),
            self.roots.len(),
            self.entity
        );

        for (depth, batch) in &self.batches {
            debug!("Loading level {} ({} segments)", depth, batch.len());
            batch.load(strategy).await?;
            strategy.load_now().await?;
            batch.finish();
        }

        Ok(PrefetchResult {
            segments: self
                .segments
                .iter()
                .map(|(path, segment)| (path.clone(), segment.state.by_parent.lock().clone()))
                .collect(),
        })
    }
}

/// Segments sharing one depth level
#[derive(Default)]
pub struct Batch {
    segments: Vec<Arc<Segment>>,
}

impl Batch {
    /// Ask every segment to load through `strategy`
    pub async fn load(&self, strategy: &mut dyn LoadStrategy) -> Result<()> {
        for segment in &self.segments {
            segment.load(strategy).await?;
        }
        Ok(())
    }

    fn finish(&self) {
        for segment in &self.segments {
            segment.state.complete.store(true, Ordering::SeqCst);
        }
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Where a segment takes its parent records from
#[derive(Clone)]
pub enum SegmentInput {
    Root(Arc<Vec<Record>>),
    Parent(Arc<SegmentState>),
}

impl SegmentInput {
    fn records(&self) -> Result<Arc<Vec<Record>>> {
        match self {
            SegmentInput::Root(records) => Ok(records.clone()),
            SegmentInput::Parent(state) => state.records(),
        }
    }
}

/// One relationship loaded for one set of parent records
pub struct Segment {
    path: String,
    relationship: Arc<Relationship>,
    input: SegmentInput,
    state: Arc<SegmentState>,
}

impl Segment {
    fn new(path: String, relationship: Arc<Relationship>, input: SegmentInput) -> Self {
        let state = Arc::new(SegmentState::new(path.clone()));
        Self {
            path,
            relationship,
            input,
            state,
        }
    }

    /// Dotted relationship path from the roots, e.g. `comments.author`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn relationship(&self) -> &Relationship {
        &self.relationship
    }

    /// Register the loads of this segment with `strategy`
    pub async fn load(&self, strategy: &mut dyn LoadStrategy) -> Result<()> {
        let parents = self.input.records()?;
        let relationship = self.relationship.clone();
        let state = self.state.clone();

        strategy
            .lazy_load(Box::new(move |scheduler| {
                for parent in parents.iter() {
                    schedule(scheduler, &relationship, &state, parent)?;
                }
                Ok(())
            }))
            .await
    }

    /// Loaded records, available once the segment's level has completed
    pub fn records(&self) -> Result<Arc<Vec<Record>>> {
        self.state.records()
    }
}

fn schedule(
    scheduler: &mut dyn LoadScheduler,
    relationship: &Relationship,
    state: &Arc<SegmentState>,
    parent: &Record,
) -> Result<()> {
    let parent_id = parent.id.clone();
    state.start(&parent_id);

    match &relationship.kind {
        RelationshipKind::BelongsTo { foreign_key, target } => {
            let Some(target_id) = parent.field_key(foreign_key) else {
                return Ok(());
            };
            let state = state.clone();
            scheduler.load(
                target.clone(),
                target_id,
                Box::new(move |_, loaded| {
                    state.extend(&parent_id, loaded.map(Cached::into_records).unwrap_or_default());
                    Ok(())
                }),
            )
        }
        RelationshipKind::HasManyIds { ids, target, ids_field } => {
            // Ids carried by the parent skip the extra round through the ids loader
            if let Some(child_ids) = ids_field.as_deref().and_then(|field| embedded_ids(parent, field)) {
                return schedule_children(scheduler, target.clone(), child_ids, state.clone(), parent_id);
            }

            let state = state.clone();
            let target = target.clone();
            scheduler.load(
                ids.clone(),
                parent_id.clone(),
                Box::new(move |scheduler, loaded| {
                    let child_ids = loaded.map(Cached::into_ids).unwrap_or_default();
                    schedule_children(scheduler, target, child_ids, state, parent_id)
                }),
            )
        }
        RelationshipKind::Embedded { loader } => {
            let state = state.clone();
            scheduler.load(
                loader.clone(),
                parent_id.clone(),
                Box::new(move |_, loaded| {
                    state.extend(&parent_id, loaded.map(Cached::into_records).unwrap_or_default());
                    Ok(())
                }),
            )
        }
    }
}

fn schedule_children(
    scheduler: &mut dyn LoadScheduler,
    target: Arc<dyn Loader>,
    child_ids: Vec<DomainKey>,
    state: Arc<SegmentState>,
    parent_id: DomainKey,
) -> Result<()> {
    if child_ids.is_empty() {
        return Ok(());
    }
    scheduler.load_multi(
        target,
        child_ids,
        Box::new(move |_, results| {
            let records = results.into_values().flatten().flat_map(Cached::into_records);
            state.extend(&parent_id, records.collect());
            Ok(())
        }),
    )
}

/// Child ids stored on the parent under `field`; `None` unless every entry is a valid key
fn embedded_ids(parent: &Record, field: &str) -> Option<Vec<DomainKey>> {
    match parent.get(field)? {
        Value::Array(items) => items.iter().map(DomainKey::from_json).collect(),
        _ => None,
    }
}

/// Records a segment collected, grouped by parent id
pub struct SegmentState {
    path: String,
    by_parent: Mutex<IndexMap<DomainKey, Vec<Record>>>,
    complete: AtomicBool,
    records: Mutex<Option<Arc<Vec<Record>>>>,
}

impl SegmentState {
    fn new(path: String) -> Self {
        Self {
            path,
            by_parent: Mutex::new(IndexMap::new()),
            complete: AtomicBool::new(false),
            records: Mutex::new(None),
        }
    }

    fn start(&self, parent: &DomainKey) {
        self.by_parent.lock().entry(parent.clone()).or_default();
    }

    fn extend(&self, parent: &DomainKey, records: Vec<Record>) {
        self.by_parent.lock().entry(parent.clone()).or_default().extend(records);
    }

    /// Distinct records across all parents, memoized
    pub fn records(&self) -> Result<Arc<Vec<Record>>> {
        if !self.complete.load(Ordering::SeqCst) {
            return Err(CacheError::Other(format!(
                "records of segment {} requested before its load completed",
                self.path
            )));
        }

        let mut memo = self.records.lock();
        if let Some(records) = memo.as_ref() {
            return Ok(records.clone());
        }

        let mut seen = IndexSet::new();
        let records: Vec<Record> = self
            .by_parent
            .lock()
            .values()
            .flatten()
            .filter(|record| seen.insert(record.id.clone()))
            .cloned()
            .collect();
        let records = Arc::new(records);
        *memo = Some(records.clone());
        Ok(records)
    }
}

/// Outcome of a prefetch: related records per segment path and parent id
#[derive(Debug, Clone, Default)]
pub struct PrefetchResult {
    segments: IndexMap<String, IndexMap<DomainKey, Vec<Record>>>,
}

impl PrefetchResult {
    /// Records related to `parent` through the segment at `path`
    pub fn get(&self, path: &str, parent: &DomainKey) -> Option<&[Record]> {
        self.segments
            .get(path)
            .and_then(|by_parent| by_parent.get(parent))
            .map(Vec::as_slice)
    }

    /// Every record loaded at `path`, in parent order
    pub fn records(&self, path: &str) -> Vec<&Record> {
        self.segments
            .get(path)
            .map(|by_parent| by_parent.values().flatten().collect())
            .unwrap_or_default()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
