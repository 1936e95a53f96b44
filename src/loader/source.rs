//! Backing store seam
//!
//! The engine never runs queries itself; loaders go through a
//! [`RecordSource`] supplied by the collaborator.

use crate::loader::record::{DomainKey, Record};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Query interface of the source-of-truth datastore
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Rows of `table` whose primary key is in `ids`
    async fn find_by_ids(&self, table: &str, ids: &[DomainKey]) -> anyhow::Result<Vec<Record>>;

    /// Rows of `table` whose key over `fields` is in `keys`
    async fn find_by_fields(
        &self,
        table: &str,
        fields: &[String],
        keys: &[DomainKey],
    ) -> anyhow::Result<Vec<Record>>;
}

/// In-memory record source
///
/// Counts queries and can be switched into a failing mode, which makes it
/// the source of choice for tests and demos.
#[derive(Default)]
pub struct MemorySource {
    tables: RwLock<HashMap<String, IndexMap<DomainKey, Record>>>,
    queries: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row
    pub fn insert(&self, table: &str, record: Record) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(record.id.clone(), record);
    }

    pub fn remove(&self, table: &str, id: &DomainKey) -> Option<Record> {
        self.tables
            .write()
            .get_mut(table)
            .and_then(|rows| rows.shift_remove(id))
    }

    /// Number of queries served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    /// Make every query fail (`true`) or succeed again (`false`)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn begin_query(&self, table: &str) -> anyhow::Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("query on {} failed: source unavailable", table);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn find_by_ids(&self, table: &str, ids: &[DomainKey]) -> anyhow::Result<Vec<Record>> {
        self.begin_query(table)?;
        let tables = self.tables.read();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn find_by_fields(
        &self,
        table: &str,
        fields: &[String],
        keys: &[DomainKey],
    ) -> anyhow::Result<Vec<Record>> {
        self.begin_query(table)?;
        let wanted: HashSet<&DomainKey> = keys.iter().collect();
        let tables = self.tables.read();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .values()
            .filter(|row| row.fields_key(fields).is_some_and(|key| wanted.contains(&key)))
            .cloned()
            .collect())
    }
}
