//! Concrete loaders over a [`RecordSource`]

use crate::cache::key::{CacheKeyBuilder, KeyKind};
use crate::cache::types::CacheKey;
use crate::error::Result;
use crate::loader::{
    record::{Cached, DomainKey, Record},
    source::RecordSource,
    LoadResults, Loader,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Namespace and schema version shared by the keys of one loader
///
/// The schema version changes whenever the shape of the cached value does,
/// which moves the loader onto fresh keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    pub namespace: String,
    pub schema_version: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>, schema_version: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            schema_version: schema_version.into(),
        }
    }

    fn key(&self, kind: KeyKind, segments: &[&str], key: &DomainKey) -> CacheKey {
        let mut builder = CacheKeyBuilder::new(&self.namespace, kind);
        for segment in segments {
            builder = builder.segment(*segment);
        }
        builder
            .segment(&self.schema_version)
            .identifier(key.cache_identifier())
            .build()
    }
}

/// Record blobs by primary key
///
/// With [`with_child_ids`](Self::with_child_ids) each blob also carries the
/// ids of its children, so a has-many prefetch can go straight to the child
/// records.
pub struct PrimaryIndexLoader {
    name: String,
    entity: String,
    table: String,
    space: KeySpace,
    source: Arc<dyn RecordSource>,
    child_ids: Vec<ChildIds>,
}

struct ChildIds {
    field: String,
    table: String,
    foreign_key: Vec<String>,
}

impl PrimaryIndexLoader {
    pub fn new(
        source: Arc<dyn RecordSource>,
        space: KeySpace,
        entity: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let entity = entity.into();
        Self {
            name: entity.clone(),
            entity,
            table: table.into(),
            space,
            source,
            child_ids: Vec::new(),
        }
    }

    /// Store the ids of rows in `table` pointing at each record through
    /// `foreign_key` under the attribute `field`
    pub fn with_child_ids(
        mut self,
        field: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.child_ids.push(ChildIds {
            field: field.into(),
            table: table.into(),
            foreign_key: vec![foreign_key.into()],
        });
        self
    }
}

#[async_trait]
impl Loader for PrimaryIndexLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache_key(&self, key: &DomainKey) -> CacheKey {
        self.space.key(KeyKind::Blob, &[self.entity.as_str()], key)
    }

    async fn load_multi(&self, keys: &[DomainKey]) -> Result<LoadResults> {
        debug!("Loading {} {} records from {}", keys.len(), self.entity, self.table);
        let rows = self.source.find_by_ids(&self.table, keys).await?;
        let mut by_id: HashMap<DomainKey, Record> =
            rows.into_iter().map(|row| (row.id.clone(), row)).collect();

        if !by_id.is_empty() {
            let found: Vec<DomainKey> = keys.iter().filter(|key| by_id.contains_key(*key)).cloned().collect();
            for children in &self.child_ids {
                let mut grouped = group_by_parent(&*self.source, &children.table, &children.foreign_key, &found).await?;
                for (id, record) in by_id.iter_mut() {
                    let ids = grouped
                        .shift_remove(id)
                        .unwrap_or_default()
                        .iter()
                        .map(|row| row.id.to_json())
                        .collect();
                    record.attributes.insert(children.field.clone(), Value::Array(ids));
                }
            }
        }

        Ok(keys
            .iter()
            .map(|key| (key.clone(), by_id.remove(key).map(Cached::Record)))
            .collect())
    }
}

/// A single attribute looked up by one or more indexed fields
///
/// With several key fields the domain key is a composite of their values in
/// field order.
pub struct AttributeLoader {
    name: String,
    entity: String,
    table: String,
    attribute: String,
    key_fields: Vec<String>,
    space: KeySpace,
    source: Arc<dyn RecordSource>,
}

impl AttributeLoader {
    pub fn new(
        source: Arc<dyn RecordSource>,
        space: KeySpace,
        entity: impl Into<String>,
        table: impl Into<String>,
        attribute: impl Into<String>,
        key_fields: Vec<String>,
    ) -> Self {
        let entity = entity.into();
        let attribute = attribute.into();
        Self {
            name: format!("{}.{}_by_{}", entity, attribute, key_fields.join("_and_")),
            entity,
            table: table.into(),
            attribute,
            key_fields,
            space,
            source,
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

#[async_trait]
impl Loader for AttributeLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache_key(&self, key: &DomainKey) -> CacheKey {
        let fields = self.key_fields.join(",");
        self.space
            .key(KeyKind::Attribute, &[self.entity.as_str(), self.attribute.as_str(), fields.as_str()], key)
    }

    fn record_key(&self, record: &Record) -> Option<DomainKey> {
        record.fields_key(&self.key_fields)
    }

    async fn load_multi(&self, keys: &[DomainKey]) -> Result<LoadResults> {
        debug!(
            "Loading {} {}.{} values from {}",
            keys.len(),
            self.entity,
            self.attribute,
            self.table
        );
        let rows = self
            .source
            .find_by_fields(&self.table, &self.key_fields, keys)
            .await?;

        // First matching row wins, as with a unique index
        let mut values: HashMap<DomainKey, Value> = HashMap::new();
        for row in rows {
            if let Some(key) = row.fields_key(&self.key_fields) {
                values
                    .entry(key)
                    .or_insert_with(|| row.get(&self.attribute).cloned().unwrap_or(Value::Null));
            }
        }

        Ok(keys
            .iter()
            .map(|key| (key.clone(), values.remove(key).map(Cached::Attribute)))
            .collect())
    }
}

/// Ids of the records associated with a parent, keyed by parent id
///
/// A parent without children loads an empty id list, which is cached like
/// any other value.
pub struct AssociationIdsLoader {
    name: String,
    entity: String,
    association: String,
    table: String,
    foreign_key: Vec<String>,
    space: KeySpace,
    source: Arc<dyn RecordSource>,
}

impl AssociationIdsLoader {
    pub fn new(
        source: Arc<dyn RecordSource>,
        space: KeySpace,
        entity: impl Into<String>,
        association: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let entity = entity.into();
        let association = association.into();
        Self {
            name: format!("{}.{}_ids", entity, association),
            entity,
            association,
            table: table.into(),
            foreign_key: vec![foreign_key.into()],
            space,
            source,
        }
    }
}

#[async_trait]
impl Loader for AssociationIdsLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache_key(&self, key: &DomainKey) -> CacheKey {
        self.space
            .key(KeyKind::AssociationIds, &[self.entity.as_str(), self.association.as_str()], key)
    }

    async fn load_multi(&self, keys: &[DomainKey]) -> Result<LoadResults> {
        let children = group_by_parent(&*self.source, &self.table, &self.foreign_key, keys).await?;
        Ok(keys
            .iter()
            .map(|key| {
                let ids = children
                    .get(key)
                    .map(|rows| rows.iter().map(|row| row.id.clone()).collect())
                    .unwrap_or_default();
                (key.clone(), Some(Cached::Ids(ids)))
            })
            .collect())
    }
}

/// Associated records cached together under their parent id
pub struct EmbeddedAssociationLoader {
    name: String,
    entity: String,
    association: String,
    table: String,
    foreign_key: Vec<String>,
    space: KeySpace,
    source: Arc<dyn RecordSource>,
}

impl EmbeddedAssociationLoader {
    pub fn new(
        source: Arc<dyn RecordSource>,
        space: KeySpace,
        entity: impl Into<String>,
        association: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let entity = entity.into();
        let association = association.into();
        Self {
            name: format!("{}.{}", entity, association),
            entity,
            association,
            table: table.into(),
            foreign_key: vec![foreign_key.into()],
            space,
            source,
        }
    }
}

#[async_trait]
impl Loader for EmbeddedAssociationLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn cache_key(&self, key: &DomainKey) -> CacheKey {
        self.space
            .key(KeyKind::Embedded, &[self.entity.as_str(), self.association.as_str()], key)
    }

    async fn load_multi(&self, keys: &[DomainKey]) -> Result<LoadResults> {
        let mut children = group_by_parent(&*self.source, &self.table, &self.foreign_key, keys).await?;
        Ok(keys
            .iter()
            .map(|key| {
                let rows = children.shift_remove(key).unwrap_or_default();
                (key.clone(), Some(Cached::Records(rows)))
            })
            .collect())
    }
}

async fn group_by_parent(
    source: &dyn RecordSource,
    table: &str,
    foreign_key: &[String],
    parents: &[DomainKey],
) -> Result<IndexMap<DomainKey, Vec<Record>>> {
    debug!("Loading {} children for {} parents", table, parents.len());
    let rows = source.find_by_fields(table, foreign_key, parents).await?;

    let mut grouped: IndexMap<DomainKey, Vec<Record>> = IndexMap::new();
    for row in rows {
        if let Some(parent) = row.fields_key(foreign_key) {
            grouped.entry(parent).or_default().push(row);
        }
    }
    Ok(grouped)
}
