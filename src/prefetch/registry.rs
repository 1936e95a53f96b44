//! Registry of cacheable entities, attributes and relationships
//!
//! Everything is registered once at setup and looked up by name at call
//! time.

use crate::error::{CacheError, Result};
use crate::loader::Loader;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

/// How a relationship's records are found
#[derive(Clone)]
pub enum RelationshipKind {
    /// The parent holds the target's id in `foreign_key`
    BelongsTo {
        foreign_key: String,
        target: Arc<dyn Loader>,
    },

    /// Child ids are cached under the parent id, records under their own ids
    ///
    /// When `ids_field` is set and the parent record carries that array, the
    /// child records are loaded straight from it and `ids` is not consulted.
    HasManyIds {
        ids: Arc<dyn Loader>,
        target: Arc<dyn Loader>,
        ids_field: Option<String>,
    },

    /// Child records are cached together under the parent id
    Embedded { loader: Arc<dyn Loader> },
}

/// A named relationship from one entity to another
#[derive(Clone)]
pub struct Relationship {
    pub name: String,
    pub target_entity: String,
    pub kind: RelationshipKind,
}

impl Relationship {
    pub fn belongs_to(
        name: impl Into<String>,
        target_entity: impl Into<String>,
        foreign_key: impl Into<String>,
        target: Arc<dyn Loader>,
    ) -> Self {
        Self {
            name: name.into(),
            target_entity: target_entity.into(),
            kind: RelationshipKind::BelongsTo {
                foreign_key: foreign_key.into(),
                target,
            },
        }
    }

    pub fn has_many_ids(
        name: impl Into<String>,
        target_entity: impl Into<String>,
        ids: Arc<dyn Loader>,
        target: Arc<dyn Loader>,
    ) -> Self {
        Self {
            name: name.into(),
            target_entity: target_entity.into(),
            kind: RelationshipKind::HasManyIds {
                ids,
                target,
                ids_field: None,
            },
        }
    }

    /// Read child ids from the parent's `field` when present
    ///
    /// Pairs with [`PrimaryIndexLoader::with_child_ids`]; has no effect on
    /// other relationship kinds.
    ///
    /// [`PrimaryIndexLoader::with_child_ids`]: crate::loader::PrimaryIndexLoader::with_child_ids
    pub fn with_ids_field(mut self, field: impl Into<String>) -> Self {
        if let RelationshipKind::HasManyIds { ids_field, .. } = &mut self.kind {
            *ids_field = Some(field.into());
        }
        self
    }

    pub fn embedded(name: impl Into<String>, target_entity: impl Into<String>, loader: Arc<dyn Loader>) -> Self {
        Self {
            name: name.into(),
            target_entity: target_entity.into(),
            kind: RelationshipKind::Embedded { loader },
        }
    }

    /// Loader whose slots are keyed by the parent's id, if any
    pub fn parent_keyed_loader(&self) -> Option<&Arc<dyn Loader>> {
        match &self.kind {
            RelationshipKind::BelongsTo { .. } => None,
            RelationshipKind::HasManyIds { ids, .. } => Some(ids),
            RelationshipKind::Embedded { loader } => Some(loader),
        }
    }

    fn loaders(&self) -> Vec<&Arc<dyn Loader>> {
        match &self.kind {
            RelationshipKind::BelongsTo { target, .. } => vec![target],
            RelationshipKind::HasManyIds { ids, target, .. } => vec![ids, target],
            RelationshipKind::Embedded { loader } => vec![loader],
        }
    }
}

fn same_loader(a: &Arc<dyn Loader>, b: &Arc<dyn Loader>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl std::fmt::Debug for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            RelationshipKind::BelongsTo { .. } => "belongs_to",
            RelationshipKind::HasManyIds { .. } => "has_many_ids",
            RelationshipKind::Embedded { .. } => "embedded",
        };
        f.debug_struct("Relationship")
            .field("name", &self.name)
            .field("target_entity", &self.target_entity)
            .field("kind", &kind)
            .finish()
    }
}

/// Loaders and relationships of one entity
pub struct EntityDefinition {
    pub name: String,
    pub blob: Arc<dyn Loader>,
    pub attributes: IndexMap<String, Arc<dyn Loader>>,
    pub relationships: IndexMap<String, Arc<Relationship>>,
}

#[derive(Default)]
pub struct RelationshipRegistry {
    entities: IndexMap<String, EntityDefinition>,
    loaders: IndexMap<String, Arc<dyn Loader>>,
}

impl RelationshipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity with the loader of its record blobs
    pub fn register_entity(&mut self, name: impl Into<String>, blob: Arc<dyn Loader>) -> Result<()> {
        let name = name.into();
        if self.entities.contains_key(&name) {
            return Err(CacheError::InvalidArgument(format!("entity {} registered twice", name)));
        }
        self.check_loaders(&[&blob])?;
        self.claim_loaders(&[&blob]);
        debug!("Registering entity {} (blob loader {})", name, blob.name());
        self.entities.insert(
            name.clone(),
            EntityDefinition {
                name,
                blob,
                attributes: IndexMap::new(),
                relationships: IndexMap::new(),
            },
        );
        Ok(())
    }

    pub fn register_attribute(
        &mut self,
        entity: &str,
        attribute: impl Into<String>,
        loader: Arc<dyn Loader>,
    ) -> Result<()> {
        let attribute = attribute.into();
        if self.definition_mut(entity)?.attributes.contains_key(&attribute) {
            return Err(CacheError::InvalidArgument(format!(
                "attribute {}.{} registered twice",
                entity, attribute
            )));
        }
        self.check_loaders(&[&loader])?;
        self.claim_loaders(&[&loader]);
        self.definition_mut(entity)?.attributes.insert(attribute, loader);
        Ok(())
    }

    pub fn register_relationship(&mut self, entity: &str, relationship: Relationship) -> Result<()> {
        if self.definition_mut(entity)?.relationships.contains_key(&relationship.name) {
            return Err(CacheError::InvalidArgument(format!(
                "relationship {}.{} registered twice",
                entity, relationship.name
            )));
        }
        let loaders = relationship.loaders();
        self.check_loaders(&loaders)?;
        self.claim_loaders(&loaders);
        debug!("Registering relationship {}.{}", entity, relationship.name);
        self.definition_mut(entity)?
            .relationships
            .insert(relationship.name.clone(), Arc::new(relationship));
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.get(name)
    }

    pub fn relationship(&self, entity: &str, name: &str) -> Option<Arc<Relationship>> {
        self.entities
            .get(entity)
            .and_then(|definition| definition.relationships.get(name))
            .cloned()
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Loader registered under `name`, if any
    pub fn loader(&self, name: &str) -> Option<&Arc<dyn Loader>> {
        self.loaders.get(name)
    }

    /// Fails if a different loader already uses one of the names
    fn check_loaders(&self, loaders: &[&Arc<dyn Loader>]) -> Result<()> {
        for (i, loader) in loaders.iter().enumerate() {
            let clash = self
                .loaders
                .get(loader.name())
                .into_iter()
                .chain(loaders[..i].iter().copied().filter(|other| other.name() == loader.name()))
                .any(|other| !same_loader(other, loader));
            if clash {
                return Err(CacheError::InvalidArgument(format!(
                    "loader name {} is already used by a different loader",
                    loader.name()
                )));
            }
        }
        Ok(())
    }

    fn claim_loaders(&mut self, loaders: &[&Arc<dyn Loader>]) {
        for loader in loaders {
            self.loaders
                .entry(loader.name().to_string())
                .or_insert_with(|| Arc::clone(*loader));
        }
    }

    fn definition_mut(&mut self, entity: &str) -> Result<&mut EntityDefinition> {
        self.entities
            .get_mut(entity)
            .ok_or_else(|| CacheError::InvalidArgument(format!("unknown entity {}", entity)))
    }
}
