//! Cache key construction
//!
//! Every key is `{namespace}:{kind}:{segments...}:{identifier}`. The
//! namespace is an opaque, versioned prefix supplied by the caller; bumping it
//! orphans every existing entry at once.

use crate::cache::types::CacheKey;
use serde::{Deserialize, Serialize};

/// Kind of value a key addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Record blob looked up by primary key
    Blob,

    /// Attribute value looked up by an indexed key
    Attribute,

    /// Ids of associated records
    AssociationIds,

    /// Associated records stored with their parent
    Embedded,

    /// Custom key kind
    Custom(String),
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Blob => write!(f, "blob"),
            KeyKind::Attribute => write!(f, "attr"),
            KeyKind::AssociationIds => write!(f, "ids"),
            KeyKind::Embedded => write!(f, "embed"),
            KeyKind::Custom(s) => write!(f, "custom:{}", s),
        }
    }
}

/// Cache key builder
pub struct CacheKeyBuilder {
    namespace: String,
    kind: KeyKind,
    segments: Vec<String>,
    identifier: String,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(namespace: impl Into<String>, kind: KeyKind) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            segments: Vec::new(),
            identifier: String::new(),
        }
    }

    /// Append a path segment (entity name, attribute, schema version...)
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Set the identifier, always the last component
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}:{}", self.namespace, self.kind);
        for segment in &self.segments {
            key.push(':');
            key.push_str(segment);
        }
        key.push(':');
        key.push_str(&self.identifier);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_kind_display() {
        assert_eq!(format!("{}", KeyKind::Blob), "blob");
        assert_eq!(format!("{}", KeyKind::Attribute), "attr");
        assert_eq!(format!("{}", KeyKind::AssociationIds), "ids");
        assert_eq!(
            format!("{}", KeyKind::Custom("test".to_string())),
            "custom:test"
        );
    }

    #[test]
    fn test_cache_key_builder() {
        let key = CacheKeyBuilder::new("IDC:1", KeyKind::Blob)
            .segment("Item")
            .segment("v3")
            .identifier("42")
            .build();
        assert_eq!(key, "IDC:1:blob:Item:v3:42");

        let key = CacheKeyBuilder::new("IDC:1", KeyKind::Attribute)
            .segment("Item")
            .segment("title")
            .identifier("[\"a\",1]")
            .build();
        assert!(key.starts_with("IDC:1:attr:Item:title:"));
    }

    #[test]
    fn test_namespace_change_changes_every_key() {
        let old = CacheKeyBuilder::new("IDC:1", KeyKind::Blob).identifier("1").build();
        let new = CacheKeyBuilder::new("IDC:2", KeyKind::Blob).identifier("1").build();
        assert_ne!(old, new);
    }
}
