//! Relationship specs: which relationships to prefetch, and how deep

use crate::error::{CacheError, Result};
use indexmap::IndexMap;
use serde_json::Value;

/// Tree of relationships to materialize
///
/// Accepted shapes are a single relationship name, a list of specs at the
/// same level, or a map from relationship name to the spec of its targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationSpec {
    Name(String),
    List(Vec<RelationSpec>),
    Nested(IndexMap<String, RelationSpec>),
}

impl RelationSpec {
    /// Parse a spec from JSON
    ///
    /// Strings are names, arrays are lists and objects are nested specs.
    /// Anything else is rejected before any loading happens.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => Self::checked_name(name).map(RelationSpec::Name),
            Value::Array(items) => items
                .iter()
                .map(Self::from_json)
                .collect::<Result<Vec<_>>>()
                .map(RelationSpec::List),
            Value::Object(map) => {
                let mut nested = IndexMap::with_capacity(map.len());
                for (name, sub) in map {
                    nested.insert(Self::checked_name(name)?, Self::from_json(sub)?);
                }
                Ok(RelationSpec::Nested(nested))
            }
            other => Err(CacheError::InvalidSpec(format!(
                "expected a relationship name, list or map, got {}",
                json_type(other)
            ))),
        }
    }

    pub fn name(name: impl Into<String>) -> Self {
        RelationSpec::Name(name.into())
    }

    /// List of sibling relationship names
    pub fn list<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RelationSpec::List(names.into_iter().map(|n| RelationSpec::Name(n.into())).collect())
    }

    /// Single relationship with a spec for its targets
    pub fn nested(name: impl Into<String>, sub: RelationSpec) -> Self {
        let mut map = IndexMap::new();
        map.insert(name.into(), sub);
        RelationSpec::Nested(map)
    }

    /// Deepest level this spec reaches, 1 for a single name
    pub fn depth(&self) -> usize {
        match self {
            RelationSpec::Name(_) => 1,
            RelationSpec::List(items) => items.iter().map(RelationSpec::depth).max().unwrap_or(0),
            RelationSpec::Nested(map) => map.values().map(|sub| 1 + sub.depth()).max().unwrap_or(0),
        }
    }

    fn checked_name(name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(CacheError::InvalidSpec("relationship name must not be empty".to_string()));
        }
        Ok(name.to_string())
    }
}

impl From<&str> for RelationSpec {
    fn from(name: &str) -> Self {
        RelationSpec::Name(name.to_string())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_all_shapes() {
        let spec = RelationSpec::from_json(&json!({
            "comments": ["author", {"likes": "user"}],
            "tags": []
        }))
        .unwrap();

        let expected = RelationSpec::Nested(IndexMap::from([
            (
                "comments".to_string(),
                RelationSpec::List(vec![
                    RelationSpec::name("author"),
                    RelationSpec::nested("likes", RelationSpec::name("user")),
                ]),
            ),
            ("tags".to_string(), RelationSpec::List(Vec::new())),
        ]));
        assert_eq!(spec, expected);
        assert_eq!(spec.depth(), 3);
    }

    #[test]
    fn test_reject_malformed_shapes() {
        for bad in [json!(42), json!(null), json!(true), json!(["ok", 1]), json!({"a": 2.5})] {
            let err = RelationSpec::from_json(&bad).unwrap_err();
            assert!(matches!(err, CacheError::InvalidSpec(_)), "accepted {}", bad);
        }
        assert!(RelationSpec::from_json(&json!("")).is_err());
    }

    #[test]
    fn test_constructors() {
        assert_eq!(RelationSpec::from("author"), RelationSpec::name("author"));
        assert_eq!(
            RelationSpec::list(["a", "b"]),
            RelationSpec::List(vec![RelationSpec::name("a"), RelationSpec::name("b")])
        );
        assert_eq!(RelationSpec::list(["a", "b"]).depth(), 1);
    }
}
