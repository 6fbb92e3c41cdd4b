//! Argument schema nodes: the subset of JSON Schema the binder reads, plus the
//! `x-` resolution hints.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::{BindError, BindResult};

/// Primitive or container type declared by a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl SchemaType {
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            SchemaType::String | SchemaType::Integer | SchemaType::Number | SchemaType::Boolean
        )
    }
}

/// `type` may be a single name or a list such as `["string", "null"]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum TypeDecl {
    One(SchemaType),
    Many(Vec<SchemaType>),
}

/// `x-aliases` accepts a single alias or a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum AliasDecl {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct RawNode {
    #[serde(rename = "type", default)]
    kind: Option<TypeDecl>,
    #[serde(default)]
    properties: BTreeMap<String, RawNode>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(rename = "x-path", default)]
    path: Option<String>,
    #[serde(rename = "x-aliases", default)]
    aliases: Option<AliasDecl>,
    #[serde(rename = "x-aliasPath", default)]
    alias_path: bool,
    #[serde(rename = "x-allowTailAlias", default)]
    allow_tail_alias: bool,
    #[serde(rename = "x-deepSearch", default)]
    deep_search: Option<bool>,
}

/// One node of an argument schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgSchemaNode {
    /// First non-null declared type, if any
    pub kind: Option<SchemaType>,
    pub properties: BTreeMap<String, ArgSchemaNode>,
    pub default: Option<Value>,
    /// `x-path`: explicit JSON pointer or dot path
    pub path: Option<String>,
    /// `x-aliases`
    pub aliases: Vec<String>,
    /// `x-aliasPath`: treat every alias as a path
    pub alias_path: bool,
    /// `x-allowTailAlias`: a path alias's last segment may match anywhere in a source
    pub allow_tail_alias: bool,
    /// `x-deepSearch`: `None` inherits from the parent
    pub deep_search: Option<bool>,
}

impl From<RawNode> for ArgSchemaNode {
    fn from(raw: RawNode) -> Self {
        let kind = match raw.kind {
            Some(TypeDecl::One(kind)) => Some(kind),
            Some(TypeDecl::Many(kinds)) => kinds
                .iter()
                .copied()
                .find(|k| *k != SchemaType::Null)
                .or(kinds.first().copied()),
            None => None,
        };
        let aliases = match raw.aliases {
            Some(AliasDecl::One(alias)) => vec![alias],
            Some(AliasDecl::Many(aliases)) => aliases,
            None => Vec::new(),
        };
        Self {
            kind,
            properties: raw
                .properties
                .into_iter()
                .map(|(name, node)| (name, node.into()))
                .collect(),
            default: raw.default,
            path: raw.path,
            aliases,
            alias_path: raw.alias_path,
            allow_tail_alias: raw.allow_tail_alias,
            deep_search: raw.deep_search,
        }
    }
}

impl ArgSchemaNode {
    /// Reads a schema node from JSON. Unknown keywords (`required`, `description`,
    /// `minimum`, ...) are ignored here; they matter to the prompt validator only.
    pub fn from_value(schema: &Value) -> BindResult<Self> {
        let raw = RawNode::deserialize(schema).map_err(|e| BindError::InvalidSchema {
            message: e.to_string(),
        })?;
        Ok(raw.into())
    }

    /// A node with its own `properties` is bound into a nested map.
    pub fn is_nested(&self) -> bool {
        !self.properties.is_empty()
    }

    /// Deep search flag after inheritance.
    pub fn effective_deep_search(&self, inherited: bool) -> bool {
        self.deep_search.unwrap_or(inherited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_reads_extension_keywords() {
        let node = ArgSchemaNode::from_value(&json!({
            "type": "object",
            "required": ["tag"],
            "properties": {
                "tag": {
                    "type": "string",
                    "x-path": "/topic/name",
                    "x-aliases": ["topicName", "question.tag"],
                    "x-aliasPath": true,
                    "x-allowTailAlias": true
                },
                "count": {"type": ["integer", "null"], "default": 3, "x-deepSearch": false}
            },
            "x-deepSearch": true
        }))
        .unwrap();

        assert_eq!(node.kind, Some(SchemaType::Object));
        assert_eq!(node.deep_search, Some(true));
        let tag = &node.properties["tag"];
        assert_eq!(tag.path.as_deref(), Some("/topic/name"));
        assert_eq!(tag.aliases, vec!["topicName", "question.tag"]);
        assert!(tag.alias_path);
        assert!(tag.allow_tail_alias);
        assert_eq!(tag.deep_search, None);
        let count = &node.properties["count"];
        assert_eq!(count.kind, Some(SchemaType::Integer));
        assert_eq!(count.default, Some(json!(3)));
        assert!(!count.effective_deep_search(true));
        assert!(tag.effective_deep_search(true));
    }

    #[test]
    fn test_single_alias_string() {
        let node = ArgSchemaNode::from_value(&json!({"x-aliases": "title"})).unwrap();
        assert_eq!(node.aliases, vec!["title"]);
        assert_eq!(node.kind, None);
    }

    #[test]
    fn test_invalid_schema() {
        let result = ArgSchemaNode::from_value(&json!({"type": "decimal"}));
        assert!(matches!(result, Err(BindError::InvalidSchema { .. })));
    }
}
