//! Binding sources and their normalized, searchable form.
//!
//! A [`Source`] is one caller-supplied input: raw text, an already structured JSON
//! tree, or a projection of a domain object ([`SourceView`]). Each source is
//! normalized into a [`SourceNode`] once per bind call and never mutated afterwards.

use std::collections::VecDeque;

use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;

use super::{
    BindError, BindResult, naming,
    path::{self, Segment},
};

/// Serializable projection of a domain object.
///
/// `TYPE_NAME` scopes alias paths: a `Question` view answers `question.text`
/// while an `Answer` view answers `answer.text`.
pub trait SourceView: Serialize {
    const TYPE_NAME: &'static str;
}

/// An association that may not have been loaded.
///
/// Unloaded associations project to an `{"id": ..}` stub when the identifier is known
/// and are omitted otherwise, so binding never needs to load anything.
#[derive(Debug, Clone, PartialEq)]
pub enum Related<T> {
    Loaded(T),
    Unloaded { id: Option<Value> },
}

impl<T> Related<T> {
    pub fn stub(id: impl Into<Value>) -> Self {
        Related::Unloaded {
            id: Some(id.into()),
        }
    }

    pub fn unknown() -> Self {
        Related::Unloaded { id: None }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Related::Loaded(_))
    }
}

impl<T> From<T> for Related<T> {
    fn from(value: T) -> Self {
        Related::Loaded(value)
    }
}

impl<T: Serialize> Serialize for Related<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Related::Loaded(value) => value.serialize(serializer),
            Related::Unloaded { id: Some(id) } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("id", id)?;
                map.end()
            }
            Related::Unloaded { id: None } => serializer.serialize_none(),
        }
    }
}

/// One caller-supplied input to the binder.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Parsed as JSON when possible, otherwise a single string leaf
    Text(String),
    Tree(Value),
    View { type_name: String, tree: Value },
}

impl Source {
    pub fn text(text: impl Into<String>) -> Self {
        Source::Text(text.into())
    }

    pub fn tree(value: Value) -> Self {
        Source::Tree(value)
    }

    /// Projects a view into a tree; null fields (including unknown associations) are dropped.
    pub fn view<T: SourceView>(view: &T) -> BindResult<Self> {
        let mut tree = serde_json::to_value(view).map_err(|e| BindError::Projection {
            message: format!("{}: {}", T::TYPE_NAME, e),
        })?;
        prune_nulls(&mut tree);
        Ok(Source::View {
            type_name: T::TYPE_NAME.to_string(),
            tree,
        })
    }
}

impl From<Value> for Source {
    fn from(value: Value) -> Self {
        Source::Tree(value)
    }
}

impl From<&str> for Source {
    fn from(text: &str) -> Self {
        Source::Text(text.to_string())
    }
}

fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(prune_nulls);
        }
        Value::Array(items) => {
            items.retain(|v| !v.is_null());
            items.iter_mut().for_each(prune_nulls);
        }
        _ => {}
    }
}

/// Normalized, read-only search tree for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    root: Value,
    /// Spellings of the view's type name; empty for text and trees
    scope: Vec<String>,
}

impl SourceNode {
    pub fn normalize(source: &Source) -> Self {
        match source {
            Source::Text(text) => {
                let root = serde_json::from_str(text.trim())
                    .unwrap_or_else(|_| Value::String(text.clone()));
                Self::from_value(root)
            }
            Source::Tree(tree) => Self::from_value(tree.clone()),
            Source::View { type_name, tree } => Self {
                root: tree.clone(),
                scope: naming::variants(type_name),
            },
        }
    }

    pub fn from_value(root: Value) -> Self {
        Self {
            root,
            scope: Vec::new(),
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Resolves a path to a present, non-null value.
    ///
    /// For views, a leading segment naming the view's type is stripped first.
    pub fn resolve(&self, segments: &[Segment]) -> Option<&Value> {
        if let Some((Segment::Field(first), rest)) = segments.split_first() {
            if !rest.is_empty() && self.scope.iter().any(|name| name == first) {
                if let Some(value) = path::apply(&self.root, rest).filter(|v| !v.is_null()) {
                    return Some(value);
                }
            }
        }
        path::apply(&self.root, segments).filter(|v| !v.is_null())
    }

    /// Looks the names up among the root's immediate fields, in order.
    pub fn direct(&self, names: &[String]) -> Option<&Value> {
        let map = self.root.as_object()?;
        names
            .iter()
            .find_map(|name| map.get(name).filter(|v| !v.is_null()))
    }

    /// Breadth-first search of the whole tree; the shallowest match wins.
    pub fn deep(&self, names: &[String]) -> Option<&Value> {
        let mut queue = VecDeque::from([&self.root]);
        while let Some(current) = queue.pop_front() {
            match current {
                Value::Object(map) => {
                    if let Some(found) = names
                        .iter()
                        .find_map(|name| map.get(name).filter(|v| !v.is_null()))
                    {
                        return Some(found);
                    }
                    queue.extend(map.values());
                }
                Value::Array(items) => queue.extend(items.iter()),
                _ => {}
            }
        }
        None
    }
}
