//! # Argument Binder
//!
//! Resolves the properties an argument schema declares to values found in an ordered
//! list of heterogeneous sources.
//!
//! Per leaf property, the first tier that yields a present, non-null value wins:
//!
//! 1. `x-path` resolved against each source in order
//! 2. `x-aliases`: path-like aliases resolved as paths, plain aliases looked up by
//!    naming-convention variants among each source's immediate fields, then the tail
//!    segments of path aliases anywhere in a source tree when `x-allowTailAlias` is set
//! 3. the property's own name, by variants, among immediate fields
//! 4. anywhere in a source tree: alias and name variants, when deep search is on
//! 5. caller `defaults[name]`, then the schema `default`; otherwise omitted
//!
//! Earlier sources win within a tier. Properties with their own `properties` bind
//! recursively, searching sub-objects located for them before the parent sources.
//!
//! ```
//! use promptbus::binding::{Source, bind};
//! use serde_json::{Map, json};
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "tag": {"type": "string", "x-aliases": ["topic.name"]},
//!         "count": {"type": "integer", "default": 3}
//!     }
//! });
//! let sources = [Source::tree(json!({"topic": {"name": "Spring"}}))];
//!
//! let args = bind(&schema, &Map::new(), false, &sources).unwrap();
//! assert_eq!(args["tag"], json!("Spring"));
//! assert_eq!(args["count"], json!(3));
//! ```

pub mod coerce;
pub mod naming;
pub mod path;
pub mod schema;
pub mod source;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::config::BindingConfig;

pub use schema::{ArgSchemaNode, SchemaType};
pub use source::{Related, Source, SourceNode, SourceView};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("Cannot convert {found} to {expected} for property '{property}'")]
    ConversionFailure {
        property: String,
        expected: SchemaType,
        found: String,
    },
    #[error("Invalid argument schema: {message}")]
    InvalidSchema { message: String },
    #[error("Invalid path expression: {path}")]
    InvalidPath { path: String },
    #[error("Cannot project source: {message}")]
    Projection { message: String },
}

pub type BindResult<T> = Result<T, BindError>;

/// Binds `schema`'s properties from `sources` (highest priority first).
///
/// `deep_search_default` applies unless the schema root sets `x-deepSearch`.
pub fn bind(
    schema: &Value,
    defaults: &Map<String, Value>,
    deep_search_default: bool,
    sources: &[Source],
) -> BindResult<Map<String, Value>> {
    let root = ArgSchemaNode::from_value(schema)?;
    let nodes: Vec<SourceNode> = sources.iter().map(SourceNode::normalize).collect();
    let refs: Vec<&SourceNode> = nodes.iter().collect();
    bind_node(
        &root,
        defaults,
        root.effective_deep_search(deep_search_default),
        &refs,
    )
}

/// Binder holding the configured deep-search default.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgumentBinder {
    deep_search_default: bool,
}

impl ArgumentBinder {
    pub fn new(deep_search_default: bool) -> Self {
        Self {
            deep_search_default,
        }
    }

    pub fn deep_search_default(&self) -> bool {
        self.deep_search_default
    }

    #[instrument(level = "debug", skip_all, fields(sources = sources.len()))]
    pub fn bind(
        &self,
        schema: &Value,
        defaults: &Map<String, Value>,
        sources: &[Source],
    ) -> BindResult<Map<String, Value>> {
        let bound = bind(schema, defaults, self.deep_search_default, sources)?;
        debug!(properties = bound.len(), "Bound arguments");
        Ok(bound)
    }
}

impl From<&BindingConfig> for ArgumentBinder {
    fn from(config: &BindingConfig) -> Self {
        Self::new(config.deep_search)
    }
}

fn bind_node(
    node: &ArgSchemaNode,
    defaults: &Map<String, Value>,
    deep_search: bool,
    sources: &[&SourceNode],
) -> BindResult<Map<String, Value>> {
    let mut out = Map::new();

    for (name, property) in &node.properties {
        let deep_search = property.effective_deep_search(deep_search);
        let fallback = || {
            defaults
                .get(name)
                .filter(|v| !v.is_null())
                .or(property.default.as_ref())
                .filter(|v| !v.is_null())
                .cloned()
        };

        let value = if property.is_nested() {
            let located: Vec<SourceNode> = locate(name, property, deep_search, sources)?
                .filter(|v| v.is_object())
                .map(|v| SourceNode::from_value(v.clone()))
                .into_iter()
                .collect();
            let scoped: Vec<&SourceNode> = located.iter().chain(sources.iter().copied()).collect();
            let child_defaults = defaults
                .get(name)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let nested = bind_node(property, &child_defaults, deep_search, &scoped)?;
            if nested.is_empty() {
                fallback()
            } else {
                Some(Value::Object(nested))
            }
        } else {
            match locate(name, property, deep_search, sources)? {
                Some(found) => Some(coerce::coerce(name, found.clone(), property.kind)?),
                None => {
                    trace!(property = %name, "Not found in sources, using defaults");
                    fallback()
                }
            }
        };

        if let Some(value) = value.filter(|v| !v.is_null()) {
            out.insert(name.clone(), value);
        }
    }

    Ok(out)
}

fn locate<'a>(
    name: &str,
    property: &ArgSchemaNode,
    deep_search: bool,
    sources: &[&'a SourceNode],
) -> BindResult<Option<&'a Value>> {
    if let Some(expr) = &property.path {
        let segments = path::parse(expr)?;
        if let Some(found) = first(sources, |s| s.resolve(&segments)) {
            trace!(property = name, path = %expr, "Resolved by x-path");
            return Ok(Some(found));
        }
    }

    let mut path_aliases = Vec::new();
    let mut name_aliases = Vec::new();
    for alias in &property.aliases {
        if property.alias_path || path::is_path_like(alias) {
            let segments = path::parse(alias)?;
            if let Some(found) = first(sources, |s| s.resolve(&segments)) {
                trace!(property = name, %alias, "Resolved by alias path");
                return Ok(Some(found));
            }
            path_aliases.push(segments);
        } else {
            let variants = naming::variants(alias);
            if let Some(found) = first(sources, |s| s.direct(&variants)) {
                trace!(property = name, %alias, "Resolved by alias");
                return Ok(Some(found));
            }
            name_aliases.push(variants);
        }
    }

    if property.allow_tail_alias {
        for segments in &path_aliases {
            let Some(tail) = path::tail(segments) else {
                continue;
            };
            let variants = naming::variants(tail);
            if let Some(found) = first(sources, |s| s.deep(&variants)) {
                trace!(property = name, tail, "Resolved by alias tail");
                return Ok(Some(found));
            }
        }
    }

    let own_variants = naming::variants(name);
    if let Some(found) = first(sources, |s| s.direct(&own_variants)) {
        return Ok(Some(found));
    }

    if deep_search {
        for variants in name_aliases.iter().chain(std::iter::once(&own_variants)) {
            if let Some(found) = first(sources, |s| s.deep(variants)) {
                trace!(property = name, "Resolved by deep search");
                return Ok(Some(found));
            }
        }
    }

    Ok(None)
}

fn first<'a>(
    sources: &[&'a SourceNode],
    lookup: impl Fn(&'a SourceNode) -> Option<&'a Value>,
) -> Option<&'a Value> {
    sources.iter().find_map(|source| lookup(*source))
}
