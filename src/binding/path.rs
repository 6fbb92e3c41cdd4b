//! Path expressions used by `x-path` and path-like aliases.
//!
//! Supports:
//! - `/a/b/0` (JSON pointer, `~0` and `~1` escapes)
//! - `a.b.c` and `$.a.b.c` (dot notation)
//! - `a[0].b` and `a.0.b` (array index)

use serde_json::Value;

use super::{BindError, BindResult};

/// A parsed path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Object field access; also indexes arrays when numeric (JSON pointer semantics)
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

/// An alias is path-like when it contains `.` or `[`, or starts with `/`.
pub fn is_path_like(expr: &str) -> bool {
    expr.starts_with('/') || expr.contains('.') || expr.contains('[')
}

/// Parses a pointer or dot path into segments.
///
/// - "/a/b" → [Field("a"), Field("b")]
/// - "items[0].name" → [Field("items"), Index(0), Field("name")]
pub fn parse(path: &str) -> BindResult<Vec<Segment>> {
    if let Some(pointer) = path.strip_prefix('/') {
        return Ok(pointer
            .split('/')
            .map(|token| Segment::Field(token.replace("~1", "/").replace("~0", "~")))
            .collect());
    }

    let path = if let Some(stripped) = path.strip_prefix("$.") {
        stripped
    } else if path == "$" {
        return Ok(vec![]);
    } else {
        path
    };

    if path.is_empty() {
        return Ok(vec![]);
    }

    let invalid = || BindError::InvalidPath {
        path: path.to_string(),
    };

    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            return Err(invalid());
        }

        match part.find('[') {
            Some(bracket) => {
                let field = &part[..bracket];
                if !field.is_empty() {
                    segments.push(Segment::Field(field.to_string()));
                }
                // a[0][1]
                let mut rest = &part[bracket..];
                while !rest.is_empty() {
                    let close = rest.find(']').ok_or_else(invalid)?;
                    if !rest.starts_with('[') {
                        return Err(invalid());
                    }
                    let index = rest[1..close].trim().parse().map_err(|_| invalid())?;
                    segments.push(Segment::Index(index));
                    rest = &rest[close + 1..];
                }
            }
            None => match part.parse::<usize>() {
                Ok(index) => segments.push(Segment::Index(index)),
                Err(_) => segments.push(Segment::Field(part.to_string())),
            },
        }
    }

    Ok(segments)
}

/// Applies segments to a JSON value without cloning.
pub fn apply<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Field(name), Value::Object(map)) => map.get(name)?,
            (Segment::Field(name), Value::Array(items)) => items.get(name.parse::<usize>().ok()?)?,
            (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
            (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Name of the last field segment, used for tail matching.
pub fn tail(segments: &[Segment]) -> Option<&str> {
    segments.iter().rev().find_map(|segment| match segment {
        Segment::Field(name) => Some(name.as_str()),
        Segment::Index(_) => None,
    })
}
