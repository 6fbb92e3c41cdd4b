//! Logic-less template rendering with a tokenized-template cache.
//!
//! Only variable substitution is supported: `{{name}}`, `{{a.b}}`, `{{{name}}}` and
//! `{{&name}}` all insert the value unescaped. `{{! comment }}` renders nothing.
//! Sections, inverted sections and partials are rejected rather than ignored.

use std::{ops::Range, sync::Arc};

use dashmap::DashMap;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Malformed template at byte {position}: {message}")]
    Malformed { position: usize, message: String },
    #[error("Unsupported template tag: {{{{{tag}}}}}")]
    Unsupported { tag: String },
    #[error("Undefined template variable: {name}")]
    UndefinedVariable { name: String },
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// Renders a template against an argument map.
#[cfg_attr(test, mockall::automock)]
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, args: &Map<String, Value>) -> TemplateResult<String>;
}

/// Parsed template fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text (range in the original template)
    Literal(Range<usize>),
    /// Dotted variable path
    Variable(Vec<String>),
}

/// Template engine with caching
#[derive(Debug, Default)]
pub struct TemplateEngine {
    cache: DashMap<String, Arc<Vec<Token>>>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct templates tokenized so far.
    pub fn cached_templates(&self) -> usize {
        self.cache.len()
    }

    /// Parses a template into tokens, reusing the cached result when present.
    pub fn tokenize(&self, template: &str) -> TemplateResult<Arc<Vec<Token>>> {
        if let Some(cached) = self.cache.get(template) {
            return Ok(Arc::clone(&cached));
        }

        let tokens = Arc::new(tokenize(template)?);
        self.cache.insert(template.to_string(), tokens.clone());
        Ok(tokens)
    }
}

impl TemplateRenderer for TemplateEngine {
    fn render(&self, template: &str, args: &Map<String, Value>) -> TemplateResult<String> {
        let tokens = self.tokenize(template)?;
        let mut out = String::with_capacity(template.len() * 2);

        for token in tokens.iter() {
            match token {
                Token::Literal(range) => out.push_str(&template[range.clone()]),
                Token::Variable(path) => {
                    let value =
                        lookup(args, path).ok_or_else(|| TemplateError::UndefinedVariable {
                            name: path.join("."),
                        })?;
                    push_value(&mut out, value);
                }
            }
        }

        Ok(out)
    }
}

fn tokenize(template: &str) -> TemplateResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(offset) = template[pos..].find("{{") {
        let open = pos + offset;
        if open > pos {
            tokens.push(Token::Literal(pos..open));
        }

        let (start, closer) = if template[open..].starts_with("{{{") {
            (open + 3, "}}}")
        } else {
            (open + 2, "}}")
        };
        let close = template[start..]
            .find(closer)
            .map(|offset| start + offset)
            .ok_or_else(|| TemplateError::Malformed {
                position: open,
                message: format!("unclosed tag, expected '{}'", closer),
            })?;
        pos = close + closer.len();

        let inner = template[start..close].trim();
        let name = match inner.chars().next() {
            None => {
                return Err(TemplateError::Malformed {
                    position: open,
                    message: "empty tag".to_string(),
                });
            }
            Some('!') => continue,
            Some('&') => inner[1..].trim(),
            Some('#' | '/' | '^' | '>' | '=' | '<' | '$') => {
                return Err(TemplateError::Unsupported {
                    tag: inner.to_string(),
                });
            }
            Some(_) => inner,
        };

        let path: Vec<String> = name.split('.').map(str::to_string).collect();
        if path.iter().any(|part| {
            part.is_empty()
                || part
                    .chars()
                    .any(|c| c.is_whitespace() || c == '{' || c == '}')
        }) {
            return Err(TemplateError::Malformed {
                position: open,
                message: format!("invalid variable name '{}'", name),
            });
        }
        tokens.push(Token::Variable(path));
    }

    if pos < template.len() {
        tokens.push(Token::Literal(pos..template.len()));
    }
    Ok(tokens)
}

/// Null counts as undefined.
fn lookup<'a>(args: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = args.get(first)?;
    for part in rest {
        current = current.as_object()?.get(part)?;
    }
    (!current.is_null()).then_some(current)
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        // numbers, booleans and containers (compact JSON)
        other => out.push_str(&other.to_string()),
    }
}
