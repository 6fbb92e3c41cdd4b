use std::sync::Arc;

use dashmap::DashMap;
use jsonschema::Validator;
use serde_json::Value;
use tracing::trace;

use super::{PromptError, PromptResult};

/// JSON Schema validation with compiled validators cached per key.
#[derive(Default)]
pub struct SchemaValidator {
    cache: DashMap<String, Arc<Validator>>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the validator compiled for `key`, compiling `schema` on first use.
    ///
    /// Callers pick keys that change whenever the schema does (`prompt@version`).
    pub fn compiled(&self, key: &str, schema: &Value) -> PromptResult<Arc<Validator>> {
        if let Some(cached) = self.cache.get(key) {
            return Ok(Arc::clone(&cached));
        }

        let validator = jsonschema::validator_for(schema).map_err(|e| PromptError::InvalidSchema {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        trace!(key, "Compiled argument schema");
        let validator = Arc::new(validator);
        self.cache.insert(key.to_string(), validator.clone());
        Ok(validator)
    }

    /// Validates `instance`, collecting every violated constraint.
    pub fn validate(&self, key: &str, schema: &Value, instance: &Value) -> PromptResult<()> {
        let validator = self.compiled(key, schema)?;
        let violations: Vec<String> = validator
            .iter_errors(instance)
            .map(|error| {
                let location = error.instance_path.to_string();
                if location.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", location, error)
                }
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(PromptError::ValidationFailure {
                key: key.to_string(),
                violations,
            })
        }
    }

    pub fn cached_schemas(&self) -> usize {
        self.cache.len()
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("cached_schemas", &self.cache.len())
            .finish()
    }
}
