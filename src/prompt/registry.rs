use std::{collections::BTreeMap, path::Path, sync::Arc};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, info};

use super::{PromptDefinition, PromptError, PromptResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionFile {
    Many(Vec<PromptDefinition>),
    One(Box<PromptDefinition>),
}

/// Prompt definitions by key, each key holding any number of versions.
#[derive(Debug, Default)]
pub struct PromptRegistry {
    prompts: DashMap<String, BTreeMap<u32, Arc<PromptDefinition>>>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: PromptDefinition) -> PromptResult<Arc<PromptDefinition>> {
        let mut versions = self.prompts.entry(definition.key.clone()).or_default();
        if versions.contains_key(&definition.version) {
            return Err(PromptError::Duplicate {
                key: definition.key,
                version: definition.version,
            });
        }

        debug!(key = %definition.key, version = definition.version, "Registered prompt");
        let definition = Arc::new(definition);
        versions.insert(definition.version, definition.clone());
        Ok(definition)
    }

    /// Highest registered version of `key`.
    pub fn latest(&self, key: &str) -> PromptResult<Arc<PromptDefinition>> {
        self.prompts
            .get(key)
            .and_then(|versions| versions.values().next_back().cloned())
            .ok_or_else(|| PromptError::NotFound {
                key: key.to_string(),
                version: None,
            })
    }

    pub fn get(&self, key: &str, version: u32) -> PromptResult<Arc<PromptDefinition>> {
        self.prompts
            .get(key)
            .and_then(|versions| versions.get(&version).cloned())
            .ok_or_else(|| PromptError::NotFound {
                key: key.to_string(),
                version: Some(version),
            })
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.prompts.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.prompts.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads a single definition or an array of definitions; returns how many were added.
    pub fn load_from_str(&self, json: &str) -> PromptResult<usize> {
        let definitions = match serde_json::from_str(json)? {
            DefinitionFile::Many(definitions) => definitions,
            DefinitionFile::One(definition) => vec![*definition],
        };
        let count = definitions.len();
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(count)
    }

    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> PromptResult<usize> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let count = self.load_from_str(&json)?;
        info!(path = %path.display(), count, "Loaded prompt definitions");
        Ok(count)
    }
}
