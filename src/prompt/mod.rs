//! # Prompt Assembler
//!
//! Turns a [`PromptDefinition`] plus caller arguments (or raw sources) into a
//! [`RenderedRequest`] ready for a generative-model client:
//!
//! ```text
//! sources ──bind──▶ args ──merge defaults──▶ validate ──▶ render system/user ──▶ RenderedRequest
//! ```
//!
//! Validation happens before any template is touched; an invalid argument set never
//! reaches the renderer.

pub mod registry;
pub mod template;
pub mod validator;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::binding::{ArgumentBinder, BindError, Source};

pub use registry::PromptRegistry;
pub use template::{TemplateEngine, TemplateError, TemplateRenderer};
pub use validator::SchemaValidator;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Arguments for prompt '{key}' failed validation: {}", .violations.join("; "))]
    ValidationFailure { key: String, violations: Vec<String> },
    #[error("Rendering failed: {0}")]
    Render(#[from] TemplateError),
    #[error("Binding failed: {0}")]
    Bind(#[from] BindError),
    #[error("Invalid argument schema for prompt '{key}': {message}")]
    InvalidSchema { key: String, message: String },
    #[error("Prompt not found: {key}{}", .version.map(|v| format!(" v{}", v)).unwrap_or_default())]
    NotFound { key: String, version: Option<u32> },
    #[error("Prompt {key} v{version} is already registered")]
    Duplicate { key: String, version: u32 },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid prompt definition: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type PromptResult<T> = Result<T, PromptError>;

fn new_prompt_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_version() -> u32 {
    1
}

fn default_args_schema() -> Value {
    serde_json::json!({"type": "object"})
}

/// A versioned prompt: templates, argument schema, defaults and model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDefinition {
    #[serde(default = "new_prompt_id")]
    pub id: String,
    pub key: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub model: String,
    /// Static model parameters (temperature, max tokens, ...)
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub system_template: Option<String>,
    pub user_template: String,
    #[serde(default = "default_args_schema")]
    pub args_schema: Value,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    /// Expected shape of the model output
    #[serde(default)]
    pub response_contract: Value,
}

impl PromptDefinition {
    pub fn new(
        key: impl Into<String>,
        version: u32,
        model: impl Into<String>,
        user_template: impl Into<String>,
    ) -> Self {
        Self {
            id: new_prompt_id(),
            key: key.into(),
            version,
            model: model.into(),
            parameters: Map::new(),
            system_template: None,
            user_template: user_template.into(),
            args_schema: default_args_schema(),
            defaults: Map::new(),
            response_contract: Value::Null,
        }
    }

    pub fn with_system_template(mut self, template: impl Into<String>) -> Self {
        self.system_template = Some(template.into());
        self
    }

    pub fn with_args_schema(mut self, schema: Value) -> Self {
        self.args_schema = schema;
        self
    }

    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_response_contract(mut self, contract: Value) -> Self {
        self.response_contract = contract;
        self
    }

    /// Identifies this definition's compiled schema.
    pub fn cache_key(&self) -> String {
        format!("{}@{}", self.key, self.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Output of one assembly; immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedRequest {
    pub prompt_id: String,
    pub prompt_key: String,
    pub model: String,
    pub parameters: Map<String, Value>,
    /// System message first when present, then the user message
    pub messages: Vec<ChatMessage>,
    /// Rendered user text
    pub input: String,
    pub response_contract: Value,
    pub version: u32,
}

/// `default` literals declared on the schema's top-level properties.
fn schema_defaults(schema: &Value) -> Map<String, Value> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .filter_map(|(name, node)| {
                    node.get("default")
                        .filter(|v| !v.is_null())
                        .map(|v| (name.clone(), v.clone()))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub struct PromptAssembler<T = TemplateEngine> {
    renderer: T,
    validator: SchemaValidator,
    binder: ArgumentBinder,
}

impl PromptAssembler<TemplateEngine> {
    pub fn new() -> Self {
        Self::with_renderer(TemplateEngine::new())
    }
}

impl Default for PromptAssembler<TemplateEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TemplateRenderer> PromptAssembler<T> {
    pub fn with_renderer(renderer: T) -> Self {
        Self {
            renderer,
            validator: SchemaValidator::new(),
            binder: ArgumentBinder::default(),
        }
    }

    pub fn with_binder(mut self, binder: ArgumentBinder) -> Self {
        self.binder = binder;
        self
    }

    pub fn binder(&self) -> &ArgumentBinder {
        &self.binder
    }

    pub fn renderer(&self) -> &T {
        &self.renderer
    }

    /// Merges defaults under `args`, validates, then renders.
    ///
    /// Precedence, lowest first: schema `default` literals, prompt defaults, `args`.
    #[instrument(
        level = "debug",
        skip_all,
        fields(prompt = %definition.key, version = definition.version)
    )]
    pub fn render(
        &self,
        definition: &PromptDefinition,
        args: &Map<String, Value>,
    ) -> PromptResult<RenderedRequest> {
        let mut merged = schema_defaults(&definition.args_schema);
        merged.extend(definition.defaults.clone());
        merged.extend(
            args.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        self.validator.validate(
            &definition.cache_key(),
            &definition.args_schema,
            &Value::Object(merged.clone()),
        )?;

        let mut messages = Vec::with_capacity(2);
        if let Some(template) = definition
            .system_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
        {
            messages.push(ChatMessage {
                role: Role::System,
                content: self.renderer.render(template, &merged)?,
            });
        }
        let input = self.renderer.render(&definition.user_template, &merged)?;
        messages.push(ChatMessage {
            role: Role::User,
            content: input.clone(),
        });

        info!(
            prompt = %definition.key,
            version = definition.version,
            messages = messages.len(),
            input_len = input.len(),
            "Rendered prompt"
        );

        Ok(RenderedRequest {
            prompt_id: definition.id.clone(),
            prompt_key: definition.key.clone(),
            model: definition.model.clone(),
            parameters: definition.parameters.clone(),
            messages,
            input,
            response_contract: definition.response_contract.clone(),
            version: definition.version,
        })
    }

    /// Binds arguments from `sources` with the prompt's own schema and defaults, then renders.
    pub fn render_from_sources(
        &self,
        definition: &PromptDefinition,
        sources: &[Source],
    ) -> PromptResult<RenderedRequest> {
        let args = self
            .binder
            .bind(&definition.args_schema, &definition.defaults, sources)?;
        debug!(prompt = %definition.key, bound = args.len(), "Arguments bound from sources");
        self.render(definition, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use template::MockTemplateRenderer;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn quiz() -> PromptDefinition {
        PromptDefinition::new(
            "quiz-generation",
            2,
            "gpt-4o-mini",
            "Generate {{count}} {{difficulty}} questions about {{tag}}.",
        )
        .with_args_schema(json!({
            "type": "object",
            "required": ["tag"],
            "properties": {
                "tag": {"type": "string", "x-aliases": ["topic.name"]},
                "count": {"type": "integer", "default": 3}
            }
        }))
        .with_defaults(object(json!({"difficulty": "EASY"})))
        .with_parameters(object(json!({"temperature": 0.2})))
        .with_response_contract(json!({"type": "array", "items": {"type": "string"}}))
    }

    #[test]
    fn test_render_end_to_end() {
        let assembler = PromptAssembler::new();
        let definition = quiz();
        let rendered = assembler
            .render(&definition, &object(json!({"tag": "Spring", "count": 5})))
            .unwrap();

        assert_eq!(rendered.input, "Generate 5 EASY questions about Spring.");
        assert_eq!(
            rendered.messages,
            vec![ChatMessage {
                role: Role::User,
                content: "Generate 5 EASY questions about Spring.".to_string(),
            }]
        );
        assert_eq!(rendered.prompt_id, definition.id);
        assert_eq!(rendered.prompt_key, "quiz-generation");
        assert_eq!(rendered.version, 2);
        assert_eq!(rendered.model, "gpt-4o-mini");
        assert_eq!(rendered.parameters, object(json!({"temperature": 0.2})));
        assert_eq!(rendered.response_contract["type"], json!("array"));
    }

    #[test]
    fn test_schema_default_and_caller_override() {
        let assembler = PromptAssembler::new();
        let rendered = assembler
            .render(
                &quiz(),
                &object(json!({"tag": "Rust", "difficulty": "HARD", "count": null})),
            )
            .unwrap();
        assert_eq!(rendered.input, "Generate 3 HARD questions about Rust.");
    }

    #[test]
    fn test_missing_required_never_renders() {
        let mut renderer = MockTemplateRenderer::new();
        renderer.expect_render().never();
        let assembler = PromptAssembler::with_renderer(renderer);

        let err = assembler
            .render(&quiz(), &object(json!({"count": 5})))
            .unwrap_err();
        match err {
            PromptError::ValidationFailure { key, violations } => {
                assert_eq!(key, "quiz-generation@2");
                assert_eq!(violations.len(), 1);
                assert!(violations[0].contains("tag"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_all_violations_reported() {
        let assembler = PromptAssembler::new();
        let err = assembler
            .render(&quiz(), &object(json!({"count": "five"})))
            .unwrap_err();
        assert!(matches!(
            err,
            PromptError::ValidationFailure { ref violations, .. } if violations.len() == 2
        ));
    }

    #[test]
    fn test_system_message_first_and_blank_skipped() {
        let assembler = PromptAssembler::new();
        let args = object(json!({"tag": "Spring"}));

        let with_system = quiz().with_system_template("You write {{difficulty}} quizzes.");
        let rendered = assembler.render(&with_system, &args).unwrap();
        assert_eq!(
            rendered.messages,
            vec![
                ChatMessage {
                    role: Role::System,
                    content: "You write EASY quizzes.".to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: "Generate 3 EASY questions about Spring.".to_string(),
                },
            ]
        );

        let blank = quiz().with_system_template("   ");
        assert_eq!(assembler.render(&blank, &args).unwrap().messages.len(), 1);
    }

    #[test]
    fn test_render_failure_is_distinct() {
        let assembler = PromptAssembler::new();
        let definition = PromptDefinition::new("greet", 1, "m", "Hello {{name}} from {{city}}")
            .with_args_schema(json!({"type": "object", "required": ["name"]}));
        let err = assembler
            .render(&definition, &object(json!({"name": "Ada"})))
            .unwrap_err();
        assert!(matches!(
            err,
            PromptError::Render(TemplateError::UndefinedVariable { ref name }) if name == "city"
        ));
    }

    #[test]
    fn test_render_from_sources() {
        let assembler = PromptAssembler::new();
        let sources = [
            Source::text(r#"{"topic": {"name": "Spring"}}"#),
            Source::tree(json!({"count": "4"})),
        ];
        let rendered = assembler.render_from_sources(&quiz(), &sources).unwrap();
        assert_eq!(rendered.input, "Generate 4 EASY questions about Spring.");
    }

    #[test]
    fn test_render_from_sources_binding_error() {
        let assembler = PromptAssembler::new();
        let sources = [Source::tree(json!({"tag": {"name": "Spring"}}))];
        assert!(matches!(
            assembler.render_from_sources(&quiz(), &sources),
            Err(PromptError::Bind(BindError::ConversionFailure { .. }))
        ));
    }

    #[test]
    fn test_rendered_request_wire_shape() {
        let assembler = PromptAssembler::new();
        let rendered = assembler
            .render(&quiz(), &object(json!({"tag": "Spring"})))
            .unwrap();
        let wire = serde_json::to_value(&rendered).unwrap();
        assert_eq!(wire["promptKey"], json!("quiz-generation"));
        assert_eq!(wire["messages"][0]["role"], json!("user"));
        assert_eq!(wire["responseContract"]["items"]["type"], json!("string"));
    }
}
