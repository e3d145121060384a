//! Per-level prompt rendering.
//!
//! Templates live in an immutable [`TemplateRegistry`] (one template per
//! level, built-ins compiled in). [`PromptBuilder`] compiles a registry with
//! minijinja in strict-undefined mode and renders a level's template from
//! pre-serialized [`PromptFields`].

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::debug;

use crate::core::level::Level;
use crate::error::PromptError;

const META_ARCHITECTURE_TEMPLATE: &str = include_str!("prompts/meta_architecture.md");
const SOLUTION_DESIGN_TEMPLATE: &str = include_str!("prompts/solution_design.md");
const IMPLEMENTATION_TEMPLATE: &str = include_str!("prompts/implementation.md");
const INTEGRATION_TEMPLATE: &str = include_str!("prompts/integration.md");
const OPTIMIZATION_TEMPLATE: &str = include_str!("prompts/optimization.md");

/// Level → template source mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRegistry {
    sources: BTreeMap<Level, String>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateRegistry {
    /// The templates shipped with the crate.
    pub fn builtin() -> Self {
        let sources = Level::ALL
            .into_iter()
            .map(|level| {
                let source = match level {
                    Level::MetaArchitecture => META_ARCHITECTURE_TEMPLATE,
                    Level::SolutionDesign => SOLUTION_DESIGN_TEMPLATE,
                    Level::Implementation => IMPLEMENTATION_TEMPLATE,
                    Level::Integration => INTEGRATION_TEMPLATE,
                    Level::Optimization => OPTIMIZATION_TEMPLATE,
                };
                (level, source.to_string())
            })
            .collect();
        Self { sources }
    }

    /// Copy of this registry with `level`'s template replaced.
    pub fn with_template(mut self, level: Level, source: impl Into<String>) -> Self {
        self.sources.insert(level, source.into());
        self
    }

    pub fn source(&self, level: Level) -> &str {
        self.sources.get(&level).map(String::as_str).unwrap_or_default()
    }
}

/// Named, already-serialized values interpolated into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PromptFields(BTreeMap<&'static str, String>);

impl PromptFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Compiled templates for every level.
pub struct PromptBuilder<'r> {
    env: Environment<'r>,
}

impl<'r> PromptBuilder<'r> {
    /// Compile and dry-run every template in `registry`.
    ///
    /// A template that fails to parse, or that references a variable its level
    /// does not supply, is rejected here before any backend call is made.
    pub fn new(registry: &'r TemplateRegistry) -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for level in Level::ALL {
            env.add_template(level.key(), registry.source(level))
                .map_err(|source| PromptError::Template { level, source })?;
        }
        let builder = Self { env };
        for level in Level::ALL {
            let placeholders = level
                .fields()
                .iter()
                .fold(PromptFields::new(), |fields, name| {
                    fields.with(*name, format!("<{name}>"))
                });
            builder.build(level, &placeholders)?;
        }
        Ok(builder)
    }

    /// Render `level`'s template.
    ///
    /// Every placeholder declared by the level must be present in `fields`.
    pub fn build(&self, level: Level, fields: &PromptFields) -> Result<String, PromptError> {
        if let Some(missing) = level.fields().iter().find(|name| fields.get(name).is_none()) {
            return Err(PromptError::MissingField {
                level,
                field: (*missing).to_string(),
            });
        }
        let template = self
            .env
            .get_template(level.key())
            .map_err(|source| PromptError::Template { level, source })?;
        let rendered = template
            .render(fields)
            .map_err(|source| PromptError::Template { level, source })?;
        debug!(level = %level, prompt_len = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}
