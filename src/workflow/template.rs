//! Template expansion for step specs
//!
//! Expands a step's template text against an immutable snapshot of the
//! global state, producing the concrete `StepSpec` the scheduler dispatches.
//! Supports:
//! - `${{ env.VAR_NAME }}` — environment lookups resolved at expansion time
//! - `{{ globals.key }}` — seeded global values
//! - `{{ steps.step_name.action_name.field }}` — outputs of passed ancestors
//!
//! Expansion is deterministic given the same snapshot and side-effect free;
//! it happens exactly once per step, immediately before dispatch.

use handlebars::Handlebars;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::engine::state::StateSnapshot;

use super::spec::{runner_image, ActionDef, AssertDef, StepDefinition, StepSpec, VolumeSpec};

static ENV_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Errors that can occur during template expansion
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Render error: {0}")]
    Render(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Expanded template is not a valid step spec: {0}")]
    InvalidSpec(String),

    #[error("Step '{0}' does not resolve to a runner image")]
    MissingImage(String),
}

/// Intermediate form parsed from expanded template text; missing fields
/// fall back to the step definition.
#[derive(Debug, serde::Deserialize)]
struct RawStepSpec {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    runner: Option<String>,
    #[serde(default)]
    config: Option<HashMap<String, String>>,
    #[serde(default)]
    volumes: Option<Vec<VolumeSpec>>,
    #[serde(default)]
    actions: Option<Vec<ActionDef>>,
    #[serde(default)]
    asserts: Option<Vec<AssertDef>>,
}

/// Expands step templates against state snapshots
pub struct Expander {
    registry: Handlebars<'static>,
    env: HashMap<String, String>,
}

impl Expander {
    /// Create an expander capturing the current process environment
    pub fn new() -> Self {
        Self::with_env(std::env::vars().collect())
    }

    /// Create an expander with an explicit environment map
    pub fn with_env(env: HashMap<String, String>) -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        // Expanded text is YAML, not HTML
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry, env }
    }

    /// Expand a step definition into a concrete spec.
    ///
    /// When the step carries a template, the template text is rendered and
    /// parsed and is authoritative for whatever fields it produces; fields
    /// it omits fall back to the definition. Pre-expanded steps go through
    /// the same rendering for config values and action/assert params, so
    /// state references resolve either way.
    pub fn expand(
        &self,
        step: &StepDefinition,
        snapshot: &StateSnapshot,
    ) -> Result<StepSpec, TemplateError> {
        let data = json!({
            "globals": snapshot.globals,
            "steps": snapshot.steps,
        });

        let raw = match &step.template {
            Some(template) => {
                let resolved = self.resolve_env(template)?;
                let expanded = self
                    .registry
                    .render_template(&resolved, &data)
                    .map_err(|e| TemplateError::Render(e.to_string()))?;
                serde_yaml::from_str::<RawStepSpec>(&expanded)
                    .map_err(|e| TemplateError::InvalidSpec(e.to_string()))?
            }
            None => RawStepSpec {
                image: None,
                runner: None,
                config: None,
                volumes: None,
                actions: None,
                asserts: None,
            },
        };

        let image = raw
            .image
            .or_else(|| raw.runner.as_deref().and_then(|r| runner_image(r).map(String::from)))
            .or_else(|| step.image.clone())
            .or_else(|| step.runner.as_deref().and_then(|r| runner_image(r).map(String::from)))
            .ok_or_else(|| TemplateError::MissingImage(step.name.clone()))?;
        let image = self.render_text(&image, &data)?;

        let config = match raw.config {
            Some(config) => config,
            None => self.render_config(&step.config, &data)?,
        };

        let volumes = raw.volumes.unwrap_or_else(|| step.volumes.clone());

        let actions = match raw.actions {
            Some(actions) => actions,
            None => self.render_actions(&step.actions, &data)?,
        };

        let asserts = match raw.asserts {
            Some(asserts) => asserts,
            None => self.render_asserts(&step.asserts, &data)?,
        };

        let mut spec = StepSpec {
            image,
            config,
            volumes,
            actions,
            asserts,
        };
        spec.assign_default_names();
        spec.validate_names()
            .map_err(TemplateError::InvalidSpec)?;

        Ok(spec)
    }

    /// Resolve `${{ env.NAME }}` references against the captured environment
    fn resolve_env(&self, input: &str) -> Result<String, TemplateError> {
        let mut result = input.to_string();

        for cap in ENV_REGEX.captures_iter(input) {
            let full_match = cap.get(0).unwrap().as_str();
            let name = cap.get(1).unwrap().as_str();

            let value = self
                .env
                .get(name)
                .ok_or_else(|| TemplateError::UnknownVariable(format!("env.{}", name)))?;
            result = result.replace(full_match, value);
        }

        Ok(result)
    }

    fn render_text(&self, input: &str, data: &Value) -> Result<String, TemplateError> {
        let resolved = self.resolve_env(input)?;
        self.registry
            .render_template(&resolved, data)
            .map_err(|e| TemplateError::Render(e.to_string()))
    }

    fn render_config(
        &self,
        config: &HashMap<String, String>,
        data: &Value,
    ) -> Result<HashMap<String, String>, TemplateError> {
        config
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.render_text(value, data)?)))
            .collect()
    }

    /// Render every string inside a params value, preserving structure
    fn render_params(&self, params: &Value, data: &Value) -> Result<Value, TemplateError> {
        match params {
            Value::String(s) => Ok(Value::String(self.render_text(s, data)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_params(item, data))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.render_params(value, data)?)))
                .collect::<Result<serde_json::Map<_, _>, TemplateError>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn render_actions(
        &self,
        actions: &[ActionDef],
        data: &Value,
    ) -> Result<Vec<ActionDef>, TemplateError> {
        actions
            .iter()
            .map(|action| {
                Ok(ActionDef {
                    name: action.name.clone(),
                    action_type: action.action_type.clone(),
                    params: self.render_params(&action.params, data)?,
                })
            })
            .collect()
    }

    fn render_asserts(
        &self,
        asserts: &[AssertDef],
        data: &Value,
    ) -> Result<Vec<AssertDef>, TemplateError> {
        asserts
            .iter()
            .map(|assert| {
                Ok(AssertDef {
                    name: assert.name.clone(),
                    assert_type: assert.assert_type.clone(),
                    params: self.render_params(&assert.params, data)?,
                })
            })
            .collect()
    }
}

impl Default for Expander {
    fn default() -> Self {
        Self::new()
    }
}
