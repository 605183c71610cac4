//! Workflow and step definitions
//!
//! This module contains the input document types: a workflow is an ordered
//! collection of named test steps, each with dependencies, runner config,
//! and either a template or pre-expanded actions/asserts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Workflow
// ============================================================================

/// A complete workflow document, immutable once loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Human-readable description of the run
    #[serde(default)]
    pub description: Option<String>,

    /// Document format version
    #[serde(default)]
    pub version: Option<String>,

    /// Values seeding the global state before any step runs
    #[serde(default)]
    pub globals: HashMap<String, Value>,

    /// Test steps in declared order
    #[serde(default)]
    pub tests: Vec<StepDefinition>,
}

impl WorkflowSpec {
    /// Parse a workflow document from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Look up a step definition by name
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.tests.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

// ============================================================================
// Step definition
// ============================================================================

/// A single named test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique step name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Steps that must pass before this one becomes ready
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Runner capability name (e.g. "rest-runner"), mapped to a default image
    #[serde(default)]
    pub runner: Option<String>,

    /// Explicit runner image reference, overrides `runner`
    #[serde(default)]
    pub image: Option<String>,

    /// Opaque config handed to the runner at provisioning time
    #[serde(default)]
    pub config: HashMap<String, String>,

    /// Volumes to share with the runner instance
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,

    /// Template text expanding to a concrete step spec; when absent the
    /// declared `actions`/`asserts` are used directly
    #[serde(default)]
    pub template: Option<String>,

    /// Pre-expanded actions
    #[serde(default)]
    pub actions: Vec<ActionDef>,

    /// Pre-expanded asserts
    #[serde(default)]
    pub asserts: Vec<AssertDef>,

    /// Outer bound in seconds for the step's action/assert phases
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// A directory shared with a runner instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSpec {
    pub source: String,
    pub destination: String,
}

// ============================================================================
// Actions and asserts
// ============================================================================

/// An imperative operation sent to a runner; produces outputs on success
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDef {
    /// Name for recording outputs; auto-assigned from `type` when omitted
    #[serde(default)]
    pub name: Option<String>,

    /// Opaque verb the runner must support (e.g. "put", "Send")
    #[serde(rename = "type")]
    pub action_type: String,

    /// Opaque structured parameters, passed through as an encoded payload
    #[serde(default)]
    pub params: Value,
}

/// A read-only check sent to a runner; produces a pass/fail verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertDef {
    /// Name for recording the result; auto-assigned from `type` when omitted
    #[serde(default)]
    pub name: Option<String>,

    /// Opaque verb the runner must support
    #[serde(rename = "type")]
    pub assert_type: String,

    /// Opaque structured parameters
    #[serde(default)]
    pub params: Value,
}

// ============================================================================
// Concrete step spec (post-expansion)
// ============================================================================

/// Concrete form of a step after template expansion: everything the engine
/// needs to provision a runner and drive the protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Runner image to provision
    pub image: String,

    /// Config handed to the runner at session creation
    #[serde(default)]
    pub config: HashMap<String, String>,

    /// Volumes shared with the runner
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,

    /// Ordered actions
    #[serde(default)]
    pub actions: Vec<ActionDef>,

    /// Ordered asserts
    #[serde(default)]
    pub asserts: Vec<AssertDef>,
}

impl StepSpec {
    /// Assign default names to unnamed actions and asserts.
    ///
    /// Unnamed items get `{type}{n}` where `n` counts prior items of the
    /// same type, so two unnamed "put" actions record as `put0` and `put1`.
    pub fn assign_default_names(&mut self) {
        let mut action_counts: HashMap<String, usize> = HashMap::new();
        for action in &mut self.actions {
            let count = action_counts.entry(action.action_type.clone()).or_insert(0);
            if action.name.is_none() {
                action.name = Some(format!("{}{}", action.action_type, count));
            }
            *count += 1;
        }

        let mut assert_counts: HashMap<String, usize> = HashMap::new();
        for assert in &mut self.asserts {
            let count = assert_counts.entry(assert.assert_type.clone()).or_insert(0);
            if assert.name.is_none() {
                assert.name = Some(format!("{}{}", assert.assert_type, count));
            }
            *count += 1;
        }
    }

    /// Check that action and assert names are unique within the step
    pub fn validate_names(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for action in &self.actions {
            if let Some(name) = &action.name {
                if !seen.insert(name.clone()) {
                    return Err(format!("duplicate action name '{}'", name));
                }
            }
        }

        seen.clear();
        for assert in &self.asserts {
            if let Some(name) = &assert.name {
                if !seen.insert(name.clone()) {
                    return Err(format!("duplicate assert name '{}'", name));
                }
            }
        }

        Ok(())
    }
}

/// Map a runner capability name to its default image reference
pub fn runner_image(runner_name: &str) -> Option<&'static str> {
    match runner_name {
        "rest-runner" => Some("testflow/rest-runner"),
        "sql-runner" => Some("testflow/sql-runner"),
        "kafka-runner" => Some("testflow/kafka-runner"),
        "s3-runner" => Some("testflow/s3-runner"),
        "grpc-runner" => Some("testflow/grpc-runner"),
        _ => None,
    }
}

/// Convert step config to runner env vars, prefixed with `RUNNER_`
pub fn config_to_runner_env(config: &HashMap<String, String>) -> HashMap<String, String> {
    config
        .iter()
        .map(|(key, value)| (format!("RUNNER_{}", key.to_uppercase()), value.clone()))
        .collect()
}
