//! Workflow types and definitions
//!
//! This module contains all types for defining and expanding workflows:
//! - `spec` - WorkflowSpec, StepDefinition, ActionDef, AssertDef, StepSpec
//! - `template` - Template expansion against state snapshots
//! - `loader` - Load workflow documents from files

pub mod loader;
pub mod spec;
pub mod template;

// Re-export all public types for convenience
pub use loader::{LoadError, WorkflowLoader};
pub use spec::{
    config_to_runner_env, runner_image, ActionDef, AssertDef, StepDefinition, StepSpec,
    VolumeSpec, WorkflowSpec,
};
pub use template::{Expander, TemplateError};
