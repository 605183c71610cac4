//! Engine error types

use crate::engine::graph::GraphError;
use crate::runner::RunnerError;
use crate::workflow::{LoadError, TemplateError};

/// Errors that can occur while loading or running a workflow.
///
/// Graph errors are fatal at workflow load; template and runner errors are
/// step-scoped during a run and only surface here from engine setup.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Dependency graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}
