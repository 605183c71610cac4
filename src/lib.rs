//! # testflow
//!
//! A distributed integration-test orchestration engine. A workflow declares
//! named test steps with dependencies, config, and templated
//! actions/asserts; the engine resolves execution order from the dependency
//! graph, provisions one runner process per required test capability,
//! drives each runner through a uniform Action/Assert/Healthcheck protocol,
//! and produces a structured pass/fail report.
//!
//! ## Features
//!
//! - **Declarative YAML workflows** - steps, dependencies, and asserts in one document
//! - **Parallel execution** - independent steps run concurrently, bounded by config
//! - **Shared state** - passed steps' outputs feed later steps' template expansion
//! - **Language-agnostic runners** - any process implementing the wire protocol
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testflow::{Engine, EngineConfig, ProcessProvisioner, WorkflowSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let workflow_yaml = r#"
//! description: order pipeline smoke test
//! version: "1"
//! tests:
//!   - name: seed
//!     runner: sql-runner
//!     config:
//!       connection_string: postgres://test
//!     actions:
//!       - type: SQLQuery
//!         params:
//!           query: "INSERT INTO orders (id) VALUES (1)"
//!   - name: check
//!     depends_on: [seed]
//!     runner: rest-runner
//!     asserts:
//!       - type: StatusCode
//!         params:
//!           url: http://api:8080/orders/1
//!           expected: 200
//! "#;
//!
//!     let workflow = WorkflowSpec::from_yaml(workflow_yaml)?;
//!     let engine = Engine::new(EngineConfig::default(), Arc::new(ProcessProvisioner::new()))?;
//!     let report = engine.run(workflow).await?;
//!
//!     println!("run passed: {}", report.passed);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod runner;
pub mod workflow;

// Re-export main types
pub use engine::{
    ActionOutcome, Aggregator, AssertOutcome, Engine, EngineConfig, EngineError, GlobalState,
    GraphError, RunReport, RunState, StateSnapshot, StepGraph, StepOutcome, StepReport,
};
pub use runner::{
    AssertResult, ClientConfig, HttpTransport, PoolConfig, ProcessProvisioner, Provisioner,
    RetryPolicy, RunnerClient, RunnerError, RunnerHandle, RunnerPool, RunnerTransport, WireError,
    WireReply, WireRequest,
};
pub use workflow::{
    ActionDef, AssertDef, Expander, LoadError, StepDefinition, StepSpec, TemplateError,
    VolumeSpec, WorkflowLoader, WorkflowSpec,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{Engine, EngineConfig, EngineError, RunReport, RunState, StepGraph};
    pub use crate::runner::{
        ProcessProvisioner, Provisioner, RetryPolicy, RunnerClient, RunnerError, RunnerPool,
        RunnerTransport,
    };
    pub use crate::workflow::{
        ActionDef, AssertDef, Expander, StepDefinition, WorkflowLoader, WorkflowSpec,
    };
}
