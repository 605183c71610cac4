//! Test execution engine
//!
//! The engine core: dependency graph, state store, scheduler, and result
//! aggregation.
//!
//! - `graph` - step dependency DAG with ready/blocked classification
//! - `state` - versioned global state with snapshot reads
//! - `scheduler` - the control loop dispatching steps to runners
//! - `report` - outcome aggregation and the final run report
//! - `error` - engine-level error type

pub mod error;
pub mod graph;
pub mod report;
pub mod scheduler;
pub mod state;

pub use error::EngineError;
pub use graph::{GraphError, StepGraph};
pub use report::{
    ActionOutcome, Aggregator, AssertOutcome, RunReport, RunState, StepOutcome, StepReport,
};
pub use scheduler::{Engine, EngineConfig};
pub use state::{GlobalState, StateSnapshot};
