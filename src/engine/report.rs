//! Result aggregation and reporting
//!
//! The aggregator is the single write path into the global state: step
//! completion events are merged one at a time, so every snapshot reflects a
//! consistent set of completed steps. It also accumulates the per-step
//! outcomes that become the final run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use crate::engine::state::{GlobalState, StateSnapshot};
use crate::workflow::WorkflowSpec;

/// Run state of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Ready,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Passed | RunState::Failed | RunState::Skipped)
    }
}

/// Recorded result of one executed action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub outputs: Value,
}

/// Recorded result of one executed assert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertOutcome {
    pub name: String,
    #[serde(rename = "type")]
    pub assert_type: String,
    pub passed: bool,
    pub actual: Value,
    pub expected: Value,
    pub description: String,
}

/// Full outcome of a dispatched step, handed to the aggregator
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub state: RunState,
    pub actions: Vec<ActionOutcome>,
    pub asserts: Vec<AssertOutcome>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepOutcome {
    /// Outcome for a step that failed before any action ran
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: RunState::Failed,
            actions: vec![],
            asserts: vec![],
            error: Some(error.into()),
            duration_ms: 0,
        }
    }
}

/// Per-step record in the final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub state: RunState,
    pub actions: Vec<ActionOutcome>,
    pub asserts: Vec<AssertOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Final structured record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug)]
struct AggregatorInner {
    state: GlobalState,
    outcomes: HashMap<String, StepReport>,
}

/// Serializes step completion events into the global state and the report
#[derive(Debug)]
pub struct Aggregator {
    inner: Mutex<AggregatorInner>,
}

impl Aggregator {
    pub fn new(globals: HashMap<String, Value>) -> Self {
        Self {
            inner: Mutex::new(AggregatorInner {
                state: GlobalState::new(globals),
                outcomes: HashMap::new(),
            }),
        }
    }

    /// Record a step's outcome: merge its action outputs into the global
    /// state (passed steps only) and append the outcome to the report
    pub async fn record(&self, step_name: &str, description: Option<String>, outcome: StepOutcome) {
        let mut inner = self.inner.lock().await;

        if outcome.state == RunState::Passed {
            let outputs: HashMap<String, Value> = outcome
                .actions
                .iter()
                .map(|a| (a.name.clone(), a.outputs.clone()))
                .collect();
            inner.state.merge_step(step_name, outputs);
        }

        inner.outcomes.insert(
            step_name.to_string(),
            StepReport {
                name: step_name.to_string(),
                description,
                state: outcome.state,
                actions: outcome.actions,
                asserts: outcome.asserts,
                error: outcome.error,
                duration_ms: outcome.duration_ms,
            },
        );
    }

    /// Record a step skipped because of a failed or skipped dependency
    pub async fn record_skipped(&self, step_name: &str, description: Option<String>, cause: &str) {
        let mut inner = self.inner.lock().await;
        inner.outcomes.insert(
            step_name.to_string(),
            StepReport {
                name: step_name.to_string(),
                description,
                state: RunState::Skipped,
                actions: vec![],
                asserts: vec![],
                error: Some(format!("skipped: dependency '{}' did not pass", cause)),
                duration_ms: 0,
            },
        );
    }

    /// Consistent snapshot of the global state
    pub async fn snapshot(&self) -> StateSnapshot {
        self.inner.lock().await.state.snapshot()
    }

    /// Snapshot restricted to a step's ancestor outputs
    pub async fn snapshot_for(&self, ancestors: &HashSet<String>) -> StateSnapshot {
        self.snapshot().await.restricted_to(ancestors)
    }

    /// Build the final report once every step is terminal.
    ///
    /// Overall status is passed iff at least one step ran and every
    /// non-skipped step passed.
    pub async fn finalize(
        &self,
        workflow: &WorkflowSpec,
        run_id: String,
        started_at: DateTime<Utc>,
    ) -> RunReport {
        let mut inner = self.inner.lock().await;

        let steps: Vec<StepReport> = workflow
            .tests
            .iter()
            .map(|def| {
                inner.outcomes.remove(&def.name).unwrap_or(StepReport {
                    name: def.name.clone(),
                    description: def.description.clone(),
                    state: RunState::Skipped,
                    actions: vec![],
                    asserts: vec![],
                    error: Some("skipped: never dispatched".to_string()),
                    duration_ms: 0,
                })
            })
            .collect();

        let any_ran = steps
            .iter()
            .any(|s| matches!(s.state, RunState::Passed | RunState::Failed));
        let all_passed = steps
            .iter()
            .filter(|s| s.state != RunState::Skipped)
            .all(|s| s.state == RunState::Passed);

        RunReport {
            run_id,
            description: workflow.description.clone(),
            passed: any_ran && all_passed,
            started_at,
            finished_at: Utc::now(),
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow(names: &[&str]) -> WorkflowSpec {
        if names.is_empty() {
            return WorkflowSpec::from_yaml("tests: []").unwrap();
        }
        let yaml = names
            .iter()
            .map(|n| format!("  - name: {}\n    runner: rest-runner\n", n))
            .collect::<String>();
        WorkflowSpec::from_yaml(&format!("tests:\n{}", yaml)).unwrap()
    }

    fn passed_outcome(action_name: &str, outputs: Value) -> StepOutcome {
        StepOutcome {
            state: RunState::Passed,
            actions: vec![ActionOutcome {
                name: action_name.to_string(),
                action_type: "POST".to_string(),
                outputs,
            }],
            asserts: vec![],
            error: None,
            duration_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_record_merges_passed_outputs() {
        let aggregator = Aggregator::new(HashMap::new());

        aggregator
            .record("seed", None, passed_outcome("put0", json!({"key": "abc"})))
            .await;

        let snapshot = aggregator.snapshot().await;
        assert_eq!(snapshot.steps["seed"]["put0"], json!({"key": "abc"}));
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test]
    async fn test_failed_outputs_not_merged() {
        let aggregator = Aggregator::new(HashMap::new());

        let mut outcome = passed_outcome("put0", json!({"key": "abc"}));
        outcome.state = RunState::Failed;
        aggregator.record("seed", None, outcome).await;

        let snapshot = aggregator.snapshot().await;
        assert!(snapshot.steps.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_overall_status() {
        let spec = workflow(&["seed", "send", "check"]);
        let aggregator = Aggregator::new(HashMap::new());

        aggregator
            .record("seed", None, passed_outcome("put0", json!({})))
            .await;
        aggregator
            .record("send", None, StepOutcome::failed("assert failed"))
            .await;
        aggregator.record_skipped("check", None, "send").await;

        let report = aggregator
            .finalize(&spec, "run-1".to_string(), Utc::now())
            .await;

        assert!(!report.passed);
        assert_eq!(report.step("seed").unwrap().state, RunState::Passed);
        assert_eq!(report.step("send").unwrap().state, RunState::Failed);
        assert_eq!(report.step("check").unwrap().state, RunState::Skipped);
        assert!(report
            .step("check")
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .contains("send"));
    }

    #[tokio::test]
    async fn test_finalize_requires_at_least_one_ran() {
        let spec = workflow(&[]);
        let aggregator = Aggregator::new(HashMap::new());

        let report = aggregator
            .finalize(&spec, "run-1".to_string(), Utc::now())
            .await;

        assert!(!report.passed);
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn test_report_serializes_to_json() {
        let spec = workflow(&["seed"]);
        let aggregator = Aggregator::new(HashMap::new());
        aggregator
            .record("seed", None, passed_outcome("put0", json!({"n": 1})))
            .await;

        let report = aggregator
            .finalize(&spec, "run-1".to_string(), Utc::now())
            .await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["passed"], json!(true));
        assert_eq!(json["steps"][0]["state"], json!("passed"));
        assert_eq!(json["steps"][0]["actions"][0]["outputs"]["n"], json!(1));
    }
}
