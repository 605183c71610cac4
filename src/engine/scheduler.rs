//! Run scheduler
//!
//! The control loop driving a whole run: recompute ready/blocked sets from
//! the dependency graph, mark blocked steps skipped, dispatch ready steps
//! concurrently up to the parallelism bound, and advance the graph as
//! completions arrive. Each dispatched step expands its template against a
//! fresh snapshot, acquires a runner, executes actions strictly in order
//! (aborting on the first action error), then asserts strictly in order
//! (collecting every verdict), releases the runner, and records its outcome.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::error::EngineError;
use crate::engine::graph::StepGraph;
use crate::engine::report::{
    ActionOutcome, Aggregator, AssertOutcome, RunReport, RunState, StepOutcome,
};
use crate::runner::{
    ClientConfig, HttpTransport, PoolConfig, Provisioner, RunnerClient, RunnerPool,
    RunnerTransport,
};
use crate::workflow::{Expander, StepDefinition, StepSpec, WorkflowSpec};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on concurrently running steps
    pub max_parallel: usize,

    /// Optional bound on the whole run; on expiry in-flight protocol calls
    /// are cancelled and uncompleted steps fail with a timeout cause
    pub run_timeout: Option<Duration>,

    /// Default bound on a step's action/assert phases; a step's own
    /// `timeout` overrides it
    pub step_timeout: Duration,

    /// Healthcheck each runner immediately before use, failing the step
    /// fast if it became unhealthy since acquisition
    pub precheck_runners: bool,

    pub client: ClientConfig,
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            run_timeout: None,
            step_timeout: Duration::from_secs(60),
            precheck_runners: true,
            client: ClientConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// Test execution engine
pub struct Engine {
    config: EngineConfig,
    provisioner: Arc<dyn Provisioner>,
    transport: Arc<dyn RunnerTransport>,
}

impl Engine {
    /// Create an engine using the HTTP transport for runner calls
    pub fn new(
        config: EngineConfig,
        provisioner: Arc<dyn Provisioner>,
    ) -> Result<Self, EngineError> {
        let transport = Arc::new(HttpTransport::new(config.client.attempt_timeout)?);
        Ok(Self {
            config,
            provisioner,
            transport,
        })
    }

    /// Create an engine with a custom transport
    pub fn with_transport(
        config: EngineConfig,
        provisioner: Arc<dyn Provisioner>,
        transport: Arc<dyn RunnerTransport>,
    ) -> Self {
        Self {
            config,
            provisioner,
            transport,
        }
    }

    /// Run a workflow to completion and produce its report.
    ///
    /// Graph validation failures (cycles, unknown dependencies) abort the
    /// run before any step is scheduled. Everything after that is
    /// step-scoped: a failing step only prevents its dependents from
    /// running.
    #[instrument(skip(self, workflow))]
    pub async fn run(&self, workflow: WorkflowSpec) -> Result<RunReport, EngineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!("starting run {} with {} steps", run_id, workflow.tests.len());

        let graph = Arc::new(StepGraph::build(&workflow.tests)?);
        let aggregator = Arc::new(Aggregator::new(workflow.globals.clone()));
        let expander = Arc::new(Expander::new());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let client = RunnerClient::new(
            self.transport.clone(),
            self.config.client.clone(),
            cancel_rx,
        );
        let pool = Arc::new(RunnerPool::new(
            self.provisioner.clone(),
            client.clone(),
            self.config.pool.clone(),
        ));

        let definitions: HashMap<String, StepDefinition> = workflow
            .tests
            .iter()
            .map(|def| (def.name.clone(), def.clone()))
            .collect();
        let mut states: HashMap<String, RunState> = workflow
            .tests
            .iter()
            .map(|def| (def.name.clone(), RunState::Pending))
            .collect();

        let (done_tx, mut done_rx) = mpsc::channel::<(String, RunState)>(states.len().max(1));
        let deadline = self.config.run_timeout.map(|t| Instant::now() + t);
        let max_parallel = self.config.max_parallel.max(1);
        let mut in_flight = 0usize;
        let mut timed_out = false;

        loop {
            // Skip propagation runs to a fixpoint: skipping a step can block
            // its own dependents
            loop {
                let blocked = graph.blocked(&states);
                if blocked.is_empty() {
                    break;
                }
                for name in blocked {
                    let cause = graph
                        .blocking_dependency(&name, &states)
                        .unwrap_or("unknown")
                        .to_string();
                    warn!("skipping step {}: dependency '{}' did not pass", name, cause);
                    states.insert(name.clone(), RunState::Skipped);
                    let description =
                        definitions.get(&name).and_then(|d| d.description.clone());
                    aggregator.record_skipped(&name, description, &cause).await;
                }
            }

            if !timed_out {
                for name in graph.ready(&states) {
                    states.insert(name, RunState::Ready);
                }

                let mut ready: Vec<String> = states
                    .iter()
                    .filter(|(_, state)| **state == RunState::Ready)
                    .map(|(name, _)| name.clone())
                    .collect();
                ready.sort();

                for name in ready {
                    if in_flight >= max_parallel {
                        break;
                    }
                    states.insert(name.clone(), RunState::Running);
                    in_flight += 1;

                    let task = StepTask {
                        definition: definitions.get(&name).unwrap().clone(),
                        ancestors: graph.ancestors(&name),
                        expander: expander.clone(),
                        pool: pool.clone(),
                        client: client.clone(),
                        aggregator: aggregator.clone(),
                        precheck: self.config.precheck_runners,
                        default_step_timeout: self.config.step_timeout,
                    };
                    let done_tx = done_tx.clone();
                    tokio::spawn(async move {
                        let name = task.definition.name.clone();
                        let description = task.definition.description.clone();
                        let outcome = task.execute().await;
                        let state = outcome.state;
                        task.aggregator.record(&name, description, outcome).await;
                        let _ = done_tx.send((name, state)).await;
                    });
                }
            }

            if states.values().all(RunState::is_terminal) {
                break;
            }
            if in_flight == 0 {
                // Unreachable for an acyclic graph: every pending step
                // either became ready (dispatched above) or blocked
                // (skipped above)
                error!("scheduler stalled with no runnable steps, aborting run");
                break;
            }

            tokio::select! {
                completed = done_rx.recv() => {
                    if let Some((name, state)) = completed {
                        debug!("step {} finished as {:?}", name, state);
                        states.insert(name, state);
                        in_flight -= 1;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() && !timed_out =>
                {
                    warn!("run timeout reached, cancelling in-flight steps");
                    let _ = cancel_tx.send(true);
                    timed_out = true;

                    let undispatched: Vec<String> = states
                        .iter()
                        .filter(|(_, state)| {
                            matches!(state, RunState::Pending | RunState::Ready)
                        })
                        .map(|(name, _)| name.clone())
                        .collect();
                    for name in undispatched {
                        states.insert(name.clone(), RunState::Failed);
                        let description =
                            definitions.get(&name).and_then(|d| d.description.clone());
                        aggregator
                            .record(
                                &name,
                                description,
                                StepOutcome::failed("run timeout exceeded"),
                            )
                            .await;
                    }
                }
            }
        }

        pool.drain().await;

        let report = aggregator.finalize(&workflow, run_id, started_at).await;
        info!(
            "run {} finished: {}",
            report.run_id,
            if report.passed { "passed" } else { "failed" }
        );
        Ok(report)
    }
}

/// Everything one dispatched step needs to execute
struct StepTask {
    definition: StepDefinition,
    ancestors: HashSet<String>,
    expander: Arc<Expander>,
    pool: Arc<RunnerPool>,
    client: RunnerClient,
    aggregator: Arc<Aggregator>,
    precheck: bool,
    default_step_timeout: Duration,
}

impl StepTask {
    #[instrument(skip(self), fields(step = %self.definition.name))]
    async fn execute(&self) -> StepOutcome {
        let started = std::time::Instant::now();
        let name = &self.definition.name;
        info!("executing step {}", name);

        // Expansion uses the freshest snapshot, restricted to this step's
        // ancestors
        let snapshot = self.aggregator.snapshot_for(&self.ancestors).await;
        let spec = match self.expander.expand(&self.definition, &snapshot) {
            Ok(spec) => spec,
            Err(e) => {
                error!("template expansion of step {} failed: {}", name, e);
                return StepOutcome::failed(format!("template error: {}", e));
            }
        };

        let handle = match self
            .pool
            .acquire(&spec.image, &spec.config, &spec.volumes)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                error!("unable to acquire runner for step {}: {}", name, e);
                let mut outcome = StepOutcome::failed(e.to_string());
                outcome.duration_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
        };

        if self.precheck && !self.client.healthcheck(handle.address()).await {
            warn!("runner for step {} became unhealthy before use", name);
            self.pool.release(handle).await;
            let mut outcome = StepOutcome::failed("runner became unhealthy before use");
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            return outcome;
        }

        let step_timeout = self
            .definition
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(self.default_step_timeout);

        let mut actions = Vec::new();
        let mut asserts = Vec::new();
        let error = match tokio::time::timeout(
            step_timeout,
            self.run_phases(&spec, handle.address(), &mut actions, &mut asserts),
        )
        .await
        {
            Ok(error) => error,
            Err(_) => {
                warn!("step {} timed out after {:?}", name, step_timeout);
                Some(format!("step timed out after {}s", step_timeout.as_secs()))
            }
        };

        self.pool.release(handle).await;

        let failed_asserts: Vec<&str> = asserts
            .iter()
            .filter(|a| !a.passed)
            .map(|a| a.name.as_str())
            .collect();
        let passed = error.is_none() && failed_asserts.is_empty();
        let error = error.or_else(|| {
            if failed_asserts.is_empty() {
                None
            } else {
                Some(format!("assert(s) did not pass: {}", failed_asserts.join(", ")))
            }
        });

        StepOutcome {
            state: if passed { RunState::Passed } else { RunState::Failed },
            actions,
            asserts,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Actions strictly in declared order, aborting on the first error;
    /// then asserts strictly in declared order, continuing past failed
    /// verdicts so the report carries the complete picture
    async fn run_phases(
        &self,
        spec: &StepSpec,
        address: &str,
        actions: &mut Vec<ActionOutcome>,
        asserts: &mut Vec<AssertOutcome>,
    ) -> Option<String> {
        for action in &spec.actions {
            let action_name = action
                .name
                .clone()
                .unwrap_or_else(|| action.action_type.clone());
            match self.client.do_action(address, action).await {
                Ok(outputs) => {
                    debug!("action {} completed", action_name);
                    actions.push(ActionOutcome {
                        name: action_name,
                        action_type: action.action_type.clone(),
                        outputs,
                    });
                }
                Err(e) => {
                    error!("action {} failed: {}", action_name, e);
                    return Some(format!("action '{}' failed: {}", action_name, e));
                }
            }
        }

        for assert in &spec.asserts {
            let assert_name = assert
                .name
                .clone()
                .unwrap_or_else(|| assert.assert_type.clone());
            match self.client.do_assert(address, assert).await {
                Ok(result) => {
                    debug!(
                        "assert {} evaluated: passed={}",
                        assert_name, result.passed
                    );
                    asserts.push(AssertOutcome {
                        name: assert_name,
                        assert_type: assert.assert_type.clone(),
                        passed: result.passed,
                        actual: result.actual,
                        expected: result.expected,
                        description: result.description,
                    });
                }
                Err(e) => {
                    error!("assert {} failed: {}", assert_name, e);
                    return Some(format!("assert '{}' failed: {}", assert_name, e));
                }
            }
        }

        None
    }
}
