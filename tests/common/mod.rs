//! Shared test doubles: a scripted runner transport and a counting
//! provisioner, so engine behavior can be exercised without real runner
//! processes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use testflow::runner::protocol::{WireError, WireReply, WireRequest};
use testflow::{Provisioner, RunnerError, RunnerTransport, VolumeSpec};

/// Provisioner handing out sequential fake addresses and counting calls
#[derive(Default)]
pub struct CountingProvisioner {
    pub provisions: AtomicUsize,
    pub teardowns: AtomicUsize,
}

impl CountingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Provisioner for CountingProvisioner {
    async fn provision(
        &self,
        image: &str,
        _env: &HashMap<String, String>,
        _volumes: &[VolumeSpec],
    ) -> Result<String, RunnerError> {
        let n = self.provisions.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-{}", image, n))
    }

    async fn teardown(&self, _address: &str) -> Result<(), RunnerError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One recorded protocol call: method, verb type, decoded params
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub verb: String,
    pub params: Value,
}

/// Transport scripted per action/assert type.
///
/// Unknown action types succeed with empty outputs; unknown assert types
/// pass. Healthchecks always report ready.
pub struct ScriptedTransport {
    action_outputs: HashMap<String, Value>,
    failing_actions: HashSet<String>,
    failing_asserts: HashSet<String>,
    action_delay: Duration,
    calls: Mutex<Vec<RecordedCall>>,
    running_actions: AtomicUsize,
    peak_actions: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            action_outputs: HashMap::new(),
            failing_actions: HashSet::new(),
            failing_asserts: HashSet::new(),
            action_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            running_actions: AtomicUsize::new(0),
            peak_actions: AtomicUsize::new(0),
        }
    }

    /// Script the outputs an action type produces
    pub fn with_action(mut self, action_type: &str, outputs: Value) -> Self {
        self.action_outputs.insert(action_type.to_string(), outputs);
        self
    }

    /// Make an action type fail with an application error
    pub fn failing_action(mut self, action_type: &str) -> Self {
        self.failing_actions.insert(action_type.to_string());
        self
    }

    /// Make an assert type report passed = false
    pub fn failing_assert(mut self, assert_type: &str) -> Self {
        self.failing_asserts.insert(assert_type.to_string());
        self
    }

    /// Latency added to every action call, to create overlap
    pub fn with_action_delay(mut self, delay: Duration) -> Self {
        self.action_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Verb types of all recorded action calls, in order
    pub fn action_types_called(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "Action")
            .map(|c| c.verb)
            .collect()
    }

    /// Verb types of all recorded assert calls, in order
    pub fn assert_types_called(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "Assert")
            .map(|c| c.verb)
            .collect()
    }

    /// Highest number of actions in flight at once
    pub fn peak_concurrent_actions(&self) -> usize {
        self.peak_actions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunnerTransport for ScriptedTransport {
    async fn call(&self, _address: &str, request: &WireRequest) -> Result<WireReply, RunnerError> {
        if request.method == "Healthcheck" {
            return Ok(WireReply {
                result: Some(json!({"ready": true})),
                error: None,
            });
        }

        let verb = request
            .payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params: Value = request
            .payload
            .get("params")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or(Value::Null);

        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method.clone(),
            verb: verb.clone(),
            params,
        });

        match request.method.as_str() {
            "Action" => {
                let running = self.running_actions.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_actions.fetch_max(running, Ordering::SeqCst);
                if !self.action_delay.is_zero() {
                    tokio::time::sleep(self.action_delay).await;
                }
                self.running_actions.fetch_sub(1, Ordering::SeqCst);

                if self.failing_actions.contains(&verb) {
                    return Ok(WireReply {
                        result: None,
                        error: Some(WireError {
                            code: 400,
                            message: format!("action '{}' rejected", verb),
                        }),
                    });
                }

                let outputs = self
                    .action_outputs
                    .get(&verb)
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                Ok(WireReply {
                    result: Some(json!({
                        "outputs": serde_json::to_string(&outputs).unwrap(),
                    })),
                    error: None,
                })
            }

            "Assert" => {
                let passed = !self.failing_asserts.contains(&verb);
                Ok(WireReply {
                    result: Some(json!({
                        "passed": passed,
                        "actual": "{\"observed\": true}",
                        "expected": "{\"observed\": true}",
                        "description": format!("scripted assert '{}'", verb),
                    })),
                    error: None,
                })
            }

            other => Err(RunnerError::Application(format!(
                "unknown method '{}'",
                other
            ))),
        }
    }
}
