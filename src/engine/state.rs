//! Global state store
//!
//! Versioned key/value state accumulated over a run: seeded `globals` plus
//! one output namespace per passed step. Template expansion reads immutable
//! snapshots; writes are funneled through the aggregator after a step
//! completes, so no expansion ever observes partial output of an in-flight
//! sibling.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Mutable global state, owned by the aggregator
#[derive(Debug, Default)]
pub struct GlobalState {
    globals: HashMap<String, Value>,
    steps: HashMap<String, HashMap<String, Value>>,
    version: u64,
}

impl GlobalState {
    /// Create state seeded with the workflow's globals
    pub fn new(globals: HashMap<String, Value>) -> Self {
        Self {
            globals,
            steps: HashMap::new(),
            version: 0,
        }
    }

    /// Merge a passed step's action outputs under its name and bump the
    /// state version
    pub fn merge_step(&mut self, step_name: &str, outputs: HashMap<String, Value>) {
        self.steps.insert(step_name.to_string(), outputs);
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Take an immutable snapshot of the current state
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            globals: self.globals.clone(),
            steps: self.steps.clone(),
            version: self.version,
        }
    }
}

/// Immutable view of the global state handed to template expansion
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateSnapshot {
    /// Values seeded at run start
    pub globals: HashMap<String, Value>,

    /// Recorded outputs of passed steps: step name -> action name -> outputs
    pub steps: HashMap<String, HashMap<String, Value>>,

    /// State version the snapshot was taken at
    pub version: u64,
}

impl StateSnapshot {
    /// Restrict the visible step outputs to the given set of step names.
    ///
    /// Expansion hands each step a snapshot restricted to its transitive
    /// dependencies, so a step observes exactly its ancestors' outputs and
    /// never the outputs of unrelated steps that happen to have finished.
    pub fn restricted_to(mut self, step_names: &HashSet<String>) -> Self {
        self.steps.retain(|name, _| step_names.contains(name));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_bumps_version() {
        let mut state = GlobalState::new(HashMap::new());
        assert_eq!(state.version(), 0);

        let mut outputs = HashMap::new();
        outputs.insert("put0".to_string(), json!({"key": "abc"}));
        state.merge_step("seed", outputs);

        assert_eq!(state.version(), 1);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.steps["seed"]["put0"], json!({"key": "abc"}));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let mut state = GlobalState::new(HashMap::new());

        let mut outputs = HashMap::new();
        outputs.insert("a0".to_string(), json!(1));
        state.merge_step("first", outputs);

        let snapshot = state.snapshot();

        let mut outputs = HashMap::new();
        outputs.insert("b0".to_string(), json!(2));
        state.merge_step("second", outputs);

        assert!(snapshot.steps.contains_key("first"));
        assert!(!snapshot.steps.contains_key("second"));
        assert_eq!(snapshot.version, 1);
        assert_eq!(state.version(), 2);
    }

    #[test]
    fn test_restricted_snapshot() {
        let mut state = GlobalState::new(HashMap::new());
        state.merge_step("a", HashMap::new());
        state.merge_step("b", HashMap::new());

        let ancestors: HashSet<String> = ["a".to_string()].into_iter().collect();
        let snapshot = state.snapshot().restricted_to(&ancestors);

        assert!(snapshot.steps.contains_key("a"));
        assert!(!snapshot.steps.contains_key("b"));
    }

    #[test]
    fn test_globals_survive_merges() {
        let mut globals = HashMap::new();
        globals.insert("base_url".to_string(), json!("http://api:8080"));
        let mut state = GlobalState::new(globals);

        state.merge_step("seed", HashMap::new());

        let snapshot = state.snapshot();
        assert_eq!(snapshot.globals["base_url"], json!("http://api:8080"));
    }
}
