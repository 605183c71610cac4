//! Step dependency graph
//!
//! Builds a directed acyclic graph from the declared step dependencies,
//! validates it once at workflow load, and classifies steps as ready or
//! blocked against the current run states. Edges never change after
//! construction.

use std::collections::{HashMap, HashSet};

use crate::engine::report::RunState;
use crate::workflow::StepDefinition;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Step '{step}' depends on undeclared step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Cyclic dependency detected between steps")]
    Cycle,

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Step '{0}' depends on itself")]
    SelfReference(String),
}

#[derive(Debug)]
pub struct StepGraph {
    dependencies: HashMap<String, Vec<String>>,
    execution_levels: Vec<Vec<String>>,
}

impl StepGraph {
    pub fn build(steps: &[StepDefinition]) -> Result<Self, GraphError> {
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();

        for step in steps {
            if dependencies.contains_key(&step.name) {
                return Err(GraphError::DuplicateStep(step.name.clone()));
            }
            dependencies.insert(step.name.clone(), step.depends_on.clone());
        }

        for (name, deps) in &dependencies {
            for dep in deps {
                if dep == name {
                    return Err(GraphError::SelfReference(name.clone()));
                }
                if !dependencies.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        step: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let execution_levels = Self::compute_execution_levels(&dependencies)?;

        Ok(Self {
            dependencies,
            execution_levels,
        })
    }

    fn compute_execution_levels(
        dependencies: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (name, deps) in dependencies {
            in_degree.entry(name.as_str()).or_insert(0);
            for dep in deps {
                *in_degree.entry(name.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(name.as_str());
            }
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut current_level: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&name, _)| name.to_string())
            .collect();

        current_level.sort();

        while !current_level.is_empty() {
            levels.push(current_level.clone());

            let mut next_level = Vec::new();
            for name in &current_level {
                if let Some(deps) = dependents.get(name.as_str()) {
                    for &dep in deps {
                        let degree = in_degree.get_mut(dep).unwrap();
                        *degree -= 1;
                        if *degree == 0 {
                            next_level.push(dep.to_string());
                        }
                    }
                }
            }
            next_level.sort();
            current_level = next_level;
        }

        let total_processed: usize = levels.iter().map(|l| l.len()).sum();
        if total_processed != dependencies.len() {
            return Err(GraphError::Cycle);
        }

        Ok(levels)
    }

    /// Pending steps whose dependencies have all passed
    pub fn ready(&self, states: &HashMap<String, RunState>) -> Vec<String> {
        let mut ready: Vec<String> = self
            .dependencies
            .iter()
            .filter(|(name, deps)| {
                states.get(name.as_str()) == Some(&RunState::Pending)
                    && deps
                        .iter()
                        .all(|dep| states.get(dep) == Some(&RunState::Passed))
            })
            .map(|(name, _)| name.clone())
            .collect();
        ready.sort();
        ready
    }

    /// Pending steps with at least one failed or skipped dependency,
    /// hence to be marked skipped
    pub fn blocked(&self, states: &HashMap<String, RunState>) -> Vec<String> {
        let mut blocked: Vec<String> = self
            .dependencies
            .iter()
            .filter(|(name, _)| states.get(name.as_str()) == Some(&RunState::Pending))
            .filter(|(name, _)| self.blocking_dependency(name, states).is_some())
            .map(|(name, _)| name.clone())
            .collect();
        blocked.sort();
        blocked
    }

    /// The first dependency of `name` that is failed or skipped, if any
    pub fn blocking_dependency(
        &self,
        name: &str,
        states: &HashMap<String, RunState>,
    ) -> Option<&str> {
        self.dependencies.get(name)?.iter().find_map(|dep| {
            match states.get(dep) {
                Some(RunState::Failed) | Some(RunState::Skipped) => Some(dep.as_str()),
                _ => None,
            }
        })
    }

    /// Transitive dependency closure of a step
    pub fn ancestors(&self, name: &str) -> HashSet<String> {
        let mut ancestors = HashSet::new();
        let mut stack: Vec<&str> = self
            .dependencies
            .get(name)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default();

        while let Some(dep) = stack.pop() {
            if ancestors.insert(dep.to_string()) {
                if let Some(deps) = self.dependencies.get(dep) {
                    stack.extend(deps.iter().map(String::as_str));
                }
            }
        }

        ancestors
    }

    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.dependencies.get(name).map(Vec::as_slice)
    }

    /// Topological layers; steps within a layer have no mutual ordering
    pub fn execution_levels(&self) -> &[Vec<String>] {
        &self.execution_levels
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.dependencies.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_step(name: &str, deps: Vec<&str>) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            description: None,
            depends_on: deps.into_iter().map(String::from).collect(),
            runner: Some("rest-runner".to_string()),
            image: None,
            config: Default::default(),
            volumes: vec![],
            template: None,
            actions: vec![],
            asserts: vec![],
            timeout: None,
        }
    }

    fn states(pairs: &[(&str, RunState)]) -> HashMap<String, RunState> {
        pairs
            .iter()
            .map(|(name, state)| (name.to_string(), *state))
            .collect()
    }

    #[test]
    fn test_simple_chain() {
        let steps = vec![
            make_step("seed", vec![]),
            make_step("send", vec!["seed"]),
            make_step("check", vec!["send"]),
        ];

        let graph = StepGraph::build(&steps).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.execution_levels().len(), 3);
        assert_eq!(graph.execution_levels()[0], vec!["seed"]);
        assert_eq!(graph.execution_levels()[1], vec!["send"]);
        assert_eq!(graph.execution_levels()[2], vec!["check"]);
    }

    #[test]
    fn test_diamond() {
        let steps = vec![
            make_step("top", vec![]),
            make_step("left", vec!["top"]),
            make_step("right", vec!["top"]),
            make_step("bottom", vec!["left", "right"]),
        ];

        let graph = StepGraph::build(&steps).unwrap();

        assert_eq!(graph.execution_levels().len(), 3);
        assert_eq!(graph.execution_levels()[1], vec!["left", "right"]);

        let ancestors = graph.ancestors("bottom");
        assert_eq!(ancestors.len(), 3);
        assert!(ancestors.contains("top"));
    }

    #[test]
    fn test_cycle_detected() {
        let steps = vec![
            make_step("a", vec!["c"]),
            make_step("b", vec!["a"]),
            make_step("c", vec!["b"]),
        ];

        let result = StepGraph::build(&steps);
        assert!(matches!(result, Err(GraphError::Cycle)));
    }

    #[test]
    fn test_acyclic_builds() {
        let steps = vec![
            make_step("a", vec![]),
            make_step("b", vec!["a"]),
            make_step("c", vec!["a", "b"]),
        ];

        assert!(StepGraph::build(&steps).is_ok());
    }

    #[test]
    fn test_unknown_dependency() {
        let steps = vec![make_step("send", vec!["missing"])];

        let result = StepGraph::build(&steps);
        assert!(matches!(result, Err(GraphError::UnknownDependency { .. })));
    }

    #[test]
    fn test_self_reference() {
        let steps = vec![make_step("loop", vec!["loop"])];

        let result = StepGraph::build(&steps);
        assert!(matches!(result, Err(GraphError::SelfReference(_))));
    }

    #[test]
    fn test_duplicate_step() {
        let steps = vec![make_step("same", vec![]), make_step("same", vec![])];

        let result = StepGraph::build(&steps);
        assert!(matches!(result, Err(GraphError::DuplicateStep(_))));
    }

    #[test]
    fn test_ready_and_blocked() {
        let steps = vec![
            make_step("seed", vec![]),
            make_step("send", vec!["seed"]),
            make_step("check", vec!["send"]),
            make_step("other", vec![]),
        ];
        let graph = StepGraph::build(&steps).unwrap();

        let run_states = states(&[
            ("seed", RunState::Passed),
            ("send", RunState::Pending),
            ("check", RunState::Pending),
            ("other", RunState::Pending),
        ]);
        assert_eq!(graph.ready(&run_states), vec!["other", "send"]);
        assert!(graph.blocked(&run_states).is_empty());

        let run_states = states(&[
            ("seed", RunState::Failed),
            ("send", RunState::Pending),
            ("check", RunState::Pending),
            ("other", RunState::Running),
        ]);
        assert_eq!(graph.blocked(&run_states), vec!["send"]);
        assert_eq!(graph.blocking_dependency("send", &run_states), Some("seed"));

        // Once send is marked skipped, the skip propagates to check
        let run_states = states(&[
            ("seed", RunState::Failed),
            ("send", RunState::Skipped),
            ("check", RunState::Pending),
            ("other", RunState::Running),
        ]);
        assert_eq!(graph.blocked(&run_states), vec!["check"]);
    }
}
