//! Workflow document loader
//!
//! Load workflow YAML documents from files.

use std::path::Path;

use super::spec::WorkflowSpec;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },
}

pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn load_file(path: &Path) -> Result<WorkflowSpec, LoadError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| LoadError::Yaml {
            file: path.display().to_string(),
            error: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workflow.yaml");

        fs::write(
            &path,
            r#"
description: smoke test
version: "1"
tests:
  - name: ping
    runner: rest-runner
    actions:
      - type: GET
        params:
          url: http://localhost/health
"#,
        )
        .unwrap();

        let workflow = WorkflowLoader::load_file(&path).unwrap();
        assert_eq!(workflow.description.as_deref(), Some("smoke test"));
        assert_eq!(workflow.tests.len(), 1);
        assert_eq!(workflow.tests[0].name, "ping");
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "tests: [unclosed").unwrap();

        let result = WorkflowLoader::load_file(&path);
        assert!(matches!(result, Err(LoadError::Yaml { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let result = WorkflowLoader::load_file(Path::new("/no/such/workflow.yaml"));
        assert!(matches!(result, Err(LoadError::Io(_))));
    }
}
