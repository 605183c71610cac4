//! Instance provisioner boundary
//!
//! The engine only requires two operations from the surrounding
//! orchestration layer: provision a runner image into a reachable address
//! and tear that address down again. Cluster controllers supply their own
//! implementation; `ProcessProvisioner` covers local and development runs
//! by spawning runner binaries as child processes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

use crate::workflow::VolumeSpec;

use super::RunnerError;

/// Pluggable runner provisioning boundary
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a runner instance for `image` and return its address
    async fn provision(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        volumes: &[VolumeSpec],
    ) -> Result<String, RunnerError>;

    /// Destroy the instance at `address`
    async fn teardown(&self, address: &str) -> Result<(), RunnerError>;
}

/// Provisioner that runs runner images as local child processes.
///
/// The image reference is resolved as a binary name on `PATH`; the listen
/// port is handed to the process via `RUNNER_PORT` and volumes via
/// `RUNNER_VOLUMES` as `source:destination` pairs.
#[derive(Debug, Default)]
pub struct ProcessProvisioner {
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    async fn free_port() -> Result<u16, RunnerError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| RunnerError::Provision(format!("unable to reserve port: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| RunnerError::Provision(format!("unable to reserve port: {}", e)))?
            .port();
        Ok(port)
    }
}

#[async_trait]
impl Provisioner for ProcessProvisioner {
    async fn provision(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        volumes: &[VolumeSpec],
    ) -> Result<String, RunnerError> {
        let binary = which::which(image).map_err(|e| {
            RunnerError::Provision(format!("runner binary '{}' not found: {}", image, e))
        })?;

        let port = Self::free_port().await?;
        let address = format!("127.0.0.1:{}", port);

        let mut command = Command::new(&binary);
        command
            .kill_on_drop(true)
            .env("RUNNER_PORT", port.to_string())
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        if !volumes.is_empty() {
            let volumes = volumes
                .iter()
                .map(|v| format!("{}:{}", v.source, v.destination))
                .collect::<Vec<_>>()
                .join(",");
            command.env("RUNNER_VOLUMES", volumes);
        }

        debug!("spawning runner {} on {}", binary.display(), address);
        let child = command.spawn().map_err(|e| {
            RunnerError::Provision(format!("unable to spawn '{}': {}", binary.display(), e))
        })?;

        self.children.lock().await.insert(address.clone(), child);
        Ok(address)
    }

    async fn teardown(&self, address: &str) -> Result<(), RunnerError> {
        let child = self.children.lock().await.remove(address);
        if let Some(mut child) = child {
            debug!("stopping runner at {}", address);
            child
                .start_kill()
                .map_err(|e| RunnerError::Provision(format!("unable to stop runner: {}", e)))?;
            let _ = child.wait().await;
        }
        Ok(())
    }
}
