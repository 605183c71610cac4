//! Runner instance lifecycle
//!
//! Refcounted pool of live runner instances keyed by the signature of
//! `(image, config)`. Steps with identical signatures share one instance;
//! differing configs always get distinct instances because runner session
//! state is not interchangeable across configs. Instances are torn down,
//! best effort, when their last reference is released.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::workflow::{config_to_runner_env, VolumeSpec};

use super::client::RunnerClient;
use super::provision::Provisioner;
use super::RunnerError;

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Bound on provisioning plus the healthcheck poll
    pub provision_timeout: Duration,

    /// First healthcheck poll delay; doubles per poll
    pub health_poll_initial: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(60),
            health_poll_initial: Duration::from_millis(500),
        }
    }
}

/// Reference to a live runner instance
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    address: String,
    signature: String,
}

impl RunnerHandle {
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[derive(Debug)]
struct Instance {
    address: String,
    refs: usize,
}

/// Refcounted runner instance pool
pub struct RunnerPool {
    provisioner: Arc<dyn Provisioner>,
    client: RunnerClient,
    config: PoolConfig,
    instances: Mutex<HashMap<String, Instance>>,
}

impl RunnerPool {
    pub fn new(provisioner: Arc<dyn Provisioner>, client: RunnerClient, config: PoolConfig) -> Self {
        Self {
            provisioner,
            client,
            config,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Signature identifying an instance: image plus sorted config pairs
    pub fn signature(image: &str, config: &HashMap<String, String>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image.as_bytes());

        let mut pairs: Vec<_> = config.iter().collect();
        pairs.sort();
        for (key, value) in pairs {
            hasher.update(b"\n");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Acquire a healthy instance for `(image, config)`, reusing an
    /// existing one with the same signature or provisioning a new one
    pub async fn acquire(
        &self,
        image: &str,
        config: &HashMap<String, String>,
        volumes: &[VolumeSpec],
    ) -> Result<RunnerHandle, RunnerError> {
        let signature = Self::signature(image, config);
        let mut instances = self.instances.lock().await;

        if let Some(instance) = instances.get_mut(&signature) {
            if self.client.healthcheck(&instance.address).await {
                instance.refs += 1;
                debug!("reusing runner {} at {}", image, instance.address);
                return Ok(RunnerHandle {
                    address: instance.address.clone(),
                    signature,
                });
            }

            warn!("runner at {} no longer healthy, replacing", instance.address);
            let stale = instances.remove(&signature).unwrap();
            self.teardown_best_effort(&stale.address).await;
        }

        let env = config_to_runner_env(config);
        let address = self.provisioner.provision(image, &env, volumes).await?;

        if let Err(e) = self.wait_healthy(&address, image).await {
            self.teardown_best_effort(&address).await;
            return Err(e);
        }

        info!("provisioned runner {} at {}", image, address);
        instances.insert(
            signature.clone(),
            Instance {
                address: address.clone(),
                refs: 1,
            },
        );

        Ok(RunnerHandle { address, signature })
    }

    /// Release a reference; the instance is torn down at refcount zero.
    /// Teardown failures are logged, never propagated, since the run's
    /// correctness does not depend on cleanup succeeding.
    pub async fn release(&self, handle: RunnerHandle) {
        let mut instances = self.instances.lock().await;

        if let Some(instance) = instances.get_mut(&handle.signature) {
            instance.refs -= 1;
            if instance.refs == 0 {
                let instance = instances.remove(&handle.signature).unwrap();
                debug!("releasing last reference to runner at {}", instance.address);
                self.teardown_best_effort(&instance.address).await;
            }
        }
    }

    /// Tear down every remaining instance at the end of a run
    pub async fn drain(&self) {
        let mut instances = self.instances.lock().await;
        for (_, instance) in instances.drain() {
            self.teardown_best_effort(&instance.address).await;
        }
    }

    /// Number of live instances, for diagnostics
    pub async fn active_instances(&self) -> usize {
        self.instances.lock().await.len()
    }

    async fn wait_healthy(&self, address: &str, image: &str) -> Result<(), RunnerError> {
        let deadline = Instant::now() + self.config.provision_timeout;
        let mut delay = self.config.health_poll_initial;

        loop {
            tokio::time::sleep(delay).await;

            if self.client.healthcheck(address).await {
                return Ok(());
            }

            delay = (delay * 2).min(Duration::from_secs(8));
            if Instant::now() >= deadline {
                return Err(RunnerError::ProvisionTimeout {
                    image: image.to_string(),
                    timeout: self.config.provision_timeout,
                });
            }
        }
    }

    async fn teardown_best_effort(&self, address: &str) {
        if let Err(e) = self.provisioner.teardown(address).await {
            warn!("failed to tear down runner at {}: {}", address, e);
        }
    }
}
