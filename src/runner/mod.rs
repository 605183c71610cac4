//! Runner communication and lifecycle
//!
//! This module owns everything between the engine and its external runner
//! processes:
//! - `protocol` - wire envelope for Action/Assert/Healthcheck calls
//! - `client` - protocol client with retry, backoff, and timeouts
//! - `lifecycle` - refcounted runner instance pool keyed by config signature
//! - `provision` - pluggable provisioner boundary plus a local process impl

use std::time::Duration;

pub mod client;
pub mod lifecycle;
pub mod protocol;
pub mod provision;

pub use client::{ClientConfig, HttpTransport, RetryPolicy, RunnerClient, RunnerTransport};
pub use lifecycle::{PoolConfig, RunnerHandle, RunnerPool};
pub use protocol::{AssertResult, WireError, WireReply, WireRequest};
pub use provision::{ProcessProvisioner, Provisioner};

/// Common error type for runner operations
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Failed to provision runner: {0}")]
    Provision(String),

    #[error("Runner '{image}' not healthy within {timeout:?}")]
    ProvisionTimeout { image: String, timeout: Duration },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Runner error: {0}")]
    Application(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl RunnerError {
    /// Transient failures are retried; everything else surfaces immediately
    pub fn is_transient(&self) -> bool {
        matches!(self, RunnerError::Transport(_))
    }
}
