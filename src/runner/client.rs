//! Runner protocol client
//!
//! Issues Action/Assert/Healthcheck calls against a runner address.
//! Transient failures (connection refused/reset, attempt deadline exceeded)
//! are retried with bounded exponential backoff; application errors
//! returned by the runner surface immediately. The whole call, retries
//! included, is bounded by an outer per-action/per-assert timeout.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::workflow::{ActionDef, AssertDef};

use super::protocol::{self, AssertResult, WireReply, WireRequest};
use super::RunnerError;

/// Retry policy for transient protocol failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per retry
    pub base_delay: Duration,

    /// Backoff ceiling
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let delay = self.base_delay * 2u32.pow(retry.saturating_sub(1));
        delay.min(self.max_delay)
    }
}

/// Protocol client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub retry: RetryPolicy,

    /// Deadline for a single attempt; exceeding it counts as transient
    pub attempt_timeout: Duration,

    /// Outer bound for a whole call including retries
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(15),
        }
    }
}

/// Transport seam between the client and a runner address
#[async_trait]
pub trait RunnerTransport: Send + Sync {
    async fn call(&self, address: &str, request: &WireRequest) -> Result<WireReply, RunnerError>;
}

/// HTTP transport posting wire requests to `http://{address}/`
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, RunnerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RunnerError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RunnerTransport for HttpTransport {
    async fn call(&self, address: &str, request: &WireRequest) -> Result<WireReply, RunnerError> {
        let url = format!("http://{}/", address);

        let response = self.client.post(&url).json(request).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                RunnerError::Transport(e.to_string())
            } else {
                RunnerError::Application(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RunnerError::Transport(format!("runner returned {}", status)));
        }
        if status.is_client_error() {
            return Err(RunnerError::Application(format!("runner returned {}", status)));
        }

        response
            .json::<WireReply>()
            .await
            .map_err(|e| RunnerError::Transport(format!("malformed reply: {}", e)))
    }
}

/// Client for the runner request/reply protocol
#[derive(Clone)]
pub struct RunnerClient {
    transport: Arc<dyn RunnerTransport>,
    config: ClientConfig,
    cancel: watch::Receiver<bool>,
}

impl RunnerClient {
    pub fn new(
        transport: Arc<dyn RunnerTransport>,
        config: ClientConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            config,
            cancel,
        }
    }

    /// Execute an action on the runner, returning its decoded outputs
    pub async fn do_action(&self, address: &str, action: &ActionDef) -> Result<Value, RunnerError> {
        let request = protocol::action_request(action)?;
        let result = self.call_with_retry(address, request).await?;
        protocol::parse_action_outputs(&result)
    }

    /// Evaluate an assert on the runner, returning its verdict
    pub async fn do_assert(
        &self,
        address: &str,
        assert: &AssertDef,
    ) -> Result<AssertResult, RunnerError> {
        let request = protocol::assert_request(assert)?;
        let result = self.call_with_retry(address, request).await?;
        protocol::parse_assert_result(&result)
    }

    /// Lightweight readiness probe; a single attempt, never retried
    pub async fn healthcheck(&self, address: &str) -> bool {
        let request = protocol::healthcheck_request();
        let call = self.transport.call(address, &request);

        match tokio::time::timeout(self.config.attempt_timeout, call).await {
            Ok(Ok(reply)) => reply
                .result
                .map(|r| protocol::parse_ready(&r))
                .unwrap_or(false),
            Ok(Err(e)) => {
                debug!("healthcheck of {} failed: {}", address, e);
                false
            }
            Err(_) => {
                debug!("healthcheck of {} timed out", address);
                false
            }
        }
    }

    async fn call_with_retry(
        &self,
        address: &str,
        request: WireRequest,
    ) -> Result<Value, RunnerError> {
        let call_timeout = self.config.call_timeout;
        match tokio::time::timeout(call_timeout, self.retry_loop(address, &request)).await {
            Ok(result) => result,
            Err(_) => Err(RunnerError::Timeout(call_timeout)),
        }
    }

    async fn retry_loop(
        &self,
        address: &str,
        request: &WireRequest,
    ) -> Result<Value, RunnerError> {
        let mut cancel = self.cancel.clone();
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_transient: Option<RunnerError> = None;

        for attempt in 1..=max_attempts {
            if *cancel.borrow() {
                return Err(RunnerError::Cancelled);
            }

            if attempt > 1 {
                let delay = self.config.retry.delay(attempt - 1);
                debug!(
                    "retrying {} on {} (attempt {}/{}) after {:?}",
                    request.method, address, attempt, max_attempts, delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = cancel.changed() => {
                        if changed.is_ok() && *cancel.borrow() {
                            return Err(RunnerError::Cancelled);
                        }
                    }
                }
            }

            let call = self.transport.call(address, request);
            match tokio::time::timeout(self.config.attempt_timeout, call).await {
                Err(_) => {
                    warn!("{} attempt on {} exceeded deadline", request.method, address);
                    last_transient =
                        Some(RunnerError::Transport("attempt deadline exceeded".to_string()));
                }
                Ok(Ok(reply)) => {
                    if let Some(error) = reply.error {
                        return Err(RunnerError::Application(format!(
                            "[{}] {}",
                            error.code, error.message
                        )));
                    }
                    return Ok(reply.result.unwrap_or(Value::Null));
                }
                Ok(Err(e)) if e.is_transient() => {
                    warn!("{} on {} failed: {}", request.method, address, e);
                    last_transient = Some(e);
                }
                Ok(Err(e)) => return Err(e),
            }
        }

        Err(RunnerError::Transport(format!(
            "{} attempts exhausted: {}",
            max_attempts,
            last_transient
                .map(|e| e.to_string())
                .unwrap_or_else(|| "request failed".to_string())
        )))
    }
}
