use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use convergent_core::{Command, Node, RequestFailure, RequestResult, Transport};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::Mutex;

/// Prefix used in error messages to distinguish injected faults from real errors.
pub const FAULT_PREFIX: &str = "[fault-injected]";

/// Configuration for transport fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability that a request fails before reaching the node (0.0-1.0).
    pub error_rate: f64,
    /// Probability that a delivered request loses its response (0.0-1.0).
    /// The node applied the write but the caller sees a timeout.
    pub lost_ack_rate: f64,
}

/// Statistics about injected faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub fault_count: usize,
    pub lost_ack_count: usize,
}

/// A transport wrapper that randomly fails requests.
pub struct FaultyTransport {
    inner: Arc<dyn Transport>,
    rng: Mutex<ChaCha8Rng>,
    config: FaultConfig,
    fault_count: AtomicUsize,
    lost_ack_count: AtomicUsize,
}

impl FaultyTransport {
    pub fn new(inner: Arc<dyn Transport>, rng: ChaCha8Rng, config: FaultConfig) -> Self {
        FaultyTransport {
            inner,
            rng: Mutex::new(rng),
            config,
            fault_count: AtomicUsize::new(0),
            lost_ack_count: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> FaultStats {
        FaultStats {
            fault_count: self.fault_count.load(Ordering::Relaxed),
            lost_ack_count: self.lost_ack_count.load(Ordering::Relaxed),
        }
    }

    async fn roll(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let roll: f64 = self.rng.lock().await.gen();
        roll < rate
    }

    /// A random injected failure (connection failure or timeout).
    async fn injected_failure(&self, node: &Node, command: &Command) -> RequestFailure {
        let use_timeout: bool = self.rng.lock().await.gen();
        if use_timeout {
            RequestFailure::Timeout {
                command: format!("{} {}", FAULT_PREFIX, command),
                endpoint: node.endpoint.to_string(),
            }
        } else {
            RequestFailure::ConnectionFailed {
                endpoint: node.endpoint.to_string(),
                source: Box::new(std::io::Error::other(format!(
                    "{} connection reset during {}",
                    FAULT_PREFIX, command
                ))),
            }
        }
    }
}

/// Returns true if the failure was produced by a [`FaultyTransport`].
pub fn is_injected_fault(failure: &RequestFailure) -> bool {
    match failure {
        RequestFailure::Timeout { command, .. } => command.starts_with(FAULT_PREFIX),
        RequestFailure::ConnectionFailed { source, .. } => {
            source.to_string().starts_with(FAULT_PREFIX)
        }
        _ => false,
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    async fn request(&self, node: &Node, command: &Command) -> RequestResult {
        if self.roll(self.config.error_rate).await {
            self.fault_count.fetch_add(1, Ordering::Relaxed);
            return RequestResult::failed(&node.name, self.injected_failure(node, command).await);
        }

        let result = self.inner.request(node, command).await;
        if result.is_success() && self.roll(self.config.lost_ack_rate).await {
            self.lost_ack_count.fetch_add(1, Ordering::Relaxed);
            return RequestResult::failed(
                &node.name,
                RequestFailure::Timeout {
                    command: format!("{} {}", FAULT_PREFIX, command),
                    endpoint: node.endpoint.to_string(),
                },
            );
        }
        result
    }
}
