use std::sync::Arc;
use std::time::Duration;

use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::decide::pick_one;
use crate::metrics::SharedStats;
use crate::strategy::{Operation, OperationStrategy};
use crate::topology::Topology;
use crate::transport::{Command, Transport};

/// Outcome of one request runner.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunnerReport {
    pub runner: usize,
    /// Every value the strategy produced, in issue order.
    pub emitted: Vec<String>,
    /// Values a node confirmed.
    pub acknowledged: Vec<String>,
    /// Values whose write failed at the transport level. They may or may
    /// not have been applied.
    pub failed: Vec<String>,
    pub abandoned: usize,
}

/// Paces writes from one strategy against the cluster.
pub struct RequestRunner {
    id: usize,
    strategy: Box<dyn OperationStrategy>,
    topology: Arc<Topology>,
    transport: Arc<dyn Transport>,
    stats: SharedStats,
    rng: ChaCha8Rng,
    iterations: usize,
    interval: Duration,
}

impl RequestRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        strategy: Box<dyn OperationStrategy>,
        topology: Arc<Topology>,
        transport: Arc<dyn Transport>,
        stats: SharedStats,
        rng: ChaCha8Rng,
        iterations: usize,
        interval: Duration,
    ) -> Self {
        RequestRunner {
            id,
            strategy,
            topology,
            transport,
            stats,
            rng,
            iterations,
            interval,
        }
    }

    /// Run all cycles. Node selection draws from the runner's own RNG, so a
    /// seeded runner always targets the same node sequence.
    pub async fn run(mut self) -> RunnerReport {
        let mut report = RunnerReport {
            runner: self.id,
            ..Default::default()
        };

        for cycle in 0..self.iterations {
            if cycle > 0 && !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }

            let Some(node) = pick_one(&mut self.rng, self.topology.nodes()) else {
                break;
            };

            let value = match self.strategy.operation(node, cycle) {
                Operation::Abandon => {
                    debug!(runner = self.id, node = %node.name, cycle, "write abandoned");
                    report.abandoned += 1;
                    self.stats.record_abandoned();
                    continue;
                }
                Operation::Write(value) => value,
            };

            report.emitted.push(value.clone());
            let result = self
                .transport
                .request(node, &Command::Write(value.clone()))
                .await;
            match result.outcome {
                Ok(_) => {
                    debug!(runner = self.id, node = %node.name, %value, "write acknowledged");
                    self.stats.record_acknowledged();
                    report.acknowledged.push(value);
                }
                Err(failure) => {
                    warn!(runner = self.id, node = %node.name, %value, error = %failure, "write failed");
                    self.stats.record_failed();
                    report.failed.push(value);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestFailure;
    use crate::metrics::create_stats;
    use crate::strategy::StateOperation;
    use crate::topology::Node;
    use crate::transport::RequestResult;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use std::sync::Mutex;

    /// Records writes; refuses every write aimed at `down`.
    #[derive(Default)]
    struct RecordingTransport {
        down: Option<String>,
        writes: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn request(&self, node: &Node, command: &Command) -> RequestResult {
            if self.down.as_deref() == Some(node.name.as_str()) {
                return RequestResult::failed(&node.name, RequestFailure::Unavailable(node.name.clone()));
            }
            if let Command::Write(value) = command {
                self.writes
                    .lock()
                    .unwrap()
                    .push((node.name.clone(), value.clone()));
            }
            RequestResult::ok(&node.name, "ok")
        }
    }

    fn runner(
        strategy: StateOperation,
        transport: Arc<RecordingTransport>,
        seed: u64,
        iterations: usize,
    ) -> (RequestRunner, SharedStats) {
        let stats = create_stats();
        let topology = Arc::new(Topology::locations("127.0.0.1", 10000, 3).unwrap());
        let runner = RequestRunner::new(
            0,
            Box::new(strategy),
            topology,
            transport,
            stats.clone(),
            ChaCha8Rng::seed_from_u64(seed),
            iterations,
            Duration::from_millis(100),
        );
        (runner, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_writes_every_cycle() {
        let transport = Arc::new(RecordingTransport::default());
        let (runner, stats) = runner(StateOperation::seeded(0.0, 1), transport.clone(), 7, 5);

        let report = runner.run().await;
        assert_eq!(report.acknowledged.len(), 5);
        assert_eq!(report.emitted, report.acknowledged);
        assert_eq!(stats.snapshot().writes_acknowledged, 5);

        let writes = transport.writes.lock().unwrap();
        assert_eq!(writes.len(), 5);
        // The value names the node it was sent to.
        for (node, value) in writes.iter() {
            assert!(value.starts_with(&format!("{} ", node)), "{} -> {}", node, value);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_paces_between_cycles() {
        let transport = Arc::new(RecordingTransport::default());
        let (runner, _) = runner(StateOperation::seeded(0.0, 1), transport, 7, 5);

        let start = tokio::time::Instant::now();
        runner.run().await;
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_survives_failed_writes() {
        let transport = Arc::new(RecordingTransport {
            down: Some("location2".to_string()),
            ..Default::default()
        });
        let (runner, stats) = runner(StateOperation::seeded(0.0, 1), transport, 11, 30);

        let report = runner.run().await;
        assert_eq!(report.acknowledged.len() + report.failed.len(), 30);
        assert!(!report.failed.is_empty());
        assert!(report.failed.iter().all(|v| v.starts_with("location2 ")));
        assert_eq!(stats.snapshot().writes_failed, report.failed.len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_counts_abandons() {
        let transport = Arc::new(RecordingTransport::default());
        let (runner, stats) = runner(StateOperation::seeded(1.0, 1), transport.clone(), 3, 10);

        let report = runner.run().await;
        assert_eq!(report.abandoned, 10);
        assert!(report.emitted.is_empty());
        assert!(transport.writes.lock().unwrap().is_empty());
        assert_eq!(stats.snapshot().writes_abandoned, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_selection_reproducible() {
        let a = Arc::new(RecordingTransport::default());
        let b = Arc::new(RecordingTransport::default());
        runner(StateOperation::seeded(0.0, 1), a.clone(), 42, 20).0.run().await;
        runner(StateOperation::seeded(0.0, 1), b.clone(), 42, 20).0.run().await;
        assert_eq!(*a.writes.lock().unwrap(), *b.writes.lock().unwrap());
    }
}
