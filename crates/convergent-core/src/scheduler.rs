use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::decide::{pick_one, pick_proper_subset, roll};
use crate::error::{FaultError, HarnessError};
use crate::fault::FaultInjector;
use crate::metrics::SharedStats;
use crate::topology::{Node, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChaosKind {
    Partition,
    Heal,
    Restart,
}

impl fmt::Display for ChaosKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChaosKind::Partition => write!(f, "partition"),
            ChaosKind::Heal => write!(f, "heal"),
            ChaosKind::Restart => write!(f, "restart"),
        }
    }
}

/// A fault the scheduler applied.
#[derive(Debug, Clone, Serialize)]
pub struct ChaosEvent {
    pub kind: ChaosKind,
    /// Isolated nodes for a partition, the restarted node for a restart,
    /// empty for a heal.
    pub targets: Vec<String>,
    /// Time since the scheduler started, on the runtime clock.
    pub elapsed_ms: u64,
    /// Scheduler start plus `elapsed_ms`.
    pub at: DateTime<Utc>,
}

/// Wall-clock anchor plus runtime clock, so event times follow paused time.
#[derive(Debug, Clone, Copy)]
struct EventClock {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl EventClock {
    fn start() -> Self {
        EventClock {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    fn event(&self, kind: ChaosKind, targets: Vec<String>) -> ChaosEvent {
        let elapsed = self.started.elapsed();
        let offset =
            chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        ChaosEvent {
            kind,
            targets,
            elapsed_ms: elapsed.as_millis() as u64,
            at: self.started_at + offset,
        }
    }
}

/// Partition state of the cluster as the scheduler sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionState {
    Healthy,
    Partitioned,
}

type RestartOutcome = (String, Result<(), FaultError>);

/// Partitions, heals and restarts nodes for a fixed number of cycles while
/// runners write.
pub struct ChaosScheduler {
    topology: Arc<Topology>,
    injector: Arc<dyn FaultInjector>,
    stats: SharedStats,
    cycles: usize,
    delay: Duration,
    restart_probability: f64,
    rng: ChaCha8Rng,
    state: PartitionState,
    restarting: HashSet<String>,
    restarts: JoinSet<RestartOutcome>,
    clock: EventClock,
    events: Vec<ChaosEvent>,
}

impl ChaosScheduler {
    pub fn new(
        topology: Arc<Topology>,
        injector: Arc<dyn FaultInjector>,
        stats: SharedStats,
        cycles: usize,
        delay: Duration,
        restart_probability: f64,
        rng: ChaCha8Rng,
    ) -> Self {
        ChaosScheduler {
            topology,
            injector,
            stats,
            cycles,
            delay,
            restart_probability,
            rng,
            state: PartitionState::Healthy,
            restarting: HashSet::new(),
            restarts: JoinSet::new(),
            clock: EventClock::start(),
            events: Vec::new(),
        }
    }

    /// Run `cycles` chaos cycles, the first one immediately and each held
    /// for `delay`, then heal and wait for in-flight restarts. The phase
    /// lasts `cycles * delay` plus the tail of the last restart.
    ///
    /// A fault that cannot be applied ends the run with
    /// [`HarnessError::Scheduling`]; in-flight restarts are cancelled.
    pub async fn run(mut self) -> Result<Vec<ChaosEvent>, HarnessError> {
        self.clock = EventClock::start();
        for cycle in 0..self.cycles {
            self.reap_finished()?;
            debug!(cycle, "chaos cycle");
            self.cycle().await?;
            tokio::time::sleep(self.delay).await;
        }

        self.finish().await?;
        Ok(self.events)
    }

    async fn cycle(&mut self) -> Result<(), HarnessError> {
        match self.state {
            PartitionState::Healthy => self.partition().await?,
            PartitionState::Partitioned => self.heal().await?,
        }

        if roll(&mut self.rng, self.restart_probability) {
            self.restart();
        }
        Ok(())
    }

    async fn partition(&mut self) -> Result<(), HarnessError> {
        let nodes = self.topology.nodes();
        let Some(picked) = pick_proper_subset(&mut self.rng, nodes.len()) else {
            debug!("single node cluster; skipping partition");
            return Ok(());
        };

        let mut isolated = Vec::with_capacity(picked.len());
        let mut rest = Vec::with_capacity(nodes.len() - picked.len());
        for (i, node) in nodes.iter().enumerate() {
            if picked.binary_search(&i).is_ok() {
                isolated.push(node.clone());
            } else {
                rest.push(node.clone());
            }
        }

        self.injector.partition(&isolated, &rest).await?;
        self.state = PartitionState::Partitioned;
        self.stats.record_partition();

        let targets: Vec<String> = isolated.iter().map(|n| n.name.clone()).collect();
        info!(isolated = ?targets, "partition applied");
        let event = self.clock.event(ChaosKind::Partition, targets);
        self.events.push(event);
        Ok(())
    }

    async fn heal(&mut self) -> Result<(), HarnessError> {
        self.injector.heal().await?;
        self.state = PartitionState::Healthy;
        self.stats.record_heal();
        info!("partition healed");
        let event = self.clock.event(ChaosKind::Heal, Vec::new());
        self.events.push(event);
        Ok(())
    }

    fn restart(&mut self) {
        let candidates: Vec<&Node> = self
            .topology
            .iter()
            .filter(|n| !self.restarting.contains(&n.name))
            .collect();
        let Some(node) = pick_one(&mut self.rng, &candidates).map(|n| (*n).clone()) else {
            debug!("every node is already restarting");
            return;
        };

        info!(node = %node.name, "restarting node");
        self.stats.record_restart();
        self.restarting.insert(node.name.clone());
        let event = self.clock.event(ChaosKind::Restart, vec![node.name.clone()]);
        self.events.push(event);

        let injector = self.injector.clone();
        self.restarts.spawn(async move {
            let result = injector.restart(&node).await;
            (node.name, result)
        });
    }

    fn settle_restart(&mut self, joined: Result<RestartOutcome, tokio::task::JoinError>) -> Result<(), HarnessError> {
        let (name, result) = joined?;
        self.restarting.remove(&name);
        result?;
        info!(node = %name, "node back up");
        Ok(())
    }

    fn reap_finished(&mut self) -> Result<(), HarnessError> {
        while let Some(joined) = self.restarts.try_join_next() {
            self.settle_restart(joined)?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), HarnessError> {
        if self.state == PartitionState::Partitioned {
            self.heal().await?;
        }
        while let Some(joined) = self.restarts.join_next().await {
            self.settle_restart(joined)?;
        }
        debug!(events = self.events.len(), "chaos scheduler finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::create_stats;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use std::sync::Mutex;

    /// Tracks applied faults; optionally fails every partition.
    #[derive(Default)]
    struct RecordingInjector {
        fail_partition: bool,
        partitioned: Mutex<bool>,
        restarting: Mutex<HashSet<String>>,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FaultInjector for RecordingInjector {
        async fn partition(&self, isolated: &[Node], rest: &[Node]) -> Result<(), FaultError> {
            if self.fail_partition {
                return Err(FaultError::Other("iptables unavailable".to_string()));
            }
            assert!(!isolated.is_empty() && !rest.is_empty());
            *self.partitioned.lock().unwrap() = true;
            self.log.lock().unwrap().push("partition".to_string());
            Ok(())
        }

        async fn heal(&self) -> Result<(), FaultError> {
            *self.partitioned.lock().unwrap() = false;
            self.log.lock().unwrap().push("heal".to_string());
            Ok(())
        }

        async fn restart(&self, node: &Node) -> Result<(), FaultError> {
            assert!(self.restarting.lock().unwrap().insert(node.name.clone()));
            tokio::time::sleep(Duration::from_secs(25)).await;
            self.restarting.lock().unwrap().remove(&node.name);
            Ok(())
        }
    }

    fn scheduler(
        nodes: usize,
        injector: Arc<RecordingInjector>,
        cycles: usize,
        restart_probability: f64,
        seed: u64,
    ) -> (ChaosScheduler, SharedStats) {
        let stats = create_stats();
        let scheduler = ChaosScheduler::new(
            Arc::new(Topology::locations("127.0.0.1", 10000, nodes).unwrap()),
            injector,
            stats.clone(),
            cycles,
            Duration::from_secs(10),
            restart_probability,
            ChaCha8Rng::seed_from_u64(seed),
        );
        (scheduler, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggles_and_ends_healed() {
        let injector = Arc::new(RecordingInjector::default());
        let (scheduler, stats) = scheduler(3, injector.clone(), 3, 0.0, 1);

        // An odd cycle count leaves the last partition for the final heal.
        let events = scheduler.run().await.unwrap();

        let kinds: Vec<ChaosKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChaosKind::Partition,
                ChaosKind::Heal,
                ChaosKind::Partition,
                ChaosKind::Heal
            ]
        );
        assert!(!*injector.partitioned.lock().unwrap());
        let snap = stats.snapshot();
        assert_eq!((snap.partitions, snap.heals, snap.restarts), (2, 2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_spans_every_cycle() {
        let injector = Arc::new(RecordingInjector::default());
        let (scheduler, _) = scheduler(3, injector, 4, 0.0, 2);

        let start = Instant::now();
        let events = scheduler.run().await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41));

        // First cycle fires at once, the rest one delay apart.
        let offsets: Vec<u64> = events.iter().map(|e| e.elapsed_ms / 1000).collect();
        assert_eq!(offsets, vec![0, 10, 20, 30]);
        assert!(events.windows(2).all(|w| w[0].at < w[1].at));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_out_restarts() {
        let injector = Arc::new(RecordingInjector::default());
        let (scheduler, stats) = scheduler(3, injector.clone(), 4, 1.0, 7);

        let events = scheduler.run().await.unwrap();

        assert!(injector.restarting.lock().unwrap().is_empty());
        assert!(stats.snapshot().restarts >= 1);
        // The injector asserts a node is never restarted twice at once.
        let restarts = events.iter().filter(|e| e.kind == ChaosKind::Restart).count();
        assert_eq!(restarts as u64, stats.snapshot().restarts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_node_skips_partitions() {
        let injector = Arc::new(RecordingInjector::default());
        let (scheduler, _) = scheduler(1, injector.clone(), 5, 1.0, 3);

        let events = scheduler.run().await.unwrap();

        assert!(injector.log.lock().unwrap().is_empty());
        assert!(events.iter().all(|e| e.kind == ChaosKind::Restart));
        assert!(!events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cycles_no_events() {
        let injector = Arc::new(RecordingInjector::default());
        let (scheduler, _) = scheduler(3, injector.clone(), 0, 1.0, 3);

        let events = scheduler.run().await.unwrap();
        assert!(events.is_empty());
        assert!(injector.log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partition_failure_is_scheduling_error() {
        let injector = Arc::new(RecordingInjector {
            fail_partition: true,
            ..Default::default()
        });
        let (scheduler, _) = scheduler(3, injector, 3, 0.0, 3);

        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(err, HarnessError::Scheduling(_)), "{:?}", err);
    }
}
