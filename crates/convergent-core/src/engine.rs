use std::sync::Arc;
use std::time::Duration;

use convergent_config::HarnessConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::HarnessError;
use crate::fault::FaultInjector;
use crate::metrics::{create_stats, SharedStats, StatsSnapshot};
use crate::runner::{RequestRunner, RunnerReport};
use crate::scheduler::{ChaosEvent, ChaosScheduler};
use crate::state::StateSet;
use crate::strategy::{OperationStrategy, StateOperation};
use crate::topology::Topology;
use crate::transport::{Command, Transport};

/// Timing and randomness knobs of one run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Writes per runner and chaos cycles of the scheduler.
    pub iterations: usize,
    /// Pause between a runner's cycles.
    pub interval: Duration,
    /// Period of the chaos scheduler.
    pub delay: Duration,
    /// Restart probability per chaos cycle, in [0, 1].
    pub restart_probability: f64,
    /// Master seed. Drawn at random when absent.
    pub seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            iterations: 30,
            interval: Duration::from_millis(100),
            delay: Duration::from_secs(10),
            restart_probability: 0.2,
            seed: None,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        EngineSettings {
            iterations: config.iterations,
            interval: config.interval_duration(),
            delay: config.delay_duration(),
            restart_probability: config.restart_probability(),
            seed: config.seed,
        }
    }
}

/// Everything a finished chaos run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub seed: u64,
    /// State of the bootstrap node before the run.
    pub bootstrap: StateSet,
    /// One report per runner, ordered by runner id.
    pub runners: Vec<RunnerReport>,
    pub stats: StatsSnapshot,
    pub events: Vec<ChaosEvent>,
}

impl RunReport {
    /// Values some node acknowledged, across all runners.
    pub fn acknowledged(&self) -> impl Iterator<Item = &String> {
        self.runners.iter().flat_map(|r| r.acknowledged.iter())
    }

    /// Values the runners attempted to write, acknowledged or not.
    pub fn emitted(&self) -> impl Iterator<Item = &String> {
        self.runners.iter().flat_map(|r| r.emitted.iter())
    }
}

/// Drives request runners and the chaos scheduler against one cluster.
pub struct ChaosEngine {
    topology: Arc<Topology>,
    transport: Arc<dyn Transport>,
    injector: Arc<dyn FaultInjector>,
    settings: EngineSettings,
    stats: SharedStats,
    seed: u64,
    rng: ChaCha8Rng,
}

impl ChaosEngine {
    pub fn new(
        topology: Arc<Topology>,
        transport: Arc<dyn Transport>,
        injector: Arc<dyn FaultInjector>,
        settings: EngineSettings,
    ) -> Self {
        let seed = settings.seed.unwrap_or_else(rand::random);
        info!(seed, nodes = topology.len(), "chaos engine created");
        ChaosEngine {
            topology,
            transport,
            injector,
            settings,
            stats: create_stats(),
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// One [`StateOperation`] per runner, each in its own lane and with its
    /// own seed derived from the master seed.
    pub fn state_operations(&mut self, runners: usize, crash: f64) -> Vec<Box<dyn OperationStrategy>> {
        (0..runners)
            .map(|lane| {
                let rng = ChaCha8Rng::seed_from_u64(self.rng.gen());
                Box::new(StateOperation::new(crash, rng).with_lane(lane, runners))
                    as Box<dyn OperationStrategy>
            })
            .collect()
    }

    /// State of the first node (topology order) that answers a `get` with a
    /// decodable set. Empty when no node does.
    pub async fn bootstrap(&self) -> StateSet {
        for node in self.topology.iter() {
            let result = self.transport.request(node, &Command::Get).await;
            match result.outcome {
                Ok(payload) => match StateSet::decode(&payload) {
                    Ok(state) => {
                        debug!(node = %node.name, values = state.len(), "bootstrap state");
                        return state;
                    }
                    Err(reason) => {
                        warn!(node = %node.name, %reason, "undecodable bootstrap state");
                    }
                },
                Err(failure) => {
                    warn!(node = %node.name, error = %failure, "bootstrap query failed");
                }
            }
        }
        warn!("no node answered the bootstrap query; starting from an empty state");
        StateSet::new()
    }

    /// Run every strategy on its own runner while the scheduler injects
    /// faults. Returns once all runners are done, the scheduler has run its
    /// `iterations` cycles and the cluster is healed.
    pub async fn run(
        &mut self,
        mut strategies: Vec<Box<dyn OperationStrategy>>,
    ) -> Result<RunReport, HarnessError> {
        let bootstrap = self.bootstrap().await;
        for strategy in strategies.iter_mut() {
            strategy.init(&bootstrap);
        }

        let scheduler = ChaosScheduler::new(
            self.topology.clone(),
            self.injector.clone(),
            self.stats.clone(),
            self.settings.iterations,
            self.settings.delay,
            self.settings.restart_probability,
            ChaCha8Rng::seed_from_u64(self.rng.gen()),
        );
        let mut scheduler_handle = tokio::spawn(scheduler.run());

        let mut runners = JoinSet::new();
        for (id, strategy) in strategies.into_iter().enumerate() {
            let runner = RequestRunner::new(
                id,
                strategy,
                self.topology.clone(),
                self.transport.clone(),
                self.stats.clone(),
                ChaCha8Rng::seed_from_u64(self.rng.gen()),
                self.settings.iterations,
                self.settings.interval,
            );
            runners.spawn(runner.run());
        }
        info!(
            runners = runners.len(),
            iterations = self.settings.iterations,
            "chaos run started"
        );

        let mut reports = Vec::with_capacity(runners.len());
        let mut events = None;
        while events.is_none() || !runners.is_empty() {
            tokio::select! {
                joined = runners.join_next(), if !runners.is_empty() => match joined {
                    Some(Ok(report)) => reports.push(report),
                    Some(Err(e)) => {
                        runners.abort_all();
                        scheduler_handle.abort();
                        self.best_effort_heal().await;
                        return Err(e.into());
                    }
                    None => {}
                },
                finished = &mut scheduler_handle, if events.is_none() => match finished {
                    Ok(Ok(log)) => {
                        debug!(pending_runners = runners.len(), "chaos cycles complete");
                        events = Some(log);
                    }
                    Ok(Err(e)) => return Err(self.abort_run(&mut runners, e).await),
                    Err(e) => return Err(self.abort_run(&mut runners, e.into()).await),
                },
            }
        }
        let events = events.unwrap_or_default();

        reports.sort_by_key(|r| r.runner);
        let stats = self.stats.snapshot();
        info!(
            acknowledged = stats.writes_acknowledged,
            failed = stats.writes_failed,
            abandoned = stats.writes_abandoned,
            partitions = stats.partitions,
            restarts = stats.restarts,
            "chaos run finished"
        );

        Ok(RunReport {
            seed: self.seed,
            bootstrap,
            runners: reports,
            stats,
            events,
        })
    }

    async fn abort_run(
        &self,
        runners: &mut JoinSet<RunnerReport>,
        err: HarnessError,
    ) -> HarnessError {
        runners.abort_all();
        warn!(error = %err, "chaos run aborted");
        self.best_effort_heal().await;
        err
    }

    async fn best_effort_heal(&self) {
        if let Err(e) = self.injector.heal().await {
            warn!(error = %e, "heal after failed run did not succeed");
        }
    }
}
