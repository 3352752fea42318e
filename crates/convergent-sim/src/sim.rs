use std::sync::Arc;
use std::time::Duration;

use convergent_config::HarnessConfig;
use convergent_core::{
    probe, verify, ChaosEngine, EngineSettings, HarnessError, RunReport, StateSet, Topology,
    Transport,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::cluster::{ClusterStats, SimCluster, SimConfig};
use crate::fault::{FaultConfig, FaultStats, FaultyTransport};

/// Shape of a simulated chaos run.
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub nodes: usize,
    pub runners: usize,
    pub iterations: usize,
    pub interval: Duration,
    pub delay: Duration,
    pub settle: Duration,
    /// Abandon probability of each runner, in [0, 1].
    pub crash: f64,
    /// Restart probability per chaos cycle, in [0, 1].
    pub restart_probability: f64,
    pub cluster: SimConfig,
    /// Wrap the runners' transport in a [`FaultyTransport`].
    pub transport_faults: Option<FaultConfig>,
}

impl Default for SimSettings {
    fn default() -> Self {
        SimSettings {
            nodes: 3,
            runners: 3,
            iterations: 30,
            interval: Duration::from_millis(100),
            delay: Duration::from_secs(1),
            settle: Duration::from_secs(5),
            crash: 0.0,
            restart_probability: 0.0,
            cluster: SimConfig::default(),
            transport_faults: None,
        }
    }
}

impl SimSettings {
    /// Settings matching a harness configuration.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let effective = config.effective();
        SimSettings {
            nodes: effective.nodes.len(),
            runners: effective.runners,
            iterations: effective.iterations,
            interval: effective.interval_duration(),
            delay: effective.delay_duration(),
            settle: effective.settle_duration(),
            crash: effective.crash_per_runner(),
            restart_probability: effective.restart_probability(),
            ..Default::default()
        }
    }
}

/// Everything a simulated run produced.
#[derive(Debug)]
pub struct SimOutcome {
    pub report: RunReport,
    /// Result of the convergence check after the settle window.
    pub verdict: Result<StateSet, HarnessError>,
    pub cluster_stats: ClusterStats,
    pub fault_stats: FaultStats,
}

/// A seeded chaos run against a [`SimCluster`].
pub struct Sim {
    pub seed: u64,
    pub settings: SimSettings,
    pub cluster: Arc<SimCluster>,
    faulty: Option<Arc<FaultyTransport>>,
}

impl Sim {
    pub fn new(seed: u64, settings: SimSettings) -> Result<Self, HarnessError> {
        let topology = Arc::new(Topology::locations(
            convergent_config::DEFAULT_HOST,
            convergent_config::DEFAULT_BASE_PORT,
            settings.nodes,
        )?);
        let cluster = Arc::new(SimCluster::new(topology, settings.cluster.clone()));
        let faulty = settings.transport_faults.clone().map(|config| {
            let rng = ChaCha8Rng::seed_from_u64(seed ^ 0xFA17_5EED);
            Arc::new(FaultyTransport::new(cluster.clone(), rng, config))
        });
        Ok(Sim {
            seed,
            settings,
            cluster,
            faulty,
        })
    }

    /// Transport the runners write through.
    fn runner_transport(&self) -> Arc<dyn Transport> {
        match &self.faulty {
            Some(faulty) => faulty.clone(),
            None => self.cluster.clone(),
        }
    }

    /// Chaos phase, settle window, then verification against the cluster.
    ///
    /// Errors of the chaos phase are returned; the verification result is
    /// part of the outcome.
    pub async fn run(&self) -> Result<SimOutcome, HarnessError> {
        let mut engine = ChaosEngine::new(
            self.cluster.topology().clone(),
            self.runner_transport(),
            self.cluster.clone(),
            EngineSettings {
                iterations: self.settings.iterations,
                interval: self.settings.interval,
                delay: self.settings.delay,
                restart_probability: self.settings.restart_probability,
                seed: Some(self.seed),
            },
        );
        let strategies = engine.state_operations(self.settings.runners, self.settings.crash);
        let report = engine.run(strategies).await?;

        tokio::time::sleep(self.settings.settle).await;
        let verdict = verify(self.cluster.topology(), self.cluster.as_ref()).await;

        Ok(SimOutcome {
            report,
            verdict,
            cluster_stats: self.cluster.stats(),
            fault_stats: self.faulty.as_ref().map(|f| f.stats()).unwrap_or_default(),
        })
    }

    /// Current state of every node. `None` for a node that does not answer.
    pub async fn node_states(&self) -> Vec<(String, Option<StateSet>)> {
        probe(self.cluster.topology(), self.cluster.as_ref())
            .await
            .into_iter()
            .map(|p| (p.node, p.state))
            .collect()
    }
}
