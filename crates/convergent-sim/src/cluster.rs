//! In-memory replicated cluster.
//!
//! Every node keeps a grow-only set of accepted values. A write accepted by
//! one node is replicated at once to every peer it can reach; peers behind a
//! partition, or down for a restart, get a hint queued that is delivered once
//! the pair can talk again. After a heal and the end of all restarts every
//! node therefore holds the same set, which makes the cluster a convergent
//! reference for the harness.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use convergent_core::{
    Command, FaultError, FaultInjector, Node, RequestFailure, RequestResult, StateSet, Topology,
    Transport,
};
use tokio::sync::Mutex;
use tracing::debug;

/// Timing and failure knobs of a simulated cluster.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Time a node stays down during a restart.
    pub restart_duration: Duration,
    /// Service time of each client request.
    pub latency: Duration,
    /// Reject every partition request with a [`FaultError`].
    pub refuse_partitions: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            restart_duration: Duration::from_secs(3),
            latency: Duration::from_millis(1),
            refuse_partitions: false,
        }
    }
}

#[derive(Debug, Default)]
struct SimNode {
    values: BTreeSet<String>,
    restarting: bool,
    /// Undelivered replications: (origin, value).
    hints: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: HashMap<String, SimNode>,
    /// Nodes cut off from the rest, if a partition is active.
    isolated: Option<HashSet<String>>,
}

impl ClusterState {
    fn reachable(&self, a: &str, b: &str) -> bool {
        match &self.isolated {
            None => true,
            Some(isolated) => isolated.contains(a) == isolated.contains(b),
        }
    }

    fn replicate(&mut self, origin: &str, value: &str) {
        let peers: Vec<String> = self
            .nodes
            .keys()
            .filter(|name| name.as_str() != origin)
            .cloned()
            .collect();
        for peer in peers {
            let deliver = self.reachable(origin, &peer);
            let Some(node) = self.nodes.get_mut(&peer) else {
                continue;
            };
            if deliver && !node.restarting {
                node.values.insert(value.to_string());
            } else {
                node.hints.push((origin.to_string(), value.to_string()));
            }
        }
    }

    /// Deliver every hint whose origin can reach its target.
    fn flush_hints(&mut self) -> usize {
        let targets: Vec<String> = self.nodes.keys().cloned().collect();
        let mut delivered = 0;
        for target in targets {
            let hints = match self.nodes.get_mut(&target) {
                Some(node) if !node.restarting => std::mem::take(&mut node.hints),
                _ => continue,
            };
            let (ready, pending): (Vec<_>, Vec<_>) = hints
                .into_iter()
                .partition(|(origin, _)| self.reachable(origin, &target));
            if let Some(node) = self.nodes.get_mut(&target) {
                delivered += ready.len();
                node.values.extend(ready.into_iter().map(|(_, value)| value));
                node.hints = pending;
            }
        }
        delivered
    }
}

/// Snapshot of cluster-level fault bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStats {
    pub writes: usize,
    pub reads: usize,
    pub refused: usize,
    pub partitions: usize,
    pub heals: usize,
    pub restarts: usize,
}

/// Simulated cluster serving both the client protocol and fault requests.
pub struct SimCluster {
    topology: Arc<Topology>,
    config: SimConfig,
    state: Mutex<ClusterState>,
    writes: AtomicUsize,
    reads: AtomicUsize,
    refused: AtomicUsize,
    partitions: AtomicUsize,
    heals: AtomicUsize,
    restarts: AtomicUsize,
}

impl SimCluster {
    pub fn new(topology: Arc<Topology>, config: SimConfig) -> Self {
        let nodes = topology
            .iter()
            .map(|n| (n.name.clone(), SimNode::default()))
            .collect();
        SimCluster {
            topology,
            config,
            state: Mutex::new(ClusterState {
                nodes,
                isolated: None,
            }),
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            refused: AtomicUsize::new(0),
            partitions: AtomicUsize::new(0),
            heals: AtomicUsize::new(0),
            restarts: AtomicUsize::new(0),
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn stats(&self) -> ClusterStats {
        ClusterStats {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            partitions: self.partitions.load(Ordering::Relaxed),
            heals: self.heals.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }

    /// No partition is active and no node is restarting.
    pub async fn is_fully_healthy(&self) -> bool {
        let state = self.state.lock().await;
        state.isolated.is_none() && state.nodes.values().all(|n| !n.restarting)
    }

    pub async fn is_partitioned(&self) -> bool {
        self.state.lock().await.isolated.is_some()
    }

    /// Replications not yet delivered.
    pub async fn pending_hints(&self) -> usize {
        self.state
            .lock()
            .await
            .nodes
            .values()
            .map(|n| n.hints.len())
            .sum()
    }

    /// Values held by `node`, if it exists.
    pub async fn state_of(&self, node: &str) -> Option<StateSet> {
        let state = self.state.lock().await;
        state
            .nodes
            .get(node)
            .map(|n| n.values.iter().cloned().collect())
    }

    /// Add `value` to one node without replicating it.
    pub async fn inject_divergence(&self, node: &str, value: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.nodes.get_mut(node) {
            Some(n) => n.values.insert(value.to_string()),
            None => false,
        }
    }

    /// Seed every node with the same values.
    pub async fn preload<I, S>(&self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let mut state = self.state.lock().await;
        for node in state.nodes.values_mut() {
            node.values.extend(values.iter().cloned());
        }
    }

    fn refuse(&self, node: &Node) -> RequestResult {
        self.refused.fetch_add(1, Ordering::Relaxed);
        RequestResult::failed(&node.name, RequestFailure::Unavailable(node.name.clone()))
    }

    fn split(&self, isolated: &[Node], rest: &[Node]) -> Result<HashSet<String>, FaultError> {
        for node in isolated.iter().chain(rest) {
            if self.topology.get(&node.name).is_none() {
                return Err(FaultError::UnknownNode(node.name.clone()));
            }
        }
        if isolated.is_empty() || rest.is_empty() {
            return Err(FaultError::Other(
                "a partition needs nodes on both sides".to_string(),
            ));
        }
        Ok(isolated.iter().map(|n| n.name.clone()).collect())
    }
}

#[async_trait]
impl Transport for SimCluster {
    async fn request(&self, node: &Node, command: &Command) -> RequestResult {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        let mut state = self.state.lock().await;
        let Some(target) = state.nodes.get_mut(&node.name) else {
            return self.refuse(node);
        };
        if target.restarting {
            return self.refuse(node);
        }

        match command {
            Command::Get => {
                self.reads.fetch_add(1, Ordering::Relaxed);
                let values: StateSet = target.values.iter().cloned().collect();
                RequestResult::ok(&node.name, values.encode())
            }
            Command::Write(value) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                target.values.insert(value.clone());
                state.replicate(&node.name, value);
                RequestResult::ok(&node.name, "ok")
            }
        }
    }
}

#[async_trait]
impl FaultInjector for SimCluster {
    async fn partition(&self, isolated: &[Node], rest: &[Node]) -> Result<(), FaultError> {
        if self.config.refuse_partitions {
            return Err(FaultError::Other("simulated partition refusal".to_string()));
        }
        let isolated = self.split(isolated, rest)?;
        self.state.lock().await.isolated = Some(isolated);
        self.partitions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn heal(&self) -> Result<(), FaultError> {
        let mut state = self.state.lock().await;
        state.isolated = None;
        let delivered = state.flush_hints();
        self.heals.fetch_add(1, Ordering::Relaxed);
        debug!(delivered, "simulated heal");
        Ok(())
    }

    async fn restart(&self, node: &Node) -> Result<(), FaultError> {
        {
            let mut state = self.state.lock().await;
            let target = state
                .nodes
                .get_mut(&node.name)
                .ok_or_else(|| FaultError::UnknownNode(node.name.clone()))?;
            target.restarting = true;
        }
        self.restarts.fetch_add(1, Ordering::Relaxed);

        tokio::time::sleep(self.config.restart_duration).await;

        let mut state = self.state.lock().await;
        if let Some(target) = state.nodes.get_mut(&node.name) {
            target.restarting = false;
        }
        let delivered = state.flush_hints();
        debug!(node = %node.name, delivered, "simulated node back up");
        Ok(())
    }
}
