pub mod cluster;
pub mod fault;
pub mod sim;

pub use cluster::{ClusterStats, SimCluster, SimConfig};
pub use fault::{FaultConfig, FaultyTransport};
pub use sim::{Sim, SimOutcome, SimSettings};
