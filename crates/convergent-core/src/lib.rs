pub mod decide;
mod engine;
mod error;
mod fault;
mod metrics;
mod runner;
mod scheduler;
mod state;
mod strategy;
mod topology;
mod transport;
mod verifier;

pub use engine::{ChaosEngine, EngineSettings, RunReport};
pub use error::{FaultError, HarnessError, RequestFailure};
pub use fault::{render_partition, render_restart, CommandFaultInjector, FaultInjector, NoopFaultInjector};
pub use metrics::{create_stats, RunStats, SharedStats, StatsSnapshot};
pub use runner::{RequestRunner, RunnerReport};
pub use scheduler::{ChaosEvent, ChaosKind, ChaosScheduler};
pub use state::StateSet;
pub use strategy::{Operation, OperationStrategy, StateOperation};
pub use topology::{Endpoint, Node, Topology};
pub use transport::{build_transport, Command, HttpTransport, RequestResult, TcpTransport, Transport};
pub use verifier::{lost_writes, probe, verify, NodeProbe, StateSnapshot};
