use crate::state::StateSet;

/// A single request against one node failed. Never fatal on its own.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RequestFailure {
    /// No response within the configured timeout.
    #[error("Request '{command}' to {endpoint} timed out")]
    Timeout { command: String, endpoint: String },

    /// Connecting, sending, or reading failed.
    #[error("Connection to {endpoint} failed")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The node answered with something other than a response line.
    #[error("Protocol error from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    /// The node answered over HTTP with a non-success status.
    #[error("Node at {endpoint} answered with HTTP status {status}")]
    Status { endpoint: String, status: u16 },

    /// The node refused the request (restarting, isolated, or injected fault).
    #[error("Node '{0}' is unavailable")]
    Unavailable(String),
}

impl RequestFailure {
    /// Returns true if the same request may succeed once the fault clears.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestFailure::Timeout { .. } => true,
            RequestFailure::ConnectionFailed { .. } => true,
            RequestFailure::Unavailable(_) => true,
            RequestFailure::Status { status, .. } => *status >= 500,
            RequestFailure::Protocol { .. } => false,
        }
    }
}

/// The fault mechanism could not apply or undo a fault.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FaultError {
    /// The fault command could not be started.
    #[error("Failed to spawn fault command '{command}'")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The fault command ran but reported failure.
    #[error("Fault command '{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The named node is not part of the cluster.
    #[error("Unknown node '{0}'")]
    UnknownNode(String),

    /// Fault-specific failure reported by an injector implementation.
    #[error("{0}")]
    Other(String),
}

/// Errors that terminate a harness run.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// Empty or invalid node set. Raised before any unit starts.
    #[error("Topology error: {0}")]
    Topology(String),

    /// Replicas disagree on the final state.
    #[error(
        "State of node '{node}' {observed} does not match the states already collected: {}",
        format_collected(.collected)
    )]
    Consistency {
        node: String,
        observed: StateSet,
        collected: Vec<(String, StateSet)>,
    },

    /// A node did not answer the final state query.
    #[error("Failed to retrieve state of node '{node}'")]
    Unreachable {
        node: String,
        #[source]
        source: RequestFailure,
    },

    /// A partition or restart could not be applied or healed.
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] FaultError),

    /// A runner or the scheduler panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

fn format_collected(collected: &[(String, StateSet)]) -> String {
    collected
        .iter()
        .map(|(node, set)| format!("{}={}", node, set))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<convergent_config::ConfigError> for HarnessError {
    fn from(e: convergent_config::ConfigError) -> Self {
        match e {
            convergent_config::ConfigError::EmptyTopology => HarnessError::Topology(e.to_string()),
            _ => HarnessError::Config(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for HarnessError {
    fn from(e: tokio::task::JoinError) -> Self {
        HarnessError::Task(e.to_string())
    }
}
