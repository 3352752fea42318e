use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use convergent_config::FaultCommands;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::FaultError;
use crate::topology::Node;

/// The mechanism that realizes faults against the cluster.
///
/// The scheduler decides when and to whom; implementations decide how.
#[async_trait]
pub trait FaultInjector: Send + Sync + 'static {
    /// Prevent communication between `isolated` and `rest`.
    async fn partition(&self, isolated: &[Node], rest: &[Node]) -> Result<(), FaultError>;

    /// Remove every partition.
    async fn heal(&self) -> Result<(), FaultError>;

    /// Restart the node's process. Resolves once the node is back up.
    async fn restart(&self, node: &Node) -> Result<(), FaultError>;
}

/// Runs operator-supplied shell commands to apply faults.
///
/// A fault without a configured command is skipped with a log line.
#[derive(Debug, Clone)]
pub struct CommandFaultInjector {
    commands: FaultCommands,
}

impl CommandFaultInjector {
    pub fn new(commands: FaultCommands) -> Self {
        CommandFaultInjector { commands }
    }

    async fn run(&self, command: &str) -> Result<(), FaultError> {
        debug!(%command, "running fault command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(&self.commands.env)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FaultError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(FaultError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn names(nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(|n| n.name.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Expand `{nodes}`/`{rest}` in a partition template.
pub fn render_partition(template: &str, isolated: &[Node], rest: &[Node]) -> String {
    template
        .replace("{nodes}", &names(isolated))
        .replace("{rest}", &names(rest))
}

/// Expand `{node}`, `{host}` and `{port}` in a restart template.
pub fn render_restart(template: &str, node: &Node) -> String {
    template
        .replace("{node}", &node.name)
        .replace("{host}", &node.endpoint.host)
        .replace("{port}", &node.endpoint.port.to_string())
}

#[async_trait]
impl FaultInjector for CommandFaultInjector {
    async fn partition(&self, isolated: &[Node], rest: &[Node]) -> Result<(), FaultError> {
        match &self.commands.partition {
            Some(template) => self.run(&render_partition(template, isolated, rest)).await,
            None => {
                debug!("no partition command configured; skipping");
                Ok(())
            }
        }
    }

    async fn heal(&self) -> Result<(), FaultError> {
        match &self.commands.heal {
            Some(template) => self.run(template).await,
            None => {
                debug!("no heal command configured; skipping");
                Ok(())
            }
        }
    }

    async fn restart(&self, node: &Node) -> Result<(), FaultError> {
        match &self.commands.restart {
            Some(template) => self.run(&render_restart(template, node)).await,
            None => {
                debug!(node = %node.name, "no restart command configured; skipping");
                Ok(())
            }
        }
    }
}

/// Records faults in the log without applying them.
#[derive(Debug, Default)]
pub struct NoopFaultInjector {
    warned: AtomicBool,
}

impl NoopFaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!("no fault commands configured; chaos events are logged but not applied");
        }
    }
}

#[async_trait]
impl FaultInjector for NoopFaultInjector {
    async fn partition(&self, isolated: &[Node], rest: &[Node]) -> Result<(), FaultError> {
        self.warn_once();
        info!(isolated = %names(isolated), rest = %names(rest), "dry-run partition");
        Ok(())
    }

    async fn heal(&self) -> Result<(), FaultError> {
        self.warn_once();
        info!("dry-run heal");
        Ok(())
    }

    async fn restart(&self, node: &Node) -> Result<(), FaultError> {
        self.warn_once();
        info!(node = %node.name, "dry-run restart");
        Ok(())
    }
}
