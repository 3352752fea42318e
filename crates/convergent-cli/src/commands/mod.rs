pub mod config;
pub mod run;
pub mod verify;

use std::sync::Arc;

use convergent_config::HarnessConfig;
use convergent_core::{build_transport, HarnessError, Topology, Transport};
use tracing::error;

/// Validated configuration and the cluster handles built from it.
pub struct Prepared {
    pub config: HarnessConfig,
    pub topology: Arc<Topology>,
    pub transport: Arc<dyn Transport>,
}

/// Validate `config`, logging every problem, and build topology and transport.
pub fn prepare(config: &HarnessConfig) -> Result<Prepared, HarnessError> {
    let mut errors = config.validate().into_iter();
    if let Some(first) = errors.next() {
        for other in errors {
            error!(error = %other, "invalid configuration");
        }
        return Err(first.into());
    }

    let config = config.effective();
    let topology = Arc::new(Topology::from_config(&config)?);
    let transport = build_transport(config.transport, config.request_timeout.as_duration())?;
    Ok(Prepared {
        config,
        topology,
        transport,
    })
}
