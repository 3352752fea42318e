use convergent_config::HarnessConfig;
use convergent_core::{probe, verify};
use serde_json::json;

use super::prepare;

pub async fn run(config: &HarnessConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let prepared = prepare(config)?;
    let nodes = prepared.topology.len();

    match verify(&prepared.topology, prepared.transport.as_ref()).await {
        Ok(state) => {
            if json {
                let output = json!({ "converged": true, "nodes": nodes, "state": state });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Converged: {} nodes agree on {} values", nodes, state.len());
                println!("{}", state);
            }
            Ok(())
        }
        Err(e) => {
            // Show every node, not just the first one that failed.
            let probes = probe(&prepared.topology, prepared.transport.as_ref()).await;
            if json {
                let output = json!({
                    "converged": false,
                    "error": e.to_string(),
                    "nodes": probes,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                for p in &probes {
                    match (&p.state, &p.error) {
                        (Some(state), _) => eprintln!("  {}: {} values {}", p.node, state.len(), state),
                        (None, Some(error)) => eprintln!("  {}: {}", p.node, error),
                        (None, None) => eprintln!("  {}: no answer", p.node),
                    }
                }
            }
            Err(e.into())
        }
    }
}
