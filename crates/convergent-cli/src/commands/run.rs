use std::sync::Arc;

use convergent_config::HarnessConfig;
use convergent_core::{
    lost_writes, verify, ChaosEngine, CommandFaultInjector, EngineSettings, FaultInjector,
    NoopFaultInjector, RunReport, StateSet,
};
use serde_json::json;
use tracing::{info, warn};

use super::prepare;

pub async fn run(config: &HarnessConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let prepared = prepare(config)?;
    let config = &prepared.config;

    let injector: Arc<dyn FaultInjector> = match &config.faults {
        Some(commands) => Arc::new(CommandFaultInjector::new(commands.clone())),
        None => Arc::new(NoopFaultInjector::new()),
    };

    let mut engine = ChaosEngine::new(
        prepared.topology.clone(),
        prepared.transport.clone(),
        injector,
        EngineSettings::from_config(config),
    );
    let strategies = engine.state_operations(config.runners, config.crash_per_runner());
    let report = engine.run(strategies).await?;

    let settle = config.settle_duration();
    if !settle.is_zero() {
        info!(seconds = settle.as_secs(), "waiting for the cluster to settle");
        tokio::time::sleep(settle).await;
    }

    let final_state = verify(&prepared.topology, prepared.transport.as_ref()).await?;
    let lost = lost_writes(&final_state, &report);
    for value in &lost {
        warn!(%value, "acknowledged write missing from the converged state");
    }

    if json {
        let output = json!({
            "report": report,
            "final_state": final_state,
            "lost_writes": lost,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&report, &final_state, &lost, prepared.topology.len());
    }

    Ok(())
}

fn print_summary(report: &RunReport, final_state: &StateSet, lost: &[String], nodes: usize) {
    let stats = &report.stats;
    println!(
        "Run finished (seed {}): {} writes issued, {} acknowledged, {} failed, {} abandoned",
        report.seed,
        stats.writes_issued(),
        stats.writes_acknowledged,
        stats.writes_failed,
        stats.writes_abandoned
    );
    println!(
        "Chaos: {} partitions, {} heals, {} restarts",
        stats.partitions, stats.heals, stats.restarts
    );
    for event in &report.events {
        println!(
            "  {} {:<9} {}",
            event.at.format("%H:%M:%S%.3f"),
            event.kind.to_string(),
            event.targets.join(" ")
        );
    }
    println!(
        "Converged: {} nodes agree on {} values",
        nodes,
        final_state.len()
    );
    if !lost.is_empty() {
        println!("Lost acknowledged writes: {}", lost.join(", "));
    }
}
