use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::RunReport;
use crate::error::{HarnessError, RequestFailure};
use crate::state::StateSet;
use crate::topology::Topology;
use crate::transport::{Command, Transport};

/// State one node reported during verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub node: String,
    pub values: StateSet,
}

/// Query every node (topology order) and require identical states.
///
/// Returns the common state on agreement. The first unreachable node or the
/// first node whose state differs from those already collected fails the
/// verification.
pub async fn verify(topology: &Topology, transport: &dyn Transport) -> Result<StateSet, HarnessError> {
    if topology.is_empty() {
        return Err(HarnessError::Topology("no nodes to verify".to_string()));
    }

    let mut collected: Vec<StateSnapshot> = Vec::with_capacity(topology.len());
    for node in topology.iter() {
        let result = transport.request(node, &Command::Get).await;
        let payload = result.outcome.map_err(|source| HarnessError::Unreachable {
            node: node.name.clone(),
            source,
        })?;
        let values = StateSet::decode(&payload).map_err(|reason| HarnessError::Unreachable {
            node: node.name.clone(),
            source: RequestFailure::Protocol {
                endpoint: node.endpoint.to_string(),
                reason,
            },
        })?;
        debug!(node = %node.name, values = values.len(), "collected state");

        if let Some(first) = collected.first() {
            if first.values != values {
                return Err(HarnessError::Consistency {
                    node: node.name.clone(),
                    observed: values,
                    collected: collected.into_iter().map(|s| (s.node, s.values)).collect(),
                });
            }
        }
        collected.push(StateSnapshot {
            node: node.name.clone(),
            values,
        });
    }

    // Non-empty: the topology has at least one node and every node answered.
    let agreed = collected.swap_remove(0).values;
    info!(nodes = topology.len(), values = agreed.len(), "all nodes agree");
    Ok(agreed)
}

/// What one node answered to a diagnostic `get`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeProbe {
    pub node: String,
    pub state: Option<StateSet>,
    pub error: Option<String>,
}

/// Query every node concurrently without failing on the first problem.
/// Results are in topology order.
pub async fn probe(topology: &Topology, transport: &dyn Transport) -> Vec<NodeProbe> {
    let get = Command::Get;
    let results = join_all(topology.iter().map(|node| transport.request(node, &get))).await;
    results
        .into_iter()
        .map(|result| match result.outcome {
            Ok(payload) => match StateSet::decode(&payload) {
                Ok(state) => NodeProbe {
                    node: result.node,
                    state: Some(state),
                    error: None,
                },
                Err(reason) => NodeProbe {
                    node: result.node,
                    state: None,
                    error: Some(reason),
                },
            },
            Err(failure) => NodeProbe {
                node: result.node,
                state: None,
                error: Some(failure.to_string()),
            },
        })
        .collect()
}

/// Acknowledged values missing from the converged state, in issue order.
pub fn lost_writes(final_state: &StateSet, report: &RunReport) -> Vec<String> {
    report
        .acknowledged()
        .filter(|value| !final_state.contains(value))
        .cloned()
        .collect()
}
