use std::collections::HashSet;
use std::fmt;

use convergent_config::HarnessConfig;
use serde::Serialize;

use crate::error::HarnessError;

/// Network address of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A logical cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Node {
    pub name: String,
    pub endpoint: Endpoint,
}

impl Node {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Node {
            name: name.into(),
            endpoint: Endpoint {
                host: host.into(),
                port,
            },
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.endpoint)
    }
}

/// Immutable, ordered set of cluster nodes.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
}

impl Topology {
    /// Build a topology, rejecting empty or ambiguous node sets.
    pub fn new(nodes: Vec<Node>) -> Result<Self, HarnessError> {
        if nodes.is_empty() {
            return Err(HarnessError::Topology("no nodes given".to_string()));
        }

        let mut names = HashSet::new();
        let mut endpoints = HashSet::new();
        for node in &nodes {
            if node.name.trim().is_empty() {
                return Err(HarnessError::Topology("node with empty name".to_string()));
            }
            if node.endpoint.port == 0 {
                return Err(HarnessError::Topology(format!(
                    "node '{}' has port 0",
                    node.name
                )));
            }
            if !names.insert(node.name.as_str()) {
                return Err(HarnessError::Topology(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
            if !endpoints.insert(&node.endpoint) {
                return Err(HarnessError::Topology(format!(
                    "duplicate endpoint {}",
                    node.endpoint
                )));
            }
        }

        Ok(Topology { nodes })
    }

    /// `count` nodes named `location<N>` on one host, location N listening on
    /// `base_port + N`.
    pub fn locations(host: &str, base_port: u16, count: usize) -> Result<Self, HarnessError> {
        let nodes = (1..=count)
            .map(|idx| {
                u16::try_from(idx)
                    .ok()
                    .and_then(|offset| base_port.checked_add(offset))
                    .map(|port| Node::new(convergent_config::location_name(idx), host, port))
                    .ok_or_else(|| {
                        HarnessError::Topology(format!(
                            "location {} does not fit in the port range above {}",
                            idx, base_port
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Topology::new(nodes)
    }

    /// Build the topology from the effective configuration.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        let effective = config.effective();
        let nodes = effective
            .nodes
            .iter()
            .map(|n| {
                let host = n.host.as_deref().unwrap_or(&effective.host);
                Node::new(n.name.clone(), host, n.port)
            })
            .collect();
        Topology::new(nodes)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergent_config::NodeConfig;

    #[test]
    fn test_empty_topology_rejected() {
        let err = Topology::new(Vec::new()).unwrap_err();
        assert!(matches!(err, HarnessError::Topology(_)));
    }

    #[test]
    fn test_locations_addressing() {
        let topology = Topology::locations("127.0.0.1", 10000, 3).unwrap();
        let ports: Vec<_> = topology.iter().map(|n| n.endpoint.port).collect();
        assert_eq!(ports, vec![10001, 10002, 10003]);
        assert_eq!(topology.nodes()[2].name, "location3");
        assert_eq!(
            topology.get("location2").unwrap().endpoint.to_string(),
            "127.0.0.1:10002"
        );
    }

    #[test]
    fn test_zero_locations_is_topology_error() {
        assert!(matches!(
            Topology::locations("127.0.0.1", 10000, 0),
            Err(HarnessError::Topology(_))
        ));
    }

    #[test]
    fn test_locations_port_overflow() {
        assert!(matches!(
            Topology::locations("127.0.0.1", 65535, 1),
            Err(HarnessError::Topology(_))
        ));
    }

    #[test]
    fn test_duplicate_names_and_endpoints() {
        let dup_name = Topology::new(vec![
            Node::new("a", "h", 1),
            Node::new("a", "h", 2),
        ]);
        assert!(dup_name.is_err());

        let dup_endpoint = Topology::new(vec![
            Node::new("a", "h", 1),
            Node::new("b", "h", 1),
        ]);
        assert!(dup_endpoint.is_err());

        let same_port_other_host = Topology::new(vec![
            Node::new("a", "h1", 1),
            Node::new("b", "h2", 1),
        ]);
        assert!(same_port_other_host.is_ok());
    }

    #[test]
    fn test_from_config_uses_node_hosts() {
        let config = HarnessConfig {
            host: "10.0.0.1".to_string(),
            nodes: vec![
                NodeConfig {
                    name: "east".to_string(),
                    host: None,
                    port: 9000,
                },
                NodeConfig {
                    name: "west".to_string(),
                    host: Some("10.0.0.2".to_string()),
                    port: 9000,
                },
            ],
            ..Default::default()
        };
        let topology = Topology::from_config(&config).unwrap();
        assert_eq!(topology.len(), 2);
        assert_eq!(topology.nodes()[0].endpoint.host, "10.0.0.1");
        assert_eq!(topology.nodes()[1].endpoint.host, "10.0.0.2");
    }

    #[test]
    fn test_from_config_empty() {
        let config = HarnessConfig {
            locations: 0,
            ..Default::default()
        };
        assert!(matches!(
            Topology::from_config(&config),
            Err(HarnessError::Topology(_))
        ));
    }
}
