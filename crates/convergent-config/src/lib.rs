mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::location_name;
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Topology is empty: configure at least one location or node")]
    EmptyTopology,

    #[error("Duplicate node name: {0}")]
    DuplicateNodeName(String),

    #[error("Duplicate node endpoint: {0}")]
    DuplicateEndpoint(String),

    #[error("Invalid node '{0}': {1}")]
    InvalidNode(String, String),

    #[error("Invalid value for '{0}': {1}")]
    InvalidValue(String, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HarnessConfig {
    /// Parse a harness configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;

        // An empty document means "all defaults".
        if interpolated.trim().is_empty() {
            return Ok(HarnessConfig::default());
        }

        let config: HarnessConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a harness configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Serialize the configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: staging-ring
locations: 5
runners: 2
"#;

        let config = HarnessConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("staging-ring".to_string()));
        assert_eq!(config.locations, 5);
        assert_eq!(config.runners, 2);
        // Untouched keys keep their defaults
        assert_eq!(config.iterations, 30);
        assert_eq!(config.settle, 60);
    }

    #[test]
    fn test_parse_empty_document() {
        let config = HarnessConfig::from_yaml("").unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
host: 192.168.1.20
base_port: 20000
iterations: 100
interval: 0.5
delay: 3
settle: 15
crash: 10
restarts: 50
transport: http
request_timeout: 750ms
seed: 42
nodes:
  - name: eu-1
    port: 20001
  - name: us-1
    host: 10.1.1.1
    port: 20002
faults:
  partition: blockade partition {nodes}
  heal: blockade join
  restart: docker restart {node}
  env:
    BLOCKADE_CONFIG: /etc/blockade.yaml
"#;

        let config = HarnessConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(config.request_timeout.as_duration(), Duration::from_millis(750));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].host.as_deref(), Some("10.1.1.1"));

        let faults = config.faults.as_ref().unwrap();
        assert_eq!(faults.restart.as_deref(), Some("docker restart {node}"));
        assert_eq!(faults.env["BLOCKADE_CONFIG"], "/etc/blockade.yaml");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("CONVERGENT_TEST_SEED", "1234");

        let yaml = "seed: ${CONVERGENT_TEST_SEED}\n";
        let config = HarnessConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.seed, Some(1234));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let yaml = "transport: carrier-pigeon\n";
        assert!(matches!(
            HarnessConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_effective_config_roundtrips_through_yaml() {
        let effective = HarnessConfig::default().effective();
        let yaml = effective.to_yaml().unwrap();
        let parsed = HarnessConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.nodes, effective.nodes);
    }
}
