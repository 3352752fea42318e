use std::collections::HashSet;

use crate::types::HarnessConfig;
use crate::ConfigError;

impl HarnessConfig {
    /// Validate the configuration and return a list of errors.
    ///
    /// Generated nodes are checked as well, so this validates the effective
    /// configuration regardless of whether defaults were applied.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.iterations == 0 {
            errors.push(invalid("iterations", "must be at least 1"));
        }
        if self.runners == 0 {
            errors.push(invalid("runners", "must be at least 1"));
        }
        if !self.interval.is_finite() || self.interval < 0.0 {
            errors.push(invalid("interval", "must be a non-negative number of seconds"));
        }
        if self.delay == 0 {
            errors.push(invalid("delay", "must be at least 1 second"));
        }
        if !(0.0..=100.0).contains(&self.crash) {
            errors.push(invalid("crash", "must be a percentage between 0 and 100"));
        }
        if !(0.0..=100.0).contains(&self.restarts) {
            errors.push(invalid("restarts", "must be a percentage between 0 and 100"));
        }
        if self.request_timeout.as_duration().is_zero() {
            errors.push(invalid("request_timeout", "must be greater than zero"));
        }

        // Node set
        if self.nodes.is_empty() {
            if self.locations == 0 {
                errors.push(ConfigError::EmptyTopology);
            } else if (self.base_port as usize)
                .checked_add(self.locations)
                .map_or(true, |last| last > u16::MAX as usize)
            {
                errors.push(invalid(
                    "locations",
                    "base_port + locations exceeds the TCP port range",
                ));
            }
        }

        let mut seen_names = HashSet::new();
        let mut seen_endpoints = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                errors.push(ConfigError::InvalidNode(
                    node.name.clone(),
                    "Node name must not be empty".to_string(),
                ));
            }
            if node.port == 0 {
                errors.push(ConfigError::InvalidNode(
                    node.name.clone(),
                    "Port must be non-zero".to_string(),
                ));
            }
            if !seen_names.insert(node.name.as_str()) {
                errors.push(ConfigError::DuplicateNodeName(node.name.clone()));
            }
            let host = node.host.as_deref().unwrap_or(&self.host);
            let endpoint = format!("{}:{}", host, node.port);
            if !seen_endpoints.insert(endpoint.clone()) {
                errors.push(ConfigError::DuplicateEndpoint(endpoint));
            }
        }

        if let Some(faults) = &self.faults {
            for (field, template) in [
                ("faults.partition", &faults.partition),
                ("faults.heal", &faults.heal),
                ("faults.restart", &faults.restart),
            ] {
                if matches!(template, Some(t) if t.trim().is_empty()) {
                    errors.push(invalid(field, "command template must not be blank"));
                }
            }
            if faults.partition.is_some() != faults.heal.is_some() {
                errors.push(ConfigError::InvalidConfig(
                    "faults.partition and faults.heal must be configured together".to_string(),
                ));
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue(field.to_string(), reason.to_string())
}
