use std::time::Duration;

use crate::types::{HarnessConfig, NodeConfig};

/// Name of the generated node for a 1-based location index.
pub fn location_name(index: usize) -> String {
    format!("location{}", index)
}

impl HarnessConfig {
    /// Apply default inference rules to the configuration.
    /// This mutates the config in place.
    pub fn apply_defaults(&mut self) {
        // 1. Generate location<N> nodes when none are given explicitly.
        //    Port of location N is base_port + N; indices past the port range
        //    are left out and reported by validation.
        if self.nodes.is_empty() {
            let room = usize::from(u16::MAX - self.base_port);
            self.nodes = (1..=self.locations.min(room))
                .map(|idx| NodeConfig {
                    name: location_name(idx),
                    host: None,
                    port: self.base_port + idx as u16,
                })
                .collect();
        }

        // 2. Nodes without a host use the top-level host.
        for node in &mut self.nodes {
            if node.host.is_none() {
                node.host = Some(self.host.clone());
            }
        }

        // 3. Cluster size follows the node list.
        self.locations = self.nodes.len();
    }

    /// Returns a new config with all defaults applied.
    pub fn effective(&self) -> HarnessConfig {
        let mut config = self.clone();
        config.apply_defaults();
        config
    }

    /// Abandon probability of a single runner: the global percentage budget
    /// split evenly across runners, as a probability in [0, 1].
    pub fn crash_per_runner(&self) -> f64 {
        if self.runners == 0 {
            return 0.0;
        }
        (percent_to_probability(self.crash) / self.runners as f64).clamp(0.0, 1.0)
    }

    /// Restart probability per chaos cycle, in [0, 1].
    pub fn restart_probability(&self) -> f64 {
        percent_to_probability(self.restarts)
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval).unwrap_or(Duration::ZERO)
    }

    pub fn delay_duration(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    pub fn settle_duration(&self) -> Duration {
        Duration::from_secs(self.settle)
    }
}

fn percent_to_probability(percent: f64) -> f64 {
    if !percent.is_finite() {
        return 0.0;
    }
    (percent / 100.0).clamp(0.0, 1.0)
}
