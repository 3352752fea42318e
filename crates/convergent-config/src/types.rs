use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Wire protocol used to talk to cluster nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Newline-terminated commands over a plain TCP connection
    #[default]
    Tcp,
    /// `GET /get` and `POST /write` over HTTP
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "http" => Ok(TransportKind::Http),
            other => Err(format!("Unknown transport: {}", other)),
        }
    }
}

/// Human-readable duration (e.g., "200ms", "5s", "1m").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanDuration(pub Duration);

impl Default for HumanDuration {
    fn default() -> Self {
        HumanDuration(Duration::from_secs(0))
    }
}

impl HumanDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for HumanDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
            (num, "ms")
        } else if let Some(num) = s.strip_suffix('s') {
            (num, "s")
        } else if let Some(num) = s.strip_suffix('m') {
            (num, "m")
        } else if let Some(num) = s.strip_suffix('h') {
            (num, "h")
        } else {
            return Err(format!("Invalid duration format: {}", s));
        };

        let num: u64 = num_str
            .trim()
            .parse()
            .map_err(|_| format!("Invalid number in duration: {}", s))?;

        let duration = match unit {
            "ms" => Duration::from_millis(num),
            "s" => Duration::from_secs(num),
            "m" => Duration::from_secs(num * 60),
            "h" => Duration::from_secs(num * 3600),
            _ => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(HumanDuration(duration))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let secs = self.0.as_secs();

        if millis % 1000 != 0 || millis == 0 {
            write!(f, "{}ms", millis)
        } else if secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        HumanDuration::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// One cluster node given explicitly instead of the generated `location<N>` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// Falls back to the top-level `host` when absent.
    #[serde(default)]
    pub host: Option<String>,
    pub port: u16,
}

/// Shell command templates that realize faults against the real cluster.
///
/// `{nodes}` expands to the isolated node names, `{rest}` to the remaining
/// ones (both space separated), `{node}` to the node being restarted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCommands {
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub heal: Option<String>,
    #[serde(default)]
    pub restart: Option<String>,
    /// Extra environment variables passed to every fault command.
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

/// Root harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Write cycles per runner.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Seconds between writes of one runner.
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// Cluster size used to generate `location<N>` nodes.
    #[serde(default = "default_locations")]
    pub locations: usize,
    /// Seconds between chaos cycles.
    #[serde(default = "default_delay")]
    pub delay: u64,
    #[serde(default = "default_runners")]
    pub runners: usize,
    /// Seconds to wait after the chaos phase before verifying.
    #[serde(default = "default_settle")]
    pub settle: u64,
    /// Abandon probability in percent, split evenly across runners.
    #[serde(default = "default_crash")]
    pub crash: f64,
    /// Restart probability in percent per chaos cycle.
    #[serde(default = "default_restarts")]
    pub restarts: f64,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub faults: Option<FaultCommands>,
}

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_BASE_PORT: u16 = 10000;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_iterations() -> usize {
    30
}

fn default_interval() -> f64 {
    0.1
}

fn default_locations() -> usize {
    3
}

fn default_delay() -> u64 {
    10
}

fn default_runners() -> usize {
    3
}

fn default_settle() -> u64 {
    60
}

fn default_crash() -> f64 {
    5.0
}

fn default_restarts() -> f64 {
    20.0
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration(Duration::from_secs(5))
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            name: None,
            host: default_host(),
            base_port: default_base_port(),
            iterations: default_iterations(),
            interval: default_interval(),
            locations: default_locations(),
            delay: default_delay(),
            runners: default_runners(),
            settle: default_settle(),
            crash: default_crash(),
            restarts: default_restarts(),
            nodes: Vec::new(),
            transport: TransportKind::default(),
            request_timeout: default_request_timeout(),
            seed: None,
            faults: None,
        }
    }
}
